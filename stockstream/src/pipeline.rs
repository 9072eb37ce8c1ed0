use std::sync::Arc;

use object_store::{path::Path, ObjectStore};
use stockstream_ingestor::{
    broker::{MemoryBroker, MessageSink, MessageSource},
    source::load_records,
    BatchingConsumer, ConsumerReport, PublishReport, Publisher, StoreSink,
};
use stockstream_warehouse::{LakeWarehouse, LoadReport, WarehouseLoader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{config::Config, errors::Result};

#[derive(Debug, Default)]
pub struct RunReport {
    pub published: PublishReport,
    pub consumed: ConsumerReport,
    pub loaded: LoadReport,
}

enum Stage {
    Published(PublishReport),
    Consumed(ConsumerReport),
}

/// Read the source CSV from the bucket, sample it and publish the sample.
pub async fn publish<S: MessageSink>(
    config: &Config,
    bucket: &dyn ObjectStore,
    sink: S,
    cancel: &CancellationToken,
) -> Result<PublishReport> {
    let records = load_records(bucket, &Path::from(config.sampler.source.as_str())).await?;
    let sample = config.sampler.sampler().sample(records);
    tracing::info!("sampled {} records from {}", sample.len(), config.sampler.source);

    let mut publisher = Publisher::new(sink).with_delay(config.publisher.delay());
    Ok(publisher.publish_all(&sample, cancel).await?)
}

pub async fn consume<S: MessageSource>(
    config: &Config,
    bucket: Arc<dyn ObjectStore>,
    source: S,
    cancel: CancellationToken,
) -> Result<ConsumerReport> {
    let sink = StoreSink::new(bucket).with_retry(config.retry);
    let mut consumer = BatchingConsumer::new(source, sink, config.consumer.props());
    Ok(consumer.run(cancel).await?)
}

pub fn loader(config: &Config, bucket: Arc<dyn ObjectStore>) -> WarehouseLoader<LakeWarehouse> {
    let warehouse = LakeWarehouse::new(bucket.clone(), Path::from(config.warehouse.root.as_str()));
    WarehouseLoader::new(warehouse, bucket, config.warehouse.loader.clone()).with_retry(config.retry)
}

pub async fn load(config: &Config, bucket: Arc<dyn ObjectStore>) -> Result<LoadReport> {
    Ok(loader(config, bucket).run().await?)
}

/// Publisher and consumer as two tasks over an in-process broker, then one load.
///
/// The topic closes once publishing ends so the consumer drains it and
/// flushes the tail. Cancelling stops both stages early, buffered messages
/// still get flushed.
pub async fn run_in_process(
    config: &Config,
    bucket: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let broker = MemoryBroker::new();
    let topic = config.broker.topic.clone();
    let sink = broker.publisher(&topic)?;
    let source = broker.subscribe(&topic, &config.broker.group_id)?;

    run_stages(config, bucket, sink, source, cancel, move || {
        Ok(broker.close(&topic)?)
    })
    .await
}

/// Publish and consume side by side, then load once both stages are done.
///
/// `published` runs when publishing ends, whether it succeeded or not. A
/// failing stage cancels the other one, which still flushes what it holds,
/// and the first error is returned without loading.
pub async fn run_stages<P, S, F>(
    config: &Config,
    bucket: Arc<dyn ObjectStore>,
    sink: P,
    source: S,
    cancel: CancellationToken,
    published: F,
) -> Result<RunReport>
where
    P: MessageSink + 'static,
    S: MessageSource + 'static,
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let mut stages = JoinSet::new();
    {
        let config = config.clone();
        let bucket = bucket.clone();
        let cancel = cancel.clone();
        stages.spawn(async move {
            let report = publish(&config, bucket.as_ref(), sink, &cancel).await;
            let closed = published();
            let report = report?;
            closed?;
            Ok(Stage::Published(report))
        });
    }
    {
        let config = config.clone();
        let bucket = bucket.clone();
        let cancel = cancel.clone();
        stages.spawn(async move {
            consume(&config, bucket, source, cancel)
                .await
                .map(Stage::Consumed)
        });
    }

    let mut report = RunReport::default();
    let mut failed = None;
    while let Some(stage) = stages.join_next().await {
        match stage? {
            Ok(Stage::Published(published)) => report.published = published,
            Ok(Stage::Consumed(consumed)) => report.consumed = consumed,
            Err(err) => {
                tracing::error!("pipeline stage failed: {err}");
                // stop the other stage, it still flushes what it holds
                cancel.cancel();
                failed.get_or_insert(err);
            }
        }
    }
    if let Some(err) = failed {
        return Err(err);
    }

    report.loaded = load(config, bucket).await?;
    Ok(report)
}
