use std::{collections::HashSet, time::Duration};

use arrow_array::{cast::AsArray, RecordBatch};
use object_store::memory::InMemory;
use async_trait::async_trait;
use object_store::ObjectStore;
use stockstream::{
    pipeline::{load, loader, run_in_process, run_stages},
    StockstreamError,
};
use stockstream_ingestor::{
    broker::{memory::MemoryPublisher, MemoryBroker, MessageSink},
    errors::IngestorError,
};
use stockstream_warehouse::Warehouse;
use tokio_util::sync::CancellationToken;

use crate::{seed_source, shared, test_config, GROUP, TOPIC};

/// Loses its broker connection after a fixed number of sends
struct FailAfter {
    inner: MemoryPublisher,
    remaining: usize,
}

#[async_trait]
impl MessageSink for FailAfter {
    async fn send(&mut self, payload: Vec<u8>) -> stockstream_ingestor::Result<()> {
        if self.remaining == 0 {
            return Err(IngestorError::BrokerPublish {
                topic: self.inner.topic().to_owned(),
                reason: "connection reset".into(),
            });
        }
        self.remaining -= 1;
        self.inner.send(payload).await
    }

    async fn flush(&mut self) -> stockstream_ingestor::Result<()> {
        self.inner.flush().await
    }

    fn topic(&self) -> &str {
        self.inner.topic()
    }
}

fn symbols_and_dates(batches: &[RecordBatch]) -> anyhow::Result<HashSet<(String, String)>> {
    let mut rows = HashSet::new();
    for batch in batches {
        let symbol = batch
            .column_by_name("Index")
            .ok_or_else(|| anyhow::anyhow!("no Index column"))?
            .as_string::<i32>();
        let date = batch
            .column_by_name("Date")
            .ok_or_else(|| anyhow::anyhow!("no Date column"))?
            .as_string::<i32>();
        for i in 0..batch.num_rows() {
            rows.insert((symbol.value(i).to_owned(), date.value(i).to_owned()));
        }
    }
    Ok(rows)
}

#[tokio::test(flavor = "multi_thread")]
async fn it_moves_a_sample_from_csv_to_the_table() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut config = test_config();
    config.sampler.target = 25;
    let bucket = shared(InMemory::new());
    seed_source(bucket.as_ref(), 30).await?;

    let report = run_in_process(&config, bucket.clone(), CancellationToken::new()).await?;

    assert_eq!(25, report.published.sent);
    assert!(!report.published.cancelled);
    assert_eq!(vec![10, 10, 5], report.consumed.object_sizes);
    assert_eq!(3, report.loaded.loaded());
    assert_eq!(25, report.loaded.rows_loaded());
    assert!(report.loaded.is_success());

    let table_ref = config.warehouse.loader.table_ref();
    let batches = loader(&config, bucket.clone())
        .warehouse()
        .read_table(&table_ref)
        .await?;
    // every sampled quote exactly once
    assert_eq!(25, symbols_and_dates(&batches)?.len());

    let again = load(&config, bucket).await?;
    assert_eq!(0, again.loaded());
    assert_eq!(3, again.already_loaded());
    Ok(())
}

#[tokio::test]
async fn it_stops_both_stages_when_cancelled_up_front() -> anyhow::Result<()> {
    let config = test_config();
    let bucket = shared(InMemory::new());
    seed_source(bucket.as_ref(), 5).await?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = run_in_process(&config, bucket, cancel).await?;

    assert!(report.published.cancelled);
    assert_eq!(0, report.published.sent);
    assert_eq!(0, report.consumed.batches_written());
    assert!(report.loaded.loads.is_empty());
    assert!(report.loaded.table_created);
    Ok(())
}

#[tokio::test]
async fn it_stops_the_consumer_when_publishing_fails() -> anyhow::Result<()> {
    let mut config = test_config();
    config.publisher.delay_ms = 50;
    let broker = MemoryBroker::new();
    let bucket = shared(InMemory::new());
    seed_source(bucket.as_ref(), 5).await?;

    let sink = FailAfter {
        inner: broker.publisher(TOPIC)?,
        remaining: 3,
    };
    let run = run_stages(
        &config,
        bucket.clone(),
        sink,
        broker.subscribe(TOPIC, GROUP)?,
        CancellationToken::new(),
        || Ok(()),
    );
    // the topic never closes, only a cancel can end the consumer
    let result = tokio::time::timeout(Duration::from_secs(10), run).await?;

    assert!(matches!(
        result,
        Err(StockstreamError::Ingestor(IngestorError::BrokerPublish { .. }))
    ));
    // what the consumer held was flushed before it stopped
    let listing = bucket.list_with_delimiter(None).await?;
    let batches: Vec<_> = listing
        .objects
        .iter()
        .filter(|meta| meta.location.as_ref().ends_with(".ndjson"))
        .collect();
    assert_eq!(1, batches.len());
    let body = bucket.get(&batches[0].location).await?.bytes().await?;
    assert_eq!(3, body.split(|b| *b == b'\n').count());
    assert_eq!(3, broker.committed(TOPIC, GROUP)?);
    Ok(())
}
