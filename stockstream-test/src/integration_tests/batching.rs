use std::{sync::Arc, time::Duration};

use object_store::{local::LocalFileSystem, memory::InMemory, ObjectStore};
use stockstream::pipeline::consume;
use stockstream_ingestor::{broker::MemoryBroker, ConsumerReport};
use tokio_util::sync::CancellationToken;

use crate::{eventually, publish_quotes, shared, test_config, GROUP, TOPIC};

async fn line_counts(bucket: &dyn ObjectStore, report: &ConsumerReport) -> anyhow::Result<Vec<usize>> {
    let mut counts = vec![];
    for object in &report.objects {
        let body = bucket.get(&object.path()).await?.bytes().await?;
        counts.push(body.split(|b| *b == b'\n').count());
    }
    Ok(counts)
}

#[tokio::test]
async fn it_flushes_the_tail_when_stopped_mid_batch() -> anyhow::Result<()> {
    let config = test_config();
    let broker = MemoryBroker::new();
    let bucket = shared(InMemory::new());
    publish_quotes(&broker, 25).await?;

    let cancel = CancellationToken::new();
    let consumer = {
        let source = broker.subscribe(TOPIC, GROUP)?;
        let bucket = bucket.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consume(&config, bucket, source, cancel).await })
    };

    // two full batches persisted and acked, the last five are only buffered
    eventually(Duration::from_secs(5), || Ok(broker.committed(TOPIC, GROUP)? == 20)).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let report = consumer.await??;

    assert_eq!(vec![10, 10, 5], report.object_sizes);
    assert_eq!(vec![10, 10, 5], line_counts(bucket.as_ref(), &report).await?);
    assert_eq!(25, broker.committed(TOPIC, GROUP)?);
    Ok(())
}

#[tokio::test]
async fn it_redelivers_what_a_failed_consumer_never_persisted() -> anyhow::Result<()> {
    let config = test_config();
    let broker = MemoryBroker::new();
    publish_quotes(&broker, 7).await?;
    broker.close(TOPIC)?;

    // a regular file where the bucket should be a directory
    let blocker = tempfile::NamedTempFile::new()?;
    let broken = shared(LocalFileSystem::new_with_prefix(blocker.path())?);
    let first = consume(
        &config,
        broken,
        broker.subscribe(TOPIC, GROUP)?,
        CancellationToken::new(),
    )
    .await;
    assert!(first.is_err());
    assert_eq!(0, broker.committed(TOPIC, GROUP)?);

    let bucket = shared(InMemory::new());
    let second = consume(
        &config,
        bucket.clone(),
        broker.subscribe(TOPIC, GROUP)?,
        CancellationToken::new(),
    )
    .await?;

    assert_eq!(7, second.messages_written);
    assert_eq!(vec![7], line_counts(bucket.as_ref(), &second).await?);
    assert_eq!(7, broker.committed(TOPIC, GROUP)?);
    Ok(())
}

#[tokio::test]
async fn it_keeps_batches_from_every_group_member_apart() -> anyhow::Result<()> {
    let mut config = test_config();
    config.consumer.threshold = 4;
    let broker = MemoryBroker::new();
    let bucket: Arc<dyn ObjectStore> = shared(InMemory::new());
    publish_quotes(&broker, 8).await?;
    broker.close(TOPIC)?;

    let first = consume(
        &config,
        bucket.clone(),
        broker.subscribe(TOPIC, GROUP)?,
        CancellationToken::new(),
    )
    .await?;
    // the same topic replayed by another group lands in fresh objects
    let second = consume(
        &config,
        bucket.clone(),
        broker.subscribe(TOPIC, "replay")?,
        CancellationToken::new(),
    )
    .await?;

    assert_eq!(2, first.batches_written());
    assert_eq!(2, second.batches_written());
    for object in &second.objects {
        assert!(!first.objects.contains(object));
    }
    Ok(())
}
