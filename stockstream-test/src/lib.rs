use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use object_store::{path::Path, ObjectStore, PutPayload};
use stockstream::{Config, StorageConfig};
use stockstream_ingestor::{
    broker::{MemoryBroker, MessageSink},
    pipeline::DEFAULT_BATCH_PREFIX,
    ObjectName, RetryPolicy, StockRecord,
};

pub const SOURCE_CSV: &str = "Stock_data.csv";
pub const TOPIC: &str = "stock-data";
pub const GROUP: &str = "stock-data-batchers";

const CSV_HEADER: &str = "Index,Date,Open,High,Low,Close,Adj Close,Volume,CloseUSD";
const SYMBOLS: [&str; 4] = ["HSI", "NYA", "IXIC", "N225"];

/// A plausible quote, distinct for every `i`
pub fn quote(i: usize) -> StockRecord {
    let base = 1000.0 + i as f64;
    StockRecord {
        symbol: SYMBOLS[i % SYMBOLS.len()].to_owned(),
        date: format!("{}-{:02}-{:02}", 1990 + i / 336, 1 + (i / 28) % 12, 1 + i % 28),
        open: base,
        high: base + 12.5,
        low: base - 7.25,
        close: base + 3.0,
        adj_close: base + 3.0,
        volume: (i * 1000) as f64,
        close_usd: (base + 3.0) / 7.8,
    }
}

pub fn quotes(count: usize) -> Vec<StockRecord> {
    (0..count).map(quote).collect()
}

pub fn quotes_csv(count: usize) -> String {
    let mut csv = vec![CSV_HEADER.to_owned()];
    csv.extend(quotes(count).into_iter().map(|q| {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            q.symbol, q.date, q.open, q.high, q.low, q.close, q.adj_close, q.volume, q.close_usd
        )
    }));
    csv.join("\n") + "\n"
}

pub async fn seed_source(bucket: &dyn ObjectStore, count: usize) -> Result<()> {
    bucket
        .put(&Path::from(SOURCE_CSV), PutPayload::from(quotes_csv(count)))
        .await?;
    Ok(())
}

pub async fn publish_quotes(broker: &MemoryBroker, count: usize) -> Result<()> {
    let mut publisher = broker.publisher(TOPIC)?;
    for record in quotes(count) {
        publisher.send(record.to_message()?).await?;
    }
    Ok(())
}

/// Store a batch object the way the consumer would have named it
pub async fn put_batch_object(
    bucket: &dyn ObjectStore,
    counter: u64,
    body: impl Into<String>,
) -> Result<ObjectName> {
    let at = Utc
        .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
        .single()
        .context("fixed batch timestamp")?;
    let name = ObjectName::new(DEFAULT_BATCH_PREFIX, at, counter);
    bucket.put(&name.path(), PutPayload::from(body.into())).await?;
    Ok(name)
}

pub async fn put_quote_batch(
    bucket: &dyn ObjectStore,
    counter: u64,
    records: &[StockRecord],
) -> Result<ObjectName> {
    let lines = records
        .iter()
        .map(|record| -> Result<String> { Ok(String::from_utf8(record.to_message()?)?) })
        .collect::<Result<Vec<_>>>()?;
    put_batch_object(bucket, counter, lines.join("\n")).await
}

/// No pauses, no retries, everything in memory
pub fn test_config() -> Config {
    let mut config = Config {
        storage: StorageConfig::Memory,
        retry: RetryPolicy::none(),
        ..Default::default()
    };
    config.broker.topic = TOPIC.into();
    config.broker.group_id = GROUP.into();
    config.publisher.delay_ms = 0;
    config
}

/// Poll until `check` holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> Result<bool>) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check()? {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

pub fn shared(store: impl ObjectStore) -> Arc<dyn ObjectStore> {
    Arc::new(store)
}

#[cfg(test)]
mod integration_tests;
