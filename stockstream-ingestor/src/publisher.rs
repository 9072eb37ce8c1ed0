use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{broker::MessageSink, record::StockRecord, Result};

pub const DEFAULT_PUBLISH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub sent: usize,
    /// True when cancellation stopped the run before every record went out
    pub cancelled: bool,
}

/// Sends records one by one onto a topic with a fixed pause between sends.
pub struct Publisher<S> {
    sink: S,
    delay: Duration,
}

impl<S: MessageSink> Publisher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            delay: DEFAULT_PUBLISH_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn publish_all(
        &mut self,
        records: &[StockRecord],
        cancel: &CancellationToken,
    ) -> Result<PublishReport> {
        let topic = self.sink.topic().to_owned();
        let mut report = PublishReport::default();

        let sent = self.send_each(records, cancel, &mut report).await;
        // flush even after a failed send
        let flushed = self.sink.flush().await;
        sent?;
        flushed?;

        tracing::info!("published {} of {} records to {topic}", report.sent, records.len());
        Ok(report)
    }

    async fn send_each(
        &mut self,
        records: &[StockRecord],
        cancel: &CancellationToken,
        report: &mut PublishReport,
    ) -> Result<()> {
        for (i, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.sink.send(record.to_message()?).await?;
            report.sent += 1;
            tracing::debug!("sent {} {} ({}/{})", record.symbol, record.date, i + 1, records.len());

            if i + 1 < records.len() && !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}
