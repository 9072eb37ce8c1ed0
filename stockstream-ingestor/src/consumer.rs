use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use itertools::Itertools;
use serde::Deserialize;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    batcher::{Accepted, Batcher},
    broker::{Delivery, DeliveryTag, MessageSource},
    errors::IngestorError,
    pipeline::{Batch, BatchObject, ObjectName, ObjectNamer, StoreSink, WriteOutcome},
    Result,
};

const MAX_RENAMES: usize = 64;

/// When delivered messages are acknowledged to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// After the batch holding the message is durably written
    #[default]
    AfterPersist,
    /// As soon as the message arrives, before it is persisted
    OnDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Accumulating,
    Flushing,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConsumerProps {
    pub threshold: usize,
    pub ack_mode: AckMode,
    /// Concurrent batch uploads before the consumer stops reading
    pub max_in_flight: usize,
    pub prefix: String,
}

impl Default for ConsumerProps {
    fn default() -> Self {
        Self {
            threshold: 10,
            ack_mode: AckMode::default(),
            max_in_flight: 1,
            prefix: crate::pipeline::DEFAULT_BATCH_PREFIX.to_owned(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConsumerReport {
    /// Written batch objects, in name order
    pub objects: Vec<ObjectName>,
    /// Message count of each written object, aligned with `objects`
    pub object_sizes: Vec<usize>,
    pub messages_written: usize,
    pub messages_rejected: usize,
}

impl ConsumerReport {
    pub fn batches_written(&self) -> usize {
        self.objects.len()
    }

    fn record(&mut self, name: ObjectName, size: usize) {
        self.objects.push(name);
        self.object_sizes.push(size);
        self.messages_written += size;
    }

    fn sorted(self) -> Self {
        let (objects, object_sizes) = self
            .objects
            .into_iter()
            .zip(self.object_sizes)
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .unzip();
        Self {
            objects,
            object_sizes,
            ..self
        }
    }
}

struct Flushed {
    seq: u64,
    object: BatchObject,
}

/// Releases acks for completed batches only once every earlier batch is done,
/// so a committed offset never runs ahead of an unwritten batch.
#[derive(Debug, Default)]
struct AckTracker {
    next: u64,
    done: BTreeMap<u64, Vec<DeliveryTag>>,
}

impl AckTracker {
    fn complete(&mut self, seq: u64, tags: Vec<DeliveryTag>) -> Vec<DeliveryTag> {
        self.done.insert(seq, tags);

        let mut ready = Vec::new();
        while let Some(tags) = self.done.remove(&self.next) {
            ready.extend(tags);
            self.next += 1;
        }
        ready
    }

    fn caught_up(&self, issued: u64) -> bool {
        self.next == issued
    }
}

/// Reads a topic, cuts fixed-size batches and writes each one to the object store.
pub struct BatchingConsumer<S> {
    source: S,
    sink: StoreSink,
    batcher: Batcher,
    namer: Arc<Mutex<ObjectNamer>>,
    ack_mode: AckMode,
    max_in_flight: usize,
    state: ConsumerState,
    in_flight: JoinSet<Result<Flushed>>,
    acks: AckTracker,
    next_seq: u64,
    report: ConsumerReport,
}

impl<S: MessageSource> BatchingConsumer<S> {
    pub fn new(source: S, sink: StoreSink, props: ConsumerProps) -> Self {
        Self {
            source,
            sink,
            batcher: Batcher::new(props.threshold),
            namer: Arc::new(Mutex::new(ObjectNamer::new(props.prefix))),
            ack_mode: props.ack_mode,
            max_in_flight: props.max_in_flight.max(1),
            state: ConsumerState::Idle,
            in_flight: JoinSet::new(),
            acks: AckTracker::default(),
            next_seq: 0,
            report: ConsumerReport::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Consume until the topic closes or `cancel` fires, then flush whatever
    /// is buffered and wait for outstanding uploads.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ConsumerReport> {
        self.set_state(ConsumerState::Accumulating);

        let consumed = self.consume(&cancel).await;
        if let Err(err) = &consumed {
            tracing::error!("consumer stopping after error: {err}");
        }
        let shutdown = self.shutdown().await;
        self.set_state(ConsumerState::Stopped);

        consumed?;
        shutdown?;
        Ok(std::mem::take(&mut self.report).sorted())
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("consumer cancelled");
                    return Ok(());
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.on_flushed(joined).await?;
                }
                delivery = self.source.recv() => match delivery? {
                    Some(delivery) => self.on_delivery(delivery).await?,
                    None => {
                        tracing::info!("topic closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn on_delivery(&mut self, delivery: Delivery) -> Result<()> {
        let tag = delivery.tag;
        if self.ack_mode == AckMode::OnDelivery {
            self.source.ack(&[tag]).await?;
        }

        match self.batcher.ingest(delivery) {
            Accepted::Buffered => {}
            Accepted::Full(batch) => self.dispatch(batch).await?,
            Accepted::Rejected(err) => {
                tracing::warn!("rejecting message at {tag:?}, not a JSON object: {err}");
                self.report.messages_rejected += 1;
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, batch: Batch) -> Result<()> {
        self.set_state(ConsumerState::Flushing);

        let name = next_name(&self.namer)?;
        let object = batch.into_object(name);
        let seq = self.next_seq;
        self.next_seq += 1;

        // a failed sibling frees its slot too; this batch still gets its upload
        let mut failed = None;
        while self.in_flight.len() >= self.max_in_flight {
            match self.in_flight.join_next().await {
                Some(joined) => {
                    if let Err(err) = self.on_flushed(joined).await {
                        failed.get_or_insert(err);
                    }
                }
                None => break,
            }
        }

        let sink = self.sink.clone();
        let namer = self.namer.clone();
        self.in_flight
            .spawn(async move { upload(sink, namer, seq, object).await });

        self.set_state(ConsumerState::Accumulating);
        failed.map_or(Ok(()), Err)
    }

    async fn on_flushed(
        &mut self,
        joined: core::result::Result<Result<Flushed>, JoinError>,
    ) -> Result<()> {
        let Flushed { seq, object } = joined??;
        tracing::info!(
            "wrote {} messages to {}",
            object.message_count,
            object.name
        );
        self.report.record(object.name, object.message_count);

        let ready = self.acks.complete(seq, object.tags);
        if self.ack_mode == AckMode::AfterPersist && !ready.is_empty() {
            self.source.ack(&ready).await?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let mut first_err = None;

        if let Some(partial) = self.batcher.take_partial() {
            tracing::info!("flushing partial batch of {} messages", partial.len());
            if let Err(err) = self.dispatch(partial).await {
                tracing::error!("partial batch flush failed: {err}");
                first_err.get_or_insert(err);
            }
        }

        self.set_state(ConsumerState::Flushing);
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(err) = self.on_flushed(joined).await {
                tracing::error!("batch flush failed: {err}");
                first_err.get_or_insert(err);
            }
        }

        let stray = self.batcher.take_stray_tags();
        if self.ack_mode == AckMode::AfterPersist
            && !stray.is_empty()
            && self.acks.caught_up(self.next_seq)
        {
            if let Err(err) = self.source.ack(&stray).await {
                first_err.get_or_insert(err);
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    fn set_state(&mut self, state: ConsumerState) {
        if self.state != state {
            tracing::debug!("consumer {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

fn next_name(namer: &Mutex<ObjectNamer>) -> Result<ObjectName> {
    let mut namer = namer
        .lock()
        .map_err(|err| IngestorError::InvalidConfig(format!("object namer poisoned: {err}")))?;
    Ok(namer.next(Utc::now()))
}

async fn upload(
    sink: StoreSink,
    namer: Arc<Mutex<ObjectNamer>>,
    seq: u64,
    mut object: BatchObject,
) -> Result<Flushed> {
    for _ in 0..MAX_RENAMES {
        match sink.write(&object).await? {
            WriteOutcome::Written(_) => return Ok(Flushed { seq, object }),
            WriteOutcome::NameTaken(path) => {
                tracing::warn!("{path} already exists, renaming batch");
                object.name = next_name(&namer)?;
            }
        }
    }

    Err(IngestorError::NameCollision {
        attempts: MAX_RENAMES,
        last: object.name.to_string(),
    })
}
