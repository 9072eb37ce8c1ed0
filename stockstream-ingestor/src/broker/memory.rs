use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use super::{Delivery, DeliveryTag, MessageSink, MessageSource};
use crate::{errors::IngestorError, Result};

/// In-process broker with consumer-group offsets.
///
/// Messages live in an append-only log per topic. Each group resumes from
/// its last acknowledged offset, so anything a subscriber received but never
/// acked is delivered again to the next subscriber of that group.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, Arc<Topic>>>>,
}

struct Topic {
    state: Mutex<TopicState>,
    changed: watch::Sender<u64>,
}

#[derive(Default)]
struct TopicState {
    log: Vec<Bytes>,
    committed: HashMap<String, i64>,
    closed: bool,
}

impl Topic {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(TopicState::default()),
            changed,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, TopicState>> {
        self.state
            .lock()
            .map_err(|err| IngestorError::BrokerConnection(err.to_string()))
    }

    fn bump(&self) {
        self.changed.send_modify(|version| *version += 1);
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|err| IngestorError::BrokerConnection(err.to_string()))?;

        Ok(topics
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone())
    }

    pub fn publisher(&self, topic: &str) -> Result<MemoryPublisher> {
        Ok(MemoryPublisher {
            topic: self.topic(topic)?,
            name: topic.to_owned(),
        })
    }

    /// Join `group` on `topic`, starting after the group's last acknowledged offset
    pub fn subscribe(&self, topic: &str, group: &str) -> Result<MemorySubscriber> {
        let handle = self.topic(topic)?;
        let position = handle
            .state()?
            .committed
            .get(group)
            .copied()
            .unwrap_or_default();
        let changed = handle.changed.subscribe();

        Ok(MemorySubscriber {
            topic: handle,
            group: group.to_owned(),
            position,
            changed,
        })
    }

    /// No more messages will be published; subscribers drain and then see the end.
    pub fn close(&self, topic: &str) -> Result<()> {
        let handle = self.topic(topic)?;
        handle.state()?.closed = true;
        handle.bump();
        Ok(())
    }

    pub fn messages(&self, topic: &str) -> Result<Vec<Bytes>> {
        Ok(self.topic(topic)?.state()?.log.clone())
    }

    /// Next offset `group` will resume from
    pub fn committed(&self, topic: &str, group: &str) -> Result<i64> {
        Ok(self
            .topic(topic)?
            .state()?
            .committed
            .get(group)
            .copied()
            .unwrap_or_default())
    }
}

pub struct MemoryPublisher {
    topic: Arc<Topic>,
    name: String,
}

#[async_trait]
impl MessageSink for MemoryPublisher {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        {
            let mut state = self.topic.state()?;
            if state.closed {
                return Err(IngestorError::BrokerPublish {
                    topic: self.name.clone(),
                    reason: "topic closed".into(),
                });
            }
            state.log.push(payload.into());
        }
        self.topic.bump();
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.name
    }
}

pub struct MemorySubscriber {
    topic: Arc<Topic>,
    group: String,
    position: i64,
    changed: watch::Receiver<u64>,
}

impl MemorySubscriber {
    fn try_next(&mut self) -> Result<Option<Option<Delivery>>> {
        let state = self.topic.state()?;
        match state.log.get(self.position as usize) {
            Some(payload) => {
                let delivery = Delivery {
                    tag: DeliveryTag {
                        partition: 0,
                        offset: self.position,
                    },
                    payload: payload.clone(),
                };
                self.position += 1;
                Ok(Some(Some(delivery)))
            }
            None if state.closed => Ok(Some(None)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageSource for MemorySubscriber {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        loop {
            self.changed.borrow_and_update();
            if let Some(next) = self.try_next()? {
                return Ok(next);
            }

            self.changed
                .changed()
                .await
                .map_err(|_| IngestorError::PipelineClosed)?;
        }
    }

    async fn ack(&mut self, tags: &[DeliveryTag]) -> Result<()> {
        let Some(last) = tags.iter().map(|tag| tag.offset).max() else {
            return Ok(());
        };

        let mut state = self.topic.state()?;
        let committed = state.committed.entry(self.group.clone()).or_default();
        *committed = (*committed).max(last + 1);
        Ok(())
    }
}
