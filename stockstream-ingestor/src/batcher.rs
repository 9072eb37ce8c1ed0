use bytes::Bytes;

use crate::{
    broker::{Delivery, DeliveryTag},
    pipeline::Batch,
};

/// Accumulates delivered messages, returns a batch once the threshold is hit.
#[derive(Debug)]
pub struct Batcher {
    threshold: usize,
    current: Batch,
}

/// What happened to a single delivered message
#[derive(Debug)]
pub enum Accepted {
    Buffered,
    Full(Batch),
    Rejected(serde_json::Error),
}

impl Batcher {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            current: Batch::with_capacity(threshold),
        }
    }

    /// Accepts a payload that is a single JSON object and re-serializes it on
    /// one line. Anything else is rejected but its tag is kept so acks stay in
    /// order.
    pub fn ingest(&mut self, delivery: Delivery) -> Accepted {
        self.current.tags.push(delivery.tag);

        match normalize(&delivery.payload) {
            Ok(line) => self.current.messages.push(line),
            Err(err) => return Accepted::Rejected(err),
        }

        if self.current.len() >= self.threshold {
            Accepted::Full(self.cut())
        } else {
            Accepted::Buffered
        }
    }

    /// Hand over whatever is buffered, `None` when no messages are waiting
    pub fn take_partial(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.cut())
        }
    }

    /// Tags of rejected messages left behind once there is nothing to flush
    pub fn take_stray_tags(&mut self) -> Vec<DeliveryTag> {
        if self.current.is_empty() {
            std::mem::take(&mut self.current.tags)
        } else {
            Vec::new()
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    fn cut(&mut self) -> Batch {
        std::mem::replace(&mut self.current, Batch::with_capacity(self.threshold))
    }
}

fn normalize(payload: &[u8]) -> Result<Bytes, serde_json::Error> {
    let value: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)?;
    Ok(serde_json::to_vec(&value)?.into())
}
