use bytes::{BufMut, Bytes, BytesMut};

use super::ObjectName;
use crate::broker::DeliveryTag;

/// Messages accumulated by the consumer, plus the tags needed to ack them.
///
/// `tags` can outnumber `messages`: rejected payloads contribute a tag but
/// no line.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    pub messages: Vec<Bytes>,
    pub tags: Vec<DeliveryTag>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Vec::with_capacity(capacity),
            tags: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Join messages as newline-delimited JSON under `name`
    pub fn into_object(self, name: ObjectName) -> BatchObject {
        let size = self.messages.iter().map(|m| m.len() + 1).sum();
        let mut body = BytesMut::with_capacity(size);
        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                body.put_u8(b'\n');
            }
            body.put_slice(message);
        }

        BatchObject {
            name,
            body: body.freeze(),
            message_count: self.messages.len(),
            tags: self.tags,
        }
    }
}

/// One flushed batch, ready for the store
#[derive(Debug, Clone)]
pub struct BatchObject {
    pub name: ObjectName,
    pub body: Bytes,
    pub message_count: usize,
    pub tags: Vec<DeliveryTag>,
}
