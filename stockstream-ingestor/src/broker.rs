//! The seam between the pipeline and whatever carries messages between the
//! publisher and the batching consumer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use memory::MemoryBroker;

/// Where a delivered message sits in the topic, used to acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Bytes,
}

/// Producing half of a topic.
#[async_trait]
pub trait MessageSink: Send {
    /// Resolves once the broker has acknowledged the message
    async fn send(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Wait for every outstanding send to be acknowledged
    async fn flush(&mut self) -> Result<()>;

    fn topic(&self) -> &str;
}

/// Consuming half of a topic, bound to a consumer group.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivered message, `None` once the topic is closed for good.
    ///
    /// Must be cancel safe: dropping the future before it resolves loses nothing.
    async fn recv(&mut self) -> Result<Option<Delivery>>;

    /// Mark everything up to and including these tags as consumed for the group
    async fn ack(&mut self, tags: &[DeliveryTag]) -> Result<()>;
}

#[async_trait]
impl<S: MessageSink + ?Sized> MessageSink for Box<S> {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        (**self).send(payload).await
    }

    async fn flush(&mut self) -> Result<()> {
        (**self).flush().await
    }

    fn topic(&self) -> &str {
        (**self).topic()
    }
}

#[async_trait]
impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        (**self).recv().await
    }

    async fn ack(&mut self, tags: &[DeliveryTag]) -> Result<()> {
        (**self).ack(tags).await
    }
}
