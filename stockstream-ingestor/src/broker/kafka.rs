use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::Message,
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
    Offset, TopicPartitionList,
};
use tokio::task::block_in_place;

use super::{Delivery, DeliveryTag, MessageSink, MessageSource};
use crate::{errors::IngestorError, Result};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn connect(bootstrap_servers: &str, topic: &str) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|err| IngestorError::BrokerConnection(err.to_string()))?;

        Ok(Self {
            producer,
            topic: topic.to_owned(),
        })
    }
}

#[async_trait]
impl MessageSink for KafkaPublisher {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(&payload);

        self.producer
            .send(record, Timeout::Never)
            .await
            .map_err(|(err, _)| IngestorError::BrokerPublish {
                topic: self.topic.clone(),
                reason: err.to_string(),
            })?;

        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        block_in_place(|| self.producer.flush(Timeout::After(FLUSH_TIMEOUT))).map_err(|err| {
            IngestorError::BrokerPublish {
                topic: self.topic.clone(),
                reason: err.to_string(),
            }
        })
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Consumer-group member with explicit offset commits.
///
/// Auto commit is off; offsets only move when the batching consumer acks.
pub struct KafkaSubscriber {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSubscriber {
    pub fn connect(bootstrap_servers: &str, topic: &str, group_id: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|err| IngestorError::BrokerConnection(err.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|err| IngestorError::BrokerConnection(err.to_string()))?;

        Ok(Self {
            consumer,
            topic: topic.to_owned(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSubscriber {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|err| IngestorError::BrokerConnection(err.to_string()))?;

        let payload = Bytes::copy_from_slice(message.payload().unwrap_or_default());
        Ok(Some(Delivery {
            tag: DeliveryTag {
                partition: message.partition(),
                offset: message.offset(),
            },
            payload,
        }))
    }

    async fn ack(&mut self, tags: &[DeliveryTag]) -> Result<()> {
        let mut next_offsets: HashMap<i32, i64> = HashMap::new();
        for tag in tags {
            let next = next_offsets.entry(tag.partition).or_insert(tag.offset + 1);
            *next = (*next).max(tag.offset + 1);
        }
        if next_offsets.is_empty() {
            return Ok(());
        }

        let mut list = TopicPartitionList::new();
        for (partition, offset) in next_offsets {
            list.add_partition_offset(&self.topic, partition, Offset::Offset(offset))
                .map_err(|err| IngestorError::BrokerAck(err.to_string()))?;
        }

        block_in_place(|| self.consumer.commit(&list, CommitMode::Sync))
            .map_err(|err| IngestorError::BrokerAck(err.to_string()))
    }
}
