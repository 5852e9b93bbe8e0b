//! Event bus over a Kafka consumer group with manual offset commits.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};

use super::traits::{Delivery, EventBus};
use crate::error::OperatorError;

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaEventBus {
    consumer: StreamConsumer,
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventBus {
    pub fn connect(bootstrap: &str, topic: &str, group: &str) -> Result<Self, OperatorError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("heartbeat.interval.ms", "1000")
            .set("session.timeout.ms", "20000")
            .create()
            .map_err(|err| OperatorError::Bus(format!("create consumer: {err}")))?;
        consumer
            .subscribe(&[topic])
            .map_err(|err| OperatorError::Bus(format!("subscribe {topic}: {err}")))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|err| OperatorError::Bus(format!("create producer: {err}")))?;

        tracing::info!(%bootstrap, %topic, %group, "connected to event bus");
        Ok(Self {
            consumer,
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn next(&self) -> Result<Delivery, OperatorError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|err| OperatorError::Bus(format!("receive: {err}")))?;
        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), OperatorError> {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|err| OperatorError::Bus(format!("commit position: {err}")))?;
        self.consumer
            .commit(&positions, CommitMode::Sync)
            .map_err(|err| OperatorError::Bus(format!("commit: {err}")))
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), OperatorError> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(payload);
        self.producer
            .send(record, PRODUCE_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(err, _)| OperatorError::Bus(format!("publish: {err}")))
    }
}
