//! Kafka-backed `Inputer` (spec §6): delivers messages from a partitioned
//! topic and commits offsets only once the write loop says a batch
//! containing them has been durably written.

mod config;

pub use config::KafkaConfig;

use crate::error::{AppError, AppResult};
use crate::interfaces::Inputer;
use crate::model::Message;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct KafkaInput {
    consumer: StreamConsumer,
    topic: String,
    shutdown: CancellationToken,
}

impl KafkaInput {
    pub fn new(cfg: &KafkaConfig, shutdown: CancellationToken) -> AppResult<Self> {
        let brokers = cfg.brokers()?;
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &cfg.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", cfg.session_timeout_ms.to_string())
            .create()
            .map_err(AppError::Kafka)?;

        consumer.subscribe(&[cfg.topic.as_str()]).map_err(AppError::Kafka)?;

        Ok(Self {
            consumer,
            topic: cfg.topic.clone(),
            shutdown,
        })
    }
}

#[async_trait]
impl Inputer for KafkaInput {
    async fn run(&self, on_message: mpsc::Sender<Message>) -> AppResult<()> {
        let mut stream = self.consumer.stream();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(AppError::Shutdown),
                next = stream.next() => {
                    let Some(result) = next else {
                        continue;
                    };
                    let borrowed = match result {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::error!(error = %e, "kafka consumer error");
                            continue;
                        }
                    };
                    let Some(payload) = borrowed.payload() else {
                        continue;
                    };
                    let message = Message {
                        topic: self.topic.clone(),
                        partition: borrowed.partition(),
                        offset: borrowed.offset(),
                        payload: Bytes::copy_from_slice(payload),
                        timestamp: Utc::now(),
                    };
                    if on_message.send(message).await.is_err() {
                        return Err(AppError::Shutdown);
                    }
                }
            }
        }
    }

    /// Commits the highest offset per partition among the given commit
    /// points (spec §4.D) — Kafka commits are "next offset to read", so
    /// each stored offset is one past the message actually processed.
    async fn commit_messages(&self, commit_points: &[(i32, i64)]) -> AppResult<()> {
        if commit_points.is_empty() {
            return Ok(());
        }
        let mut highest: HashMap<i32, i64> = HashMap::new();
        for &(partition, offset) in commit_points {
            highest
                .entry(partition)
                .and_modify(|o| *o = (*o).max(offset))
                .or_insert(offset);
        }

        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in highest {
            tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
                .map_err(AppError::Kafka)?;
        }

        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(AppError::Kafka)
    }

    async fn stop(&self) -> AppResult<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
