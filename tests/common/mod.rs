//! In-memory `Inputer`/`OutputWriter` pair for end-to-end scenario tests
//! (SPEC_FULL.md §8) — no real Kafka/ClickHouse needed, mirroring the
//! teacher's own `tests/redis_retention.rs` approach of exercising real
//! wiring against a faked backing service rather than mocking internals.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use streamsink::error::{AppError, AppResult};
use streamsink::interfaces::{Inputer, OutputWriter};
use streamsink::model::{ColumnDescriptor, Message, Schema};
use tokio::sync::mpsc;

/// Relays whatever the test pushes through its paired sender — lets a
/// scenario drip-feed messages in waves, with real sleeps between them,
/// rather than handing the whole fixture over up front.
pub struct FakeInputer {
    rx: StdMutex<Option<mpsc::UnboundedReceiver<Message>>>,
    pub committed: Arc<StdMutex<Vec<(i32, i64)>>>,
}

impl FakeInputer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            rx: StdMutex::new(Some(rx)),
            committed: Arc::new(StdMutex::new(Vec::new())),
        });
        (this, tx)
    }

    pub fn with_messages(messages: Vec<Message>) -> Arc<Self> {
        let (this, tx) = Self::new();
        for m in messages {
            tx.send(m).unwrap();
        }
        this
    }
}

#[async_trait]
impl Inputer for FakeInputer {
    async fn run(&self, on_message: mpsc::Sender<Message>) -> AppResult<()> {
        let mut rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("run called more than once");
        while let Some(message) = rx.recv().await {
            if on_message.send(message).await.is_err() {
                return Err(AppError::Shutdown);
            }
        }
        Ok(())
    }

    async fn commit_messages(&self, commit_points: &[(i32, i64)]) -> AppResult<()> {
        self.committed
            .lock()
            .unwrap()
            .extend_from_slice(commit_points);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Records every row written and every schema change applied. `schema`
/// mirrors what a real destination's `system.columns` would report after
/// each applied change, so `current_schema()` — re-read by the supervisor
/// after every `change_schema` — reflects the accumulated column set
/// instead of just the latest delta.
pub struct FakeOutputWriter {
    pub rows_written: Arc<AtomicU64>,
    pub schema_changes: Arc<StdMutex<Vec<Vec<ColumnDescriptor>>>>,
    schema: StdMutex<Schema>,
}

impl FakeOutputWriter {
    pub fn new() -> Self {
        Self::with_schema(Vec::new())
    }

    pub fn with_schema(schema: Schema) -> Self {
        Self {
            rows_written: Arc::new(AtomicU64::new(0)),
            schema_changes: Arc::new(StdMutex::new(Vec::new())),
            schema: StdMutex::new(schema),
        }
    }
}

#[async_trait]
impl OutputWriter for FakeOutputWriter {
    async fn init(&self) -> AppResult<()> {
        Ok(())
    }

    async fn write(&self, batch: &streamsink::batch::Batch) -> AppResult<()> {
        self.rows_written
            .fetch_add(batch.rows.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn change_schema(&self, new_cols: &[ColumnDescriptor]) -> AppResult<()> {
        self.schema_changes.lock().unwrap().push(new_cols.to_vec());
        self.schema.lock().unwrap().extend_from_slice(new_cols);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        Ok(())
    }

    fn current_schema(&self) -> Schema {
        self.schema.lock().unwrap().clone()
    }
}

pub fn message(partition: i32, offset: i64, payload: &str) -> Message {
    Message {
        topic: "events".into(),
        partition,
        offset,
        payload: Bytes::from(payload.to_string()),
        timestamp: Utc::now(),
    }
}
