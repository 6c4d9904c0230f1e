//! Shard router (spec §4.C): optionally re-groups rows across partitions
//! by a sharding key before handing batches to the writer.

use crate::batch::Batch;
use crate::model::{Row, Schema, Value};
use crate::ring::RingEmission;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct ShardAccumulator {
    rows: Vec<Row>,
    commit_points: Vec<(i32, i64)>,
}

impl ShardAccumulator {
    fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.commit_points.is_empty()
    }

    fn into_batch(self) -> Batch {
        Batch::new(self.rows, self.commit_points)
    }
}

/// Groups rows by the value of a designated sharding column, accumulating
/// across partitions until a shard's row count crosses `batch_size` or the
/// caller forces a flush on the global timer.
pub struct ShardRouter {
    key_column: String,
    batch_size: usize,
    shards: Mutex<HashMap<String, ShardAccumulator>>,
}

impl ShardRouter {
    pub fn new(key_column: impl Into<String>, batch_size: usize) -> Self {
        Self {
            key_column: key_column.into(),
            batch_size: batch_size.max(1),
            shards: Mutex::new(HashMap::new()),
        }
    }

    fn shard_key(&self, schema: &Schema, row: &Option<Row>) -> String {
        let Some(row) = row else {
            return String::new();
        };
        let idx = schema.iter().position(|c| c.name == self.key_column);
        match idx.and_then(|i| row.get(i)) {
            Some(Value::Str(s)) => s.clone(),
            Some(Value::Int(i)) => i.to_string(),
            Some(Value::Float(f)) => f.to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => format!("{other:?}"),
        }
    }

    /// Accumulates one ring emission's rows into their shards, returning
    /// any shard batches that crossed the size threshold (spec §4.C). The
    /// router guarantees every offset lands in exactly one shard's
    /// accumulator, so no offset is split across two emitted batches of
    /// the same shard without both being written before commit.
    pub async fn route(&self, schema: &Schema, emission: RingEmission) -> Vec<Batch> {
        let mut shards = self.shards.lock().await;
        let mut ready = Vec::new();

        for msg_row in emission.msgrows {
            let key = self.shard_key(schema, &msg_row.row);
            let commit_point = msg_row.message.key();

            let acc = shards.entry(key.clone()).or_default();
            if let Some(row) = msg_row.row {
                acc.rows.push(row);
            }
            acc.commit_points.push(commit_point);

            if acc.rows.len() >= self.batch_size {
                if let Some(acc) = shards.remove(&key) {
                    ready.push(acc.into_batch());
                }
            }
        }

        ready
    }

    /// Empties all shard accumulators unconditionally (spec §4.C), e.g. on
    /// the global flush timer or when draining for a schema change.
    pub async fn force_flush(&self) -> Vec<Batch> {
        let mut shards = self.shards.lock().await;
        let drained: HashMap<String, ShardAccumulator> = std::mem::take(&mut shards);
        drained
            .into_values()
            .filter(|acc| !acc.is_empty())
            .map(ShardAccumulator::into_batch)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, ColumnType, Message, ScalarType};
    use crate::model::MsgRow;
    use bytes::Bytes;
    use chrono::Utc;

    fn schema() -> Schema {
        vec![
            ColumnDescriptor::new("shard_key", ColumnType::Scalar(ScalarType::String), false),
            ColumnDescriptor::new("value", ColumnType::Scalar(ScalarType::Int), false),
        ]
    }

    fn emission(rows: Vec<(i32, i64, &str, i64)>) -> RingEmission {
        let msgrows = rows
            .into_iter()
            .map(|(partition, offset, key, value)| MsgRow {
                message: Message {
                    topic: "t".into(),
                    partition,
                    offset,
                    payload: Bytes::new(),
                    timestamp: Utc::now(),
                },
                row: Some(vec![Value::Str(key.into()), Value::Int(value)]),
            })
            .collect();
        RingEmission {
            partition: 0,
            start_offset: 0,
            msgrows,
        }
    }

    #[tokio::test]
    async fn accumulates_until_threshold_then_emits() {
        let router = ShardRouter::new("shard_key", 2);
        let schema = schema();

        let ready = router
            .route(&schema, emission(vec![(0, 0, "a", 1)]))
            .await;
        assert!(ready.is_empty());

        let ready = router
            .route(&schema, emission(vec![(1, 0, "a", 2)]))
            .await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].rows.len(), 2);
        assert_eq!(ready[0].commit_points.len(), 2);
    }

    #[tokio::test]
    async fn distinct_keys_accumulate_independently() {
        let router = ShardRouter::new("shard_key", 10);
        let schema = schema();
        router
            .route(&schema, emission(vec![(0, 0, "a", 1), (0, 1, "b", 2)]))
            .await;

        let flushed = router.force_flush().await;
        assert_eq!(flushed.len(), 2);
        let total_commits: usize = flushed.iter().map(|b| b.commit_points.len()).sum();
        assert_eq!(total_commits, 2);
    }

    #[tokio::test]
    async fn force_flush_empties_all_shards_unconditionally() {
        let router = ShardRouter::new("shard_key", 100);
        let schema = schema();
        router
            .route(&schema, emission(vec![(0, 0, "a", 1)]))
            .await;
        let flushed = router.force_flush().await;
        assert_eq!(flushed.len(), 1);
        assert!(router.force_flush().await.is_empty());
    }
}
