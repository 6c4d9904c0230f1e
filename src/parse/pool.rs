//! Bounded parsing worker pool. `submit` never blocks beyond acquiring a
//! semaphore permit; unlike the teacher's exchange-specific parsers,
//! `serde_json` needs no per-worker mutable parser instance or free-list,
//! so that part of the pool design falls away here.

use super::json::{row_from_json, TimeLayouts};
use crate::error::AppError;
use crate::model::{MsgRow, Schema};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The outcome of parsing one message: the `MsgRow` to feed into the ring
/// (with `row: None` on any failure, so the offset is never lost), the raw
/// JSON value for schema discovery to inspect, and — when the row failed
/// specifically because of an unsupported array element type rather than
/// malformed JSON — the error, so the supervisor can treat it as the typed
/// failure it is instead of an ordinary parse miss.
pub struct ParsedUnit {
    pub msg_row: MsgRow,
    pub json: Option<serde_json::Value>,
    pub array_error: Option<AppError>,
}

pub struct ParserPool {
    semaphore: Arc<Semaphore>,
    schema: Arc<ArcSwap<Schema>>,
    layouts: TimeLayouts,
}

impl ParserPool {
    pub fn new(max_concurrency: usize, schema: Schema, layouts: TimeLayouts) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            schema: Arc::new(ArcSwap::from_pointee(schema)),
            layouts,
        }
    }

    pub fn current_schema(&self) -> Arc<Schema> {
        self.schema.load_full()
    }

    /// Installed by the schema controller after a `changeSchema` commits
    /// (spec §4.F) — subsequent `submit` calls see the new column set.
    pub fn replace_schema(&self, schema: Schema) {
        self.schema.store(Arc::new(schema));
    }

    /// Parses one message off the executor's blocking pool, bounded by the
    /// pool's concurrency limit (spec §4.A).
    pub async fn submit(&self, message: crate::model::Message) -> ParsedUnit {
        let permit = self.semaphore.clone().acquire_owned().await;
        let schema = self.schema.load_full();
        let layouts = self.layouts.clone();

        let result = tokio::task::spawn_blocking(move || parse_and_map(&schema, &layouts, message))
            .await;

        drop(permit);
        match result {
            Ok(unit) => unit,
            Err(_join_err) => unreachable!("parse_and_map does not panic"),
        }
    }
}

fn parse_and_map(
    schema: &Schema,
    layouts: &TimeLayouts,
    message: crate::model::Message,
) -> ParsedUnit {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(&message.payload).ok();

    let Some(json) = parsed else {
        return ParsedUnit {
            msg_row: MsgRow { message, row: None },
            json: None,
            array_error: None,
        };
    };

    match row_from_json(schema, layouts, &json) {
        Ok(row) => ParsedUnit {
            msg_row: MsgRow {
                message,
                row: Some(row),
            },
            json: Some(json),
            array_error: None,
        },
        Err(err @ AppError::UnsupportedArrayElement(_)) => ParsedUnit {
            msg_row: MsgRow { message, row: None },
            json: Some(json),
            array_error: Some(err),
        },
        Err(_) => ParsedUnit {
            msg_row: MsgRow { message, row: None },
            json: Some(json),
            array_error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, ColumnType, Message, ScalarType};
    use bytes::Bytes;
    use chrono::Utc;

    fn message(payload: &str) -> Message {
        Message {
            topic: "t".into(),
            partition: 0,
            offset: 0,
            payload: Bytes::from(payload.to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn malformed_json_yields_rowless_msgrow() {
        let pool = ParserPool::new(4, vec![], TimeLayouts::default());
        let unit = pool.submit(message("not json")).await;
        assert!(unit.msg_row.row.is_none());
        assert!(unit.json.is_none());
        assert!(unit.array_error.is_none());
    }

    #[tokio::test]
    async fn well_formed_json_maps_row_and_retains_raw_value() {
        let schema = vec![ColumnDescriptor::new(
            "value",
            ColumnType::Scalar(ScalarType::Int),
            false,
        )];
        let pool = ParserPool::new(4, schema, TimeLayouts::default());
        let unit = pool.submit(message(r#"{"value": 7}"#)).await;
        assert!(unit.msg_row.row.is_some());
        assert!(unit.json.is_some());
    }

    #[tokio::test]
    async fn schema_hot_swap_is_visible_to_next_submit() {
        let pool = ParserPool::new(4, vec![], TimeLayouts::default());
        let new_schema = vec![ColumnDescriptor::new(
            "value",
            ColumnType::Scalar(ScalarType::Int),
            false,
        )];
        pool.replace_schema(new_schema);
        let unit = pool.submit(message(r#"{"value": 9}"#)).await;
        assert_eq!(unit.msg_row.row.unwrap().len(), 1);
    }
}
