//! External interfaces (spec §6): the input log driver, the database
//! writer, and the parser. The core depends only on these traits — the
//! concrete `kafka` and `chwriter` modules are adapters, not part of the
//! ordering/batching engine itself.

use crate::batch::Batch;
use crate::error::AppResult;
use crate::model::{ColumnDescriptor, Message, Schema};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Drives message delivery from the partitioned log. `run` pushes every
/// delivered message onto `on_message` until the driver is stopped or
/// cancelled; it never blocks forever on a full channel, since the channel
/// is sized to the configured buffer (spec §5).
#[async_trait]
pub trait Inputer: Send + Sync {
    async fn run(&self, on_message: mpsc::Sender<Message>) -> AppResult<()>;

    /// Records offsets for later commit. Called by the write loop only
    /// after the batch containing them has been durably written (spec
    /// §4.D).
    async fn commit_messages(&self, commit_points: &[(i32, i64)]) -> AppResult<()>;

    async fn stop(&self) -> AppResult<()>;
}

/// The database-facing side of the write loop (spec §6). `send` is
/// fire-and-forget into the writer pool; `init` builds the prepared
/// insert once by introspecting the destination schema.
#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn init(&self) -> AppResult<()>;

    async fn write(&self, batch: &Batch) -> AppResult<()>;

    async fn change_schema(&self, new_cols: &[ColumnDescriptor]) -> AppResult<()>;

    async fn stop(&self) -> AppResult<()>;

    /// The destination's current typed column set, as of the last `init`
    /// or `change_schema` call — used to reseed the parser pool after a
    /// schema change (spec §4.F.5).
    fn current_schema(&self) -> Schema;
}

/// A typed key/value view over a parsed message, used by the schema
/// controller to enumerate top-level keys when discovering new ones
/// (spec §4.F). `parse::json` is the concrete implementation backed by
/// `serde_json`; this trait exists so the controller is not tied to a
/// specific JSON crate.
pub trait ParsedView {
    fn keys(&self) -> Vec<String>;
    fn has_key(&self, key: &str) -> bool;
}

impl ParsedView for serde_json::Value {
    fn keys(&self) -> Vec<String> {
        match self.as_object() {
            Some(map) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
