//! Dynamic-schema controller (spec §4.F): detects unknown JSON keys,
//! quiesces ingestion, and builds the additive DDL for a schema change.

use crate::model::{ColumnDescriptor, ColumnType, ScalarType, Schema};
use crate::parse::infer_scalar_type;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One accepted schema change, ready for DDL generation.
#[derive(Debug, Clone)]
pub struct PendingColumn {
    pub name: String,
    pub ty: ScalarType,
}

pub struct SchemaController {
    /// Keys already in the schema, or explicitly excluded — never
    /// re-triggers discovery.
    known: DashMap<String, ()>,
    /// Keys discovered since the last `finish`, pending DDL.
    new: DashMap<String, ScalarType>,
    cnt_new: AtomicUsize,
    max_dims: usize,
}

impl SchemaController {
    pub fn new(initial_known: impl IntoIterator<Item = String>, max_dims: usize) -> Self {
        let known = DashMap::new();
        for key in initial_known {
            known.insert(key, ());
        }
        Self {
            known,
            new: DashMap::new(),
            cnt_new: AtomicUsize::new(0),
            max_dims,
        }
    }

    pub fn add_excluded(&self, key: impl Into<String>) {
        self.known.insert(key.into(), ());
    }

    /// True while a schema change is in progress: new messages must skip
    /// `PutElem` (spec §4.F Quiescence), though their JSON is still
    /// inspected for further new keys.
    pub fn is_quiescing(&self) -> bool {
        self.cnt_new.load(Ordering::Acquire) > 0
    }

    /// Examines one parsed message's top-level keys. Returns `true` the
    /// first time a new key is discovered (atomic increment returns 1) —
    /// the caller should drain rings/sharder and schedule `change_schema`
    /// exactly once per discovery window.
    pub fn observe(&self, json: &serde_json::Value) -> bool {
        let Some(obj) = json.as_object() else {
            return false;
        };
        let mut first_trigger = false;
        for (key, value) in obj {
            if self.known.contains_key(key) {
                continue;
            }
            let Some(tag) = infer_scalar_type(value) else {
                tracing::warn!(key, "unrecognised type for new key, ignoring");
                continue;
            };
            // entry() avoids a race where two workers both see "missing"
            // and both count as first.
            let inserted = self.new.insert(key.clone(), tag).is_none();
            self.known.insert(key.clone(), ());
            if inserted && self.cnt_new.fetch_add(1, Ordering::AcqRel) == 0 {
                first_trigger = true;
            }
        }
        first_trigger
    }

    /// Applies the `maxDims` quota and returns the accepted columns plus a
    /// count of how many were dropped for exceeding it (spec §4.F.1).
    pub fn drain_for_ddl(&self, current_schema_len: usize) -> (Vec<PendingColumn>, usize) {
        let budget = self.max_dims.saturating_sub(current_schema_len);
        let mut all: Vec<PendingColumn> = self
            .new
            .iter()
            .map(|e| PendingColumn {
                name: e.key().clone(),
                ty: *e.value(),
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        let dropped = all.len().saturating_sub(budget);
        if dropped > 0 {
            for col in &all[budget..] {
                tracing::warn!(key = %col.name, "dropping new column: maxDims quota exceeded");
            }
        }
        all.truncate(budget);
        (all, dropped)
    }

    /// Called once `change_schema` has committed and the supervisor has
    /// re-initialised: resets quiescence so ingestion resumes.
    pub fn finish(&self) {
        self.new.clear();
        self.cnt_new.store(0, Ordering::Release);
    }
}

pub fn pending_to_descriptors(pending: &[PendingColumn]) -> Schema {
    pending
        .iter()
        .map(|p| ColumnDescriptor::new(p.name.clone(), ColumnType::Scalar(p.ty), true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_new_key_triggers_once() {
        let ctrl = SchemaController::new(["time".to_string()], 100);
        assert!(ctrl.observe(&json!({"time": 1, "extra": 5})));
        assert!(ctrl.is_quiescing());
        // A second message with a different new key does not re-trigger
        // the "first discovery" signal, but is still recorded.
        assert!(!ctrl.observe(&json!({"time": 1, "extra2": "x"})));
        let (cols, dropped) = ctrl.drain_for_ddl(1);
        assert_eq!(dropped, 0);
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn known_keys_never_retrigger() {
        let ctrl = SchemaController::new(["time".to_string(), "extra".to_string()], 100);
        assert!(!ctrl.observe(&json!({"time": 1, "extra": 5})));
        assert!(!ctrl.is_quiescing());
    }

    #[test]
    fn max_dims_quota_drops_excess_columns() {
        let ctrl = SchemaController::new([], 2);
        ctrl.observe(&json!({"a": 1, "b": 2, "c": 3}));
        let (cols, dropped) = ctrl.drain_for_ddl(0);
        assert_eq!(cols.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn finish_resets_quiescence() {
        let ctrl = SchemaController::new([], 100);
        ctrl.observe(&json!({"a": 1}));
        assert!(ctrl.is_quiescing());
        ctrl.finish();
        assert!(!ctrl.is_quiescing());
    }
}
