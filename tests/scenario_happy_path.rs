//! S1 — happy path (SPEC_FULL.md §8): a fixed schema, no dynamic
//! discovery, no sharding; every delivered message ends up committed
//! exactly once and every row reaches the writer.

mod common;

use common::{message, FakeInputer, FakeOutputWriter};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use streamsink::interfaces::{Inputer, OutputWriter};
use streamsink::model::{ColumnDescriptor, ColumnType, ScalarType};
use streamsink::prometheus::SinkMetrics;
use streamsink::supervisor::{SupervisorConfig, TaskSupervisor};

const PARTITIONS: i32 = 4;
const PER_PARTITION: i64 = 50;

#[tokio::test]
async fn all_messages_committed_exactly_once_with_fixed_schema() {
    let mut messages = Vec::new();
    for partition in 0..PARTITIONS {
        for offset in 0..PER_PARTITION {
            let payload = format!(r#"{{"name": "n{offset}", "value": {offset}.5}}"#);
            messages.push(message(partition, offset, &payload));
        }
    }

    let input = FakeInputer::with_messages(messages);
    let committed = input.committed.clone();
    let output = Arc::new(FakeOutputWriter::new());
    let rows_written = output.rows_written.clone();

    let schema = vec![
        ColumnDescriptor::new("name", ColumnType::Scalar(ScalarType::String), false),
        ColumnDescriptor::new("value", ColumnType::Scalar(ScalarType::Float), false),
    ];

    let cfg = SupervisorConfig {
        buffer_size: 16,
        flush_interval: Duration::from_millis(20),
        sharding_key: None,
        dynamic_schema_enable: false,
        max_dims: 0,
        exclude_columns: vec![],
        retry_times: 0,
        writer_workers: 2,
        dry_run: false,
    };

    let supervisor = Arc::new(TaskSupervisor::new(
        cfg,
        input.clone() as Arc<dyn Inputer>,
        output.clone() as Arc<dyn OutputWriter>,
        schema,
        Arc::new(SinkMetrics::new().unwrap()),
    ));

    supervisor.init().await.unwrap();
    let run_handle = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    // Give the flush timer several ticks to drain every partition's ring.
    tokio::time::sleep(Duration::from_millis(500)).await;
    supervisor.notify_stop();
    let result = run_handle.await.unwrap();
    assert!(result.is_ok());

    let total = (PARTITIONS as i64 * PER_PARTITION) as u64;
    assert_eq!(rows_written.load(Ordering::Relaxed), total);

    let commit_points = committed.lock().unwrap();
    assert_eq!(commit_points.len() as u64, total);

    // Invariant 3 (no split offsets): every (partition, offset) appears
    // exactly once across all commits.
    let unique: HashSet<_> = commit_points.iter().cloned().collect();
    assert_eq!(unique.len(), commit_points.len());
    for partition in 0..PARTITIONS {
        for offset in 0..PER_PARTITION {
            assert!(unique.contains(&(partition, offset)));
        }
    }
}
