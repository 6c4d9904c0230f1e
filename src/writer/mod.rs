//! Write loop (spec §4.E): submits batches to the database, retries
//! retryable failures with a reconnect-and-backoff cycle, and commits
//! input offsets only once a write has durably succeeded.

use crate::batch::Batch;
use crate::error::AppError;
use crate::fault::{Fault, FaultSender};
use crate::interfaces::{Inputer, OutputWriter};
use crate::prometheus::SinkMetrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const RETRY_SLEEP: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
pub struct WriteLoopMetrics {
    pub reconnects: Arc<AtomicU64>,
    pub retries: Arc<AtomicU64>,
    pub batches_written: Arc<AtomicU64>,
}

/// Pulls batches off `rx` and runs them through `loop_write` one at a
/// time — callers spawn one of these per writer-pool worker, striped by
/// `batch.conn_index` upstream of the channel (spec §5).
pub async fn run_writer_worker(
    mut rx: mpsc::Receiver<Batch>,
    writer: Arc<dyn OutputWriter>,
    input: Arc<dyn Inputer>,
    retry_times: usize,
    faults: FaultSender,
    metrics: WriteLoopMetrics,
    sink_metrics: Arc<SinkMetrics>,
) {
    while let Some(batch) = rx.recv().await {
        loop_write(&batch, &writer, &input, retry_times, &faults, &metrics, &sink_metrics).await;
    }
}

async fn loop_write(
    batch: &Batch,
    writer: &Arc<dyn OutputWriter>,
    input: &Arc<dyn Inputer>,
    retry_times: usize,
    faults: &FaultSender,
    metrics: &WriteLoopMetrics,
    sink_metrics: &Arc<SinkMetrics>,
) {
    let mut attempts = 0usize;
    loop {
        let started = Instant::now();
        match writer.write(batch).await {
            Ok(()) => {
                sink_metrics.observe_write_latency(started.elapsed().as_secs_f64());
                metrics.batches_written.fetch_add(1, Ordering::Relaxed);
                sink_metrics.inc_batches_written();
                sink_metrics.add_rows_written(batch.rows.len() as u64);
                match input.commit_messages(&batch.commit_points).await {
                    Ok(()) => return,
                    Err(AppError::Shutdown) => {
                        tracing::info!(batch_idx = batch.batch_idx, "shutdown during commit, batch left uncommitted");
                        return;
                    }
                    Err(e) => {
                        faults.report(Fault::WriteFatal(e)).await;
                        return;
                    }
                }
            }
            Err(AppError::Shutdown) => {
                tracing::info!(batch_idx = batch.batch_idx, "shutdown during write, batch abandoned");
                return;
            }
            Err(e) if e.is_retryable_db_error() => {
                metrics.retries.fetch_add(1, Ordering::Relaxed);
                metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                sink_metrics.inc_write_retry();
                sink_metrics.inc_reconnect();
                tracing::warn!(batch_idx = batch.batch_idx, error = %e, attempt = attempts, "retryable write failure, reconnecting");
                attempts += 1;
                if retry_times > 0 && attempts >= retry_times {
                    faults
                        .report(Fault::WriteFatal(AppError::DbRetryable(format!(
                            "exhausted {retry_times} retries: {e}"
                        ))))
                        .await;
                    return;
                }
                tokio::time::sleep(RETRY_SLEEP).await;
            }
            Err(e) => {
                faults.report(Fault::WriteFatal(e)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::fault::fault_channel;
    use crate::model::{ColumnDescriptor, Message};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeWriter {
        fail_times: StdMutex<usize>,
        writes: Arc<AtomicU64>,
    }

    #[async_trait]
    impl OutputWriter for FakeWriter {
        async fn init(&self) -> AppResult<()> {
            Ok(())
        }
        async fn write(&self, _batch: &Batch) -> AppResult<()> {
            let mut fail = self.fail_times.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(AppError::DbRetryable("connection refused".into()));
            }
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn change_schema(&self, _new_cols: &[ColumnDescriptor]) -> AppResult<()> {
            Ok(())
        }
        async fn stop(&self) -> AppResult<()> {
            Ok(())
        }
        fn current_schema(&self) -> crate::model::Schema {
            vec![]
        }
    }

    struct FakeInput {
        committed: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Inputer for FakeInput {
        async fn run(&self, _on_message: mpsc::Sender<Message>) -> AppResult<()> {
            Ok(())
        }
        async fn commit_messages(&self, commit_points: &[(i32, i64)]) -> AppResult<()> {
            self.committed
                .fetch_add(commit_points.len() as u64, Ordering::Relaxed);
            Ok(())
        }
        async fn stop(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_and_commits_once() {
        // spec S6: two connection-refused failures, then a success.
        let writes = Arc::new(AtomicU64::new(0));
        let committed = Arc::new(AtomicU64::new(0));
        let writer: Arc<dyn OutputWriter> = Arc::new(FakeWriter {
            fail_times: StdMutex::new(2),
            writes: writes.clone(),
        });
        let input: Arc<dyn Inputer> = Arc::new(FakeInput {
            committed: committed.clone(),
        });
        let (faults, _rx) = fault_channel();
        let metrics = WriteLoopMetrics::default();
        let sink_metrics = Arc::new(SinkMetrics::new().unwrap());
        let batch = Batch::new(vec![], vec![(0, 0), (0, 1)]);

        loop_write(&batch, &writer, &input, 5, &faults, &metrics, &sink_metrics).await;

        assert_eq!(writes.load(Ordering::Relaxed), 1);
        assert_eq!(committed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.reconnects.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_reports_fatal_after_retry_times_attempts() {
        let writer: Arc<dyn OutputWriter> = Arc::new(FakeWriter {
            fail_times: StdMutex::new(10),
            writes: Arc::new(AtomicU64::new(0)),
        });
        let input: Arc<dyn Inputer> = Arc::new(FakeInput {
            committed: Arc::new(AtomicU64::new(0)),
        });
        let (faults, mut rx) = fault_channel();
        let metrics = WriteLoopMetrics::default();
        let sink_metrics = Arc::new(SinkMetrics::new().unwrap());
        let batch = Batch::new(vec![], vec![(0, 0)]);

        loop_write(&batch, &writer, &input, 2, &faults, &metrics, &sink_metrics).await;

        assert!(rx.recv().await.is_some());
        assert_eq!(metrics.retries.load(Ordering::Relaxed), 2);
    }
}
