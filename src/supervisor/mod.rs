//! Task supervisor (spec §4.G): wires the parsing pool, rings, sharder,
//! schema controller and write loop together, and owns their lifecycle.

use crate::batch::Batch;
use crate::error::AppResult;
use crate::fault::{Fault, FaultReceiver, FaultSender, fault_channel};
use crate::interfaces::{Inputer, OutputWriter};
use crate::model::{Message, MsgRow, Schema};
use crate::parse::{ParsedUnit, ParserPool, TimeLayouts};
use crate::prometheus::SinkMetrics;
use crate::ratelimit::TaskLimiters;
use crate::ring::{PutOutcome, Ring, RingEmission};
use crate::schema::{SchemaController, pending_to_descriptors};
use crate::sharder::ShardRouter;
use crate::writer::{WriteLoopMetrics, run_writer_worker};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    New = 0,
    Initialised = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

/// Routes a batch to one of `writer_workers` per-worker channels by
/// `batch.conn_index` (spec §4.D, §5), so each writer task owns a disjoint
/// slice of the stream without a shared locked queue between them.
#[derive(Clone)]
struct BatchRouter {
    senders: Arc<Vec<mpsc::Sender<Batch>>>,
}

impl BatchRouter {
    fn new(senders: Vec<mpsc::Sender<Batch>>) -> Self {
        Self {
            senders: Arc::new(senders),
        }
    }

    async fn send(&self, batch: Batch) {
        let idx = batch.conn_index(self.senders.len());
        let _ = self.senders[idx].send(batch).await;
    }
}

pub struct SupervisorConfig {
    pub buffer_size: usize,
    pub flush_interval: Duration,
    pub sharding_key: Option<String>,
    pub dynamic_schema_enable: bool,
    pub max_dims: usize,
    pub exclude_columns: Vec<String>,
    pub retry_times: usize,
    pub writer_workers: usize,
    pub dry_run: bool,
}

/// Wires components A-F (spec §2) and owns their shared state: the
/// per-partition rings, the optional sharder, the schema controller, and
/// the writer pool. `rings` is a `DashMap<i32, Arc<Ring>>` (per the open
/// question in spec.md §9): a reader clones the `Arc` under the map's
/// shard lock, so it always holds a strong reference rather than
/// dereferencing a slot that could be torn down underneath it.
pub struct TaskSupervisor {
    cfg: SupervisorConfig,
    input: Arc<dyn Inputer>,
    output: Arc<dyn OutputWriter>,
    parser_pool: Arc<ParserPool>,
    schema_ctrl: Arc<SchemaController>,
    sharder: Option<Arc<ShardRouter>>,
    rings: Arc<DashMap<i32, Arc<Ring>>>,
    limiters: Arc<TaskLimiters>,
    metrics: Arc<SinkMetrics>,
    cancel: CancellationToken,
    state: AtomicU8,
}

impl TaskSupervisor {
    pub fn new(
        cfg: SupervisorConfig,
        input: Arc<dyn Inputer>,
        output: Arc<dyn OutputWriter>,
        initial_schema: Schema,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        let known_keys = initial_schema.iter().map(|c| c.source_key.clone());
        let schema_ctrl = Arc::new(SchemaController::new(known_keys, cfg.max_dims));
        for excluded in &cfg.exclude_columns {
            schema_ctrl.add_excluded(excluded);
        }

        let sharder = cfg
            .sharding_key
            .as_ref()
            .map(|key| Arc::new(ShardRouter::new(key.clone(), cfg.buffer_size)));

        let parser_pool = Arc::new(ParserPool::new(
            num_cpus(),
            initial_schema,
            TimeLayouts::default(),
        ));

        Self {
            cfg,
            input,
            output,
            parser_pool,
            schema_ctrl,
            sharder,
            rings: Arc::new(DashMap::new()),
            limiters: Arc::new(TaskLimiters::new()),
            metrics,
            cancel: CancellationToken::new(),
            state: AtomicU8::new(TaskState::New as u8),
        }
    }

    pub fn state(&self) -> TaskState {
        match self.state.load(Ordering::Acquire) {
            0 => TaskState::New,
            1 => TaskState::Initialised,
            2 => TaskState::Running,
            3 => TaskState::Stopping,
            _ => TaskState::Stopped,
        }
    }

    fn set_state(&self, s: TaskState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// `Init` (spec §4.G): prepares the output writer's column introspection.
    /// May be re-entered after `Stop` during a schema-change restart.
    pub async fn init(&self) -> AppResult<()> {
        self.output.init().await?;
        self.set_state(TaskState::Initialised);
        Ok(())
    }

    /// `NotifyStop`: cancels immediately without waiting.
    pub fn notify_stop(&self) {
        self.cancel.cancel();
    }

    /// `Run` (spec §4.G): starts the input driver, the message-processing
    /// loop, the flush timer, and the writer pool; returns once the fault
    /// channel reports a fatal condition or the cancellation token fires.
    pub async fn run(self: &Arc<Self>) -> AppResult<()> {
        self.set_state(TaskState::Running);

        let (msg_tx, msg_rx) = mpsc::channel::<Message>(32);
        let (faults, mut fault_rx) = fault_channel();

        let writer_workers = self.cfg.writer_workers.max(1);
        let mut batch_senders = Vec::with_capacity(writer_workers);
        let mut batch_receivers = Vec::with_capacity(writer_workers);
        for _ in 0..writer_workers {
            let (tx, rx) = mpsc::channel::<Batch>(32);
            batch_senders.push(tx);
            batch_receivers.push(rx);
        }
        let router = BatchRouter::new(batch_senders);

        let input = self.input.clone();
        let input_cancel = self.cancel.clone();
        let input_handle = tokio::spawn(async move {
            tokio::select! {
                _ = input_cancel.cancelled() => {}
                res = input.run(msg_tx) => {
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "input driver stopped");
                    }
                }
            }
        });

        let process_handle = {
            let this = self.clone();
            let faults = faults.clone();
            let router = router.clone();
            tokio::spawn(async move { this.process_messages(msg_rx, router, faults).await })
        };

        let flush_handle = {
            let this = self.clone();
            let router = router.clone();
            tokio::spawn(async move { this.flush_timer(router).await })
        };

        let mut writer_handles = Vec::new();
        for rx in batch_receivers {
            let output = self.output.clone();
            let input = self.input.clone();
            let retry_times = self.cfg.retry_times;
            let faults = faults.clone();
            let wl_metrics = WriteLoopMetrics::default();
            let sink_metrics = self.metrics.clone();
            writer_handles.push(tokio::spawn(async move {
                run_writer_worker(rx, output, input, retry_times, faults, wl_metrics, sink_metrics).await;
            }));
        }

        let fault = tokio::select! {
            _ = self.cancel.cancelled() => None,
            f = fault_rx.recv() => f,
        };

        self.set_state(TaskState::Stopping);
        self.cancel.cancel();
        let _ = input_handle.await;
        let _ = process_handle.await;
        flush_handle.abort();
        for h in writer_handles {
            h.abort();
        }
        self.set_state(TaskState::Stopped);

        match fault {
            Some(f) => Err(f.into_error()),
            None => Ok(()),
        }
    }

    /// `Stop` (spec §4.G): cancels, tears down input/output, waits for
    /// everything spawned by `run` to unwind.
    pub async fn stop(&self) -> AppResult<()> {
        self.cancel.cancel();
        self.input.stop().await?;
        self.output.stop().await?;
        self.set_state(TaskState::Stopped);
        Ok(())
    }

    async fn process_messages(
        self: Arc<Self>,
        mut msg_rx: mpsc::Receiver<Message>,
        router: BatchRouter,
        faults: FaultSender,
    ) {
        while let Some(message) = msg_rx.recv().await {
            let unit = self.parser_pool.submit(message).await;
            self.observe_and_maybe_trigger_schema_change(&unit, &router, &faults)
                .await;

            if let Some(e) = &unit.array_error {
                tracing::error!(error = %e, "unsupported array element type");
                self.metrics.inc_parse_error();
            }
            if unit.msg_row.row.is_none() && unit.array_error.is_none() {
                self.metrics.inc_parse_error();
                if self.limiters.parse_errors.allow() {
                    tracing::warn!(
                        partition = unit.msg_row.partition(),
                        offset = unit.msg_row.offset(),
                        "failed to parse message"
                    );
                }
            }

            if self.schema_ctrl.is_quiescing() {
                continue;
            }

            self.put_and_route(unit.msg_row, &router).await;
        }
    }

    async fn observe_and_maybe_trigger_schema_change(
        &self,
        unit: &ParsedUnit,
        router: &BatchRouter,
        faults: &FaultSender,
    ) {
        if !self.cfg.dynamic_schema_enable || self.cfg.dry_run {
            return;
        }
        let Some(json) = &unit.json else {
            return;
        };
        if !self.schema_ctrl.observe(json) {
            return;
        }

        tracing::info!("new schema key discovered, draining rings before schema change");
        for entry in self.rings.iter() {
            if let Some(emission) = entry.value().force_batch_or_shard(true).await {
                self.route_emission(emission, router).await;
            }
        }
        if let Some(sharder) = &self.sharder {
            for batch in sharder.force_flush().await {
                router.send(batch).await;
            }
        }

        let flush_interval = self.cfg.flush_interval;
        let output = self.output.clone();
        let schema_ctrl_new = self.schema_ctrl.clone();
        let parser_pool = self.parser_pool.clone();
        let faults = faults.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            tokio::time::sleep(flush_interval).await;
            let current_len = parser_pool.current_schema().len();
            let (pending, dropped) = schema_ctrl_new.drain_for_ddl(current_len);
            if dropped > 0 {
                tracing::warn!(dropped, "columns dropped by maxDims quota");
            }
            let descriptors = pending_to_descriptors(&pending);
            if let Err(e) = output.change_schema(&descriptors).await {
                faults.report(Fault::SchemaChangeFatal(e)).await;
                return;
            }
            // Re-introspect rather than append locally: the destination is
            // the source of truth for the post-DDL column list (spec
            // §4.F.5), and this also picks up anything the DDL itself
            // normalized (e.g. nullability wrappers).
            if let Err(e) = output.init().await {
                faults.report(Fault::SchemaChangeFatal(e)).await;
                return;
            }
            parser_pool.replace_schema(output.current_schema());

            metrics.inc_schema_change();
            schema_ctrl_new.finish();
        });
    }

    async fn put_and_route(&self, msg_row: MsgRow, router: &BatchRouter) {
        let partition = msg_row.partition();
        let ring = self
            .rings
            .entry(partition)
            .or_insert_with(|| Arc::new(Ring::new(partition, self.cfg.buffer_size)))
            .clone();

        match ring.put_elem(msg_row).await {
            PutOutcome::TooSmall => {
                self.metrics.inc_offset_too_small();
                if self.limiters.offset_too_small.allow() {
                    tracing::warn!(partition, "dropped redelivered offset below filled");
                }
            }
            PutOutcome::WindowFull => {
                self.metrics.inc_offset_too_large();
                if self.limiters.offset_too_large.allow() {
                    tracing::warn!(partition, "ring window full, forcing flush");
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                if let Some(emission) = ring.force_batch_or_shard(true).await {
                    self.route_emission(emission, router).await;
                }
            }
            PutOutcome::Placed => {
                if let Some(emission) = ring.force_batch_or_shard(false).await {
                    self.route_emission(emission, router).await;
                }
            }
        }
    }

    async fn route_emission(&self, emission: RingEmission, router: &BatchRouter) {
        if let Some(sharder) = &self.sharder {
            let schema = self.parser_pool.current_schema();
            for batch in sharder.route(&schema, emission).await {
                router.send(batch).await;
            }
        } else {
            let batch = batch_from_emission(emission);
            if !batch.is_empty() {
                router.send(batch).await;
            }
        }
    }

    async fn flush_timer(self: Arc<Self>, router: BatchRouter) {
        let mut ticker = tokio::time::interval(self.cfg.flush_interval);
        loop {
            ticker.tick().await;
            if self.cancel.is_cancelled() {
                return;
            }
            for entry in self.rings.iter() {
                entry.value().tick_idle().await;
                if let Some(emission) = entry.value().force_batch_or_shard(true).await {
                    self.route_emission(emission, &router).await;
                }
            }
            if let Some(sharder) = &self.sharder {
                for batch in sharder.force_flush().await {
                    router.send(batch).await;
                }
            }
            self.metrics.set_ring_depth(self.rings.len() as i64);
        }
    }
}

fn batch_from_emission(emission: RingEmission) -> Batch {
    let mut rows = Vec::with_capacity(emission.msgrows.len());
    let mut commit_points = Vec::with_capacity(emission.msgrows.len());
    for msg_row in emission.msgrows {
        commit_points.push(msg_row.message.key());
        if let Some(row) = msg_row.row {
            rows.push(row);
        }
    }
    Batch::new(rows, commit_points)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
