//! Sink-wide metrics (ambient stack, spec §9): cfg-gated behind the
//! `metrics` feature the same way the teacher's `ingest/metrics.rs` gates
//! `IngestMetrics`, so the core can be built without pulling in the
//! `prometheus` registry machinery at all.

use crate::error::AppResult;

#[cfg(feature = "metrics")]
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

#[derive(Clone, Debug)]
pub struct SinkMetrics {
    #[cfg(feature = "metrics")]
    registry: Registry,

    #[cfg(feature = "metrics")]
    pub rows_written_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub batches_written_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub parse_errors_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub offset_too_small_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub offset_too_large_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub write_retries_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub reconnects_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub schema_changes_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub ring_depth: IntGauge,
    #[cfg(feature = "metrics")]
    pub write_latency_seconds: Histogram,

    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl SinkMetrics {
    pub fn new() -> AppResult<Self> {
        #[cfg(feature = "metrics")]
        {
            let registry = Registry::new();

            let rows_written_total = IntCounter::with_opts(Opts::new(
                "sink_rows_written_total",
                "Rows successfully written to the destination",
            ))?;
            let batches_written_total = IntCounter::with_opts(Opts::new(
                "sink_batches_written_total",
                "Batches successfully written to the destination",
            ))?;
            let parse_errors_total = IntCounter::with_opts(Opts::new(
                "sink_parse_errors_total",
                "Messages that failed JSON parsing or row mapping",
            ))?;
            let offset_too_small_total = IntCounter::with_opts(Opts::new(
                "sink_offset_too_small_total",
                "Redelivered offsets dropped as already committed",
            ))?;
            let offset_too_large_total = IntCounter::with_opts(Opts::new(
                "sink_offset_too_large_total",
                "Offsets that arrived beyond the ring window",
            ))?;
            let write_retries_total = IntCounter::with_opts(Opts::new(
                "sink_write_retries_total",
                "Retryable write failures observed by the write loop",
            ))?;
            let reconnects_total = IntCounter::with_opts(Opts::new(
                "sink_reconnects_total",
                "Database reconnect attempts triggered by retryable failures",
            ))?;
            let schema_changes_total = IntCounter::with_opts(Opts::new(
                "sink_schema_changes_total",
                "Completed dynamic schema changes",
            ))?;
            let ring_depth = IntGauge::with_opts(Opts::new(
                "sink_ring_depth",
                "Number of active per-partition ring buffers",
            ))?;
            let write_latency_seconds = Histogram::with_opts(HistogramOpts::new(
                "sink_write_latency_seconds",
                "Time spent writing a batch to the destination",
            ))?;

            registry.register(Box::new(rows_written_total.clone()))?;
            registry.register(Box::new(batches_written_total.clone()))?;
            registry.register(Box::new(parse_errors_total.clone()))?;
            registry.register(Box::new(offset_too_small_total.clone()))?;
            registry.register(Box::new(offset_too_large_total.clone()))?;
            registry.register(Box::new(write_retries_total.clone()))?;
            registry.register(Box::new(reconnects_total.clone()))?;
            registry.register(Box::new(schema_changes_total.clone()))?;
            registry.register(Box::new(ring_depth.clone()))?;
            registry.register(Box::new(write_latency_seconds.clone()))?;

            Ok(Self {
                registry,
                rows_written_total,
                batches_written_total,
                parse_errors_total,
                offset_too_small_total,
                offset_too_large_total,
                write_retries_total,
                reconnects_total,
                schema_changes_total,
                ring_depth,
                write_latency_seconds,
            })
        }

        #[cfg(not(feature = "metrics"))]
        {
            Ok(Self { _noop: () })
        }
    }

    #[cfg(feature = "metrics")]
    pub fn encode_text(&self) -> AppResult<String> {
        use prometheus::{Encoder, TextEncoder};
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&mf, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn encode_text(&self) -> AppResult<String> {
        Ok(String::new())
    }

    #[inline]
    pub fn add_rows_written(&self, _n: u64) {
        #[cfg(feature = "metrics")]
        self.rows_written_total.inc_by(_n);
    }

    #[inline]
    pub fn inc_batches_written(&self) {
        #[cfg(feature = "metrics")]
        self.batches_written_total.inc();
    }

    #[inline]
    pub fn inc_parse_error(&self) {
        #[cfg(feature = "metrics")]
        self.parse_errors_total.inc();
    }

    #[inline]
    pub fn inc_offset_too_small(&self) {
        #[cfg(feature = "metrics")]
        self.offset_too_small_total.inc();
    }

    #[inline]
    pub fn inc_offset_too_large(&self) {
        #[cfg(feature = "metrics")]
        self.offset_too_large_total.inc();
    }

    #[inline]
    pub fn inc_write_retry(&self) {
        #[cfg(feature = "metrics")]
        self.write_retries_total.inc();
    }

    #[inline]
    pub fn inc_reconnect(&self) {
        #[cfg(feature = "metrics")]
        self.reconnects_total.inc();
    }

    #[inline]
    pub fn inc_schema_change(&self) {
        #[cfg(feature = "metrics")]
        self.schema_changes_total.inc();
    }

    #[inline]
    pub fn set_ring_depth(&self, _n: i64) {
        #[cfg(feature = "metrics")]
        self.ring_depth.set(_n);
    }

    #[inline]
    pub fn observe_write_latency(&self, _secs: f64) {
        #[cfg(feature = "metrics")]
        self.write_latency_seconds.observe(_secs);
    }
}
