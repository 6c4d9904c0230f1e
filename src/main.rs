//! Binary entrypoint: parses the CLI, loads and validates config,
//! wires the Kafka input, ClickHouse output and task supervisor
//! together, and serves `/metrics` alongside the pipeline.
//!
//! This is the only place in the crate allowed to call
//! `std::process::exit` — library code reports failures through the
//! fault channel (spec §9) and lets this function decide the exit code.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use streamsink::chwriter::ClickHouseWriter;
use streamsink::cli::Cli;
use streamsink::config::AppConfig;
use streamsink::interfaces::{Inputer, OutputWriter};
use streamsink::kafka::KafkaInput;
use streamsink::prometheus::{SinkMetrics, run_metrics_server};
use streamsink::supervisor::{SupervisorConfig, TaskSupervisor};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers.max(1))
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let cfg = match AppConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config '{}': {e}", cli.config);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cfg.logging.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(config = %cli.config, workers = cli.workers, dry_run = cli.dry_run, "starting");

    let metrics = match SinkMetrics::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::error!(error = %e, "failed to register metrics");
            return ExitCode::FAILURE;
        }
    };

    let output = match ClickHouseWriter::new(cfg.clickhouse.clone()) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct clickhouse writer");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = output.init().await {
        tracing::error!(error = %e, "failed to introspect destination schema");
        return ExitCode::FAILURE;
    }
    let initial_schema = output.current_schema();

    let input_shutdown = CancellationToken::new();
    let input = match KafkaInput::new(&cfg.kafka, input_shutdown.clone()) {
        Ok(i) => i,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct kafka input");
            return ExitCode::FAILURE;
        }
    };

    let dynamic_schema = cfg.pipeline.dynamic_schema.clone();
    let supervisor_cfg = SupervisorConfig {
        buffer_size: cfg.pipeline.effective_buffer_size(),
        flush_interval: Duration::from_secs(cfg.pipeline.flush_interval_secs),
        sharding_key: cfg.pipeline.sharding_key.clone(),
        dynamic_schema_enable: dynamic_schema.as_ref().is_some_and(|d| d.enable),
        max_dims: dynamic_schema.as_ref().map(|d| d.max_dims).unwrap_or(0),
        exclude_columns: cfg.pipeline.exclude_columns.clone(),
        retry_times: cfg.pipeline.retry_times,
        writer_workers: cli.workers.max(1),
        dry_run: cli.dry_run,
    };

    let supervisor = Arc::new(TaskSupervisor::new(
        supervisor_cfg,
        Arc::new(input) as Arc<dyn Inputer>,
        Arc::new(output) as Arc<dyn OutputWriter>,
        initial_schema,
        metrics.clone(),
    ));

    if let Err(e) = supervisor.init().await {
        tracing::error!(error = %e, "supervisor init failed");
        return ExitCode::FAILURE;
    }

    let metrics_server = {
        let cfg = cfg.prometheus.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(cfg, move || metrics.encode_text()).await {
                tracing::error!(error = %e, "metrics server stopped");
            }
        })
    };

    let result = supervisor.run().await;
    metrics_server.abort();

    match result {
        Ok(()) => {
            tracing::info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal fault, exiting");
            ExitCode::FAILURE
        }
    }
}
