use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "streamsink", about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config/streamsink.toml")]
    pub config: String,

    /// Tokio worker threads.
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// Wire the pipeline but never call `ChangeSchema`/DDL — new keys are
    /// still discovered and logged, schema changes are skipped.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
