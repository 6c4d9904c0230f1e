pub mod config;
pub mod metrics;
pub mod server;

pub use config::PrometheusConfig;
pub use metrics::SinkMetrics;
pub use server::run_metrics_server;
