use crate::error::{AppError, AppResult};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9100
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl PrometheusConfig {
    pub fn validate(&self) -> AppResult<()> {
        if !self.metrics_path.starts_with('/') {
            return Err(AppError::InvalidConfig(
                "prometheus.metrics_path must start with '/'".into(),
            ));
        }
        Ok(())
    }
}
