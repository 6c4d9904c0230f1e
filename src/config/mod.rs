//! Top-level configuration (ambient stack, spec §9): TOML file loaded and
//! validated eagerly, mirroring the teacher's `appconfig.rs` /
//! `db/config.rs` split — each sub-config owns its own `validate()`.

use crate::chwriter::ClickHouseConfig;
use crate::error::{AppError, AppResult};
use crate::kafka::KafkaConfig;
use crate::prometheus::PrometheusConfig;
use crate::ring::next_pow2;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicSchemaConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_max_dims")]
    pub max_dims: usize,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub dist_table_name: Option<String>,
}

fn default_max_dims() -> usize {
    512
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub buffer_size: usize,
    pub flush_interval_secs: u64,
    #[serde(default)]
    pub sharding_key: Option<String>,
    #[serde(default)]
    pub dynamic_schema: Option<DynamicSchemaConfig>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    #[serde(default)]
    pub retry_times: usize,
}

impl PipelineConfig {
    /// Rounds a non-power-of-two `buffer_size` up, per spec §6.
    pub fn effective_buffer_size(&self) -> usize {
        next_pow2(self.buffer_size.max(1))
    }

    fn validate(&self) -> AppResult<()> {
        if self.buffer_size == 0 {
            return Err(AppError::InvalidConfig(
                "pipeline.buffer_size must be > 0".into(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(AppError::InvalidConfig(
                "pipeline.flush_interval_secs must be > 0".into(),
            ));
        }
        if let Some(ds) = &self.dynamic_schema {
            if ds.enable && ds.max_dims == 0 {
                return Err(AppError::InvalidConfig(
                    "pipeline.dynamic_schema.max_dims must be > 0 when enabled".into(),
                ));
            }
            if ds.dist_table_name.is_some() && ds.cluster.is_none() {
                return Err(AppError::InvalidConfig(
                    "pipeline.dynamic_schema.dist_table_name requires cluster to be set".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub kafka: KafkaConfig,
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &str) -> AppResult<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.pipeline.validate()?;
        self.kafka.validate()?;
        self.clickhouse.validate()?;
        self.prometheus.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_rounds_up_to_power_of_two() {
        let cfg = PipelineConfig {
            buffer_size: 100,
            flush_interval_secs: 1,
            sharding_key: None,
            dynamic_schema: None,
            exclude_columns: vec![],
            retry_times: 0,
        };
        assert_eq!(cfg.effective_buffer_size(), 128);
    }

    #[test]
    fn dist_table_without_cluster_is_invalid() {
        let cfg = PipelineConfig {
            buffer_size: 8,
            flush_interval_secs: 1,
            sharding_key: None,
            dynamic_schema: Some(DynamicSchemaConfig {
                enable: true,
                max_dims: 10,
                cluster: None,
                dist_table_name: Some("dist".into()),
            }),
            exclude_columns: vec![],
            retry_times: 0,
        };
        assert!(cfg.validate().is_err());
    }
}
