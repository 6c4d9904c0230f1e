use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Name of the environment variable holding the comma-separated
    /// broker list (mirrors the teacher's `dsn_env` indirection so
    /// secrets/endpoints don't live in the TOML file).
    pub brokers_env: String,
    pub group_id: String,
    pub topic: String,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

impl KafkaConfig {
    pub fn brokers(&self) -> AppResult<String> {
        env::var(&self.brokers_env).map_err(|_| {
            AppError::InvalidConfig(format!(
                "environment variable '{}' is not set",
                self.brokers_env
            ))
        })
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.brokers_env.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "kafka.brokers_env must not be empty".into(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "kafka.group_id must not be empty".into(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "kafka.topic must not be empty".into(),
            ));
        }
        if self.session_timeout_ms == 0 {
            return Err(AppError::InvalidConfig(
                "kafka.session_timeout_ms must be > 0".into(),
            ));
        }
        self.brokers()?;
        Ok(())
    }
}
