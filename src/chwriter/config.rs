use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    /// Env var holding the HTTP(S) URL, e.g. `http://localhost:8123`.
    pub url_env: String,
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Env var holding the password, if auth is enabled.
    #[serde(default)]
    pub password_env: Option<String>,
    /// `ON CLUSTER <cluster>` for DDL, when the table is replicated.
    #[serde(default)]
    pub cluster: Option<String>,
    /// Distributed table dropped and recreated after a schema change
    /// (spec §4.F.3) so it picks up new columns.
    #[serde(default)]
    pub dist_table_name: Option<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
}

impl ClickHouseConfig {
    pub fn url(&self) -> AppResult<String> {
        env::var(&self.url_env).map_err(|_| {
            AppError::InvalidConfig(format!("environment variable '{}' is not set", self.url_env))
        })
    }

    pub fn password(&self) -> AppResult<Option<String>> {
        match &self.password_env {
            None => Ok(None),
            Some(var) => env::var(var).map(Some).map_err(|_| {
                AppError::InvalidConfig(format!("environment variable '{var}' is not set"))
            }),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.url_env.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "clickhouse.url_env must not be empty".into(),
            ));
        }
        if self.database.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "clickhouse.database must not be empty".into(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "clickhouse.table must not be empty".into(),
            ));
        }
        self.url()?;
        self.password()?;
        Ok(())
    }
}
