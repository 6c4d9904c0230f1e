use thiserror::Error;

/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Input (partitioned log)
    // =========
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    // =========
    // Output (columnar database)
    // =========
    #[error("Database error: {0}")]
    Db(#[from] clickhouse::error::Error),

    /// A database failure already classified as transient by the caller
    /// (connection refused / bad connection), independent of how the
    /// underlying driver phrased it.
    #[error("Database error is retryable: {0}")]
    DbRetryable(String),

    // =========
    // Serialization / deserialization
    // =========
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    // =========
    // Metrics / Prometheus
    // =========
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    // =========
    // Schema / rows
    // =========
    #[error("Unsupported array element type for column '{0}'")]
    UnsupportedArrayElement(String),

    #[error("Unrecognised value type for new key '{0}'")]
    UnrecognisedKeyType(String),

    #[error("Schema change failed: {0}")]
    SchemaChange(String),

    // =========
    // Pipeline / lifecycle
    // =========
    #[error("Ring buffer window exhausted for partition {partition} (offset {offset})")]
    RingWindowFull { partition: i32, offset: i64 },

    #[error("Failed to spawn task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Shutdown requested")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this is a transient database condition the write loop should
    /// retry (spec §4.E / §7) rather than one that should fatally abort the
    /// batch: connection refused or a stale/bad connection, as opposed to a
    /// malformed statement or an unexpected commit failure.
    pub fn is_retryable_db_error(&self) -> bool {
        match self {
            AppError::DbRetryable(_) => true,
            AppError::Db(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("connection refused") || msg.contains("bad connection")
            }
            _ => false,
        }
    }
}
