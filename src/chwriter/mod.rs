//! ClickHouse-backed `OutputWriter` (spec §6): builds its column list at
//! `init` by introspecting `system.columns`, and executes the additive
//! DDL a schema change produces.
//!
//! The destination schema is only known at runtime (it can grow while the
//! process is up), so rows are inserted as a single `INSERT ... VALUES`
//! statement with literal, escaped values rather than through the
//! `clickhouse` crate's typed `Row`-derive insert path, which needs the
//! column set fixed at compile time.

mod config;

pub use config::ClickHouseConfig;

use crate::batch::Batch;
use crate::error::{AppError, AppResult};
use crate::interfaces::OutputWriter;
use crate::model::{ColumnDescriptor, ColumnType, Row, ScalarType, Schema, Value};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use clickhouse::Row as ChRow;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, ChRow, Deserialize)]
struct SystemColumnRow {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    default_kind: String,
}

pub struct ClickHouseWriter {
    client: clickhouse::Client,
    cfg: ClickHouseConfig,
    /// Column names in insert order, excluding materialised and
    /// user-excluded columns.
    columns: ArcSwap<Vec<String>>,
    /// Same columns, typed — the seed schema handed to the parser pool.
    schema: ArcSwap<Schema>,
}

/// Maps a ClickHouse type string (e.g. `Nullable(Int64)`,
/// `LowCardinality(String)`, `Nullable(LowCardinality(String))`) back to our
/// [`ColumnType`]. Falls back to `String` for anything we don't recognise,
/// since the column still round-trips as text.
fn column_type_from_sql(type_name: &str) -> (ColumnType, bool) {
    let mut nullable = false;
    let mut inner = type_name;
    loop {
        if let Some(rest) = inner.strip_prefix("Nullable(") {
            nullable = true;
            inner = rest.strip_suffix(')').unwrap_or(rest);
            continue;
        }
        if let Some(rest) = inner.strip_prefix("LowCardinality(") {
            inner = rest.strip_suffix(')').unwrap_or(rest);
            continue;
        }
        break;
    }
    let ty = if let Some(elem) = inner.strip_prefix("Array(").and_then(|s| s.strip_suffix(')')) {
        match elem {
            "Int64" | "Int32" | "Int16" | "Int8" | "UInt64" | "UInt32" | "UInt16" | "UInt8" => {
                ColumnType::ArrayInt
            }
            "Float64" | "Float32" => ColumnType::ArrayFloat,
            _ => ColumnType::ArrayString,
        }
    } else {
        match inner {
            "Int64" | "Int32" | "Int16" | "Int8" | "UInt64" | "UInt32" | "UInt16" | "UInt8" => {
                ColumnType::Scalar(ScalarType::Int)
            }
            "Float64" | "Float32" => ColumnType::Scalar(ScalarType::Float),
            "Date" => ColumnType::Scalar(ScalarType::Date),
            s if s.starts_with("DateTime64") => ColumnType::Scalar(ScalarType::DateTime64),
            "DateTime" => ColumnType::Scalar(ScalarType::DateTime),
            _ => ColumnType::Scalar(ScalarType::String),
        }
    };
    (ty, nullable)
}

impl ClickHouseWriter {
    pub fn new(cfg: ClickHouseConfig) -> AppResult<Self> {
        let url = cfg.url()?;
        let mut client = clickhouse::Client::default()
            .with_url(&url)
            .with_database(&cfg.database);
        if let Some(user) = &cfg.user {
            client = client.with_user(user);
        }
        if let Some(password) = cfg.password()? {
            client = client.with_password(password);
        }
        Ok(Self {
            client,
            cfg,
            columns: ArcSwap::from_pointee(Vec::new()),
            schema: ArcSwap::from_pointee(Vec::new()),
        })
    }

    fn on_cluster(&self) -> String {
        match &self.cfg.cluster {
            Some(c) => format!(" ON CLUSTER {c}"),
            None => String::new(),
        }
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.cfg.database, self.cfg.table)
    }
}

#[async_trait]
impl OutputWriter for ClickHouseWriter {
    async fn init(&self) -> AppResult<()> {
        let rows: Vec<SystemColumnRow> = self
            .client
            .query(
                "SELECT name, type, default_kind FROM system.columns \
                 WHERE database = ? AND table = ?",
            )
            .bind(&self.cfg.database)
            .bind(&self.cfg.table)
            .fetch_all()
            .await
            .map_err(AppError::Db)?;

        let kept: Vec<SystemColumnRow> = rows
            .into_iter()
            .filter(|r| r.default_kind != "MATERIALIZED" && r.default_kind != "ALIAS")
            .filter(|r| !self.cfg.exclude_columns.iter().any(|ex| ex == &r.name))
            .collect();

        if kept.is_empty() {
            return Err(AppError::SchemaChange(format!(
                "no insertable columns found for {}",
                self.qualified_table()
            )));
        }

        let schema: Schema = kept
            .iter()
            .map(|r| {
                let (ty, nullable) = column_type_from_sql(&r.type_name);
                ColumnDescriptor::new(r.name.clone(), ty, nullable)
            })
            .collect();
        let names: Vec<String> = kept.into_iter().map(|r| r.name).collect();

        self.columns.store(Arc::new(names));
        self.schema.store(Arc::new(schema));
        Ok(())
    }

    async fn write(&self, batch: &Batch) -> AppResult<()> {
        if batch.rows.is_empty() {
            return Ok(());
        }
        let columns = self.columns.load();
        if columns.is_empty() {
            return Err(AppError::SchemaChange(
                "writer used before init() introspected the destination schema".into(),
            ));
        }

        let mut sql = String::with_capacity(64 + batch.rows.len() * 32);
        sql.push_str("INSERT INTO ");
        sql.push_str(&self.qualified_table());
        sql.push_str(" (");
        sql.push_str(
            &columns
                .iter()
                .map(|c| format!("`{c}`"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        sql.push_str(") VALUES ");

        let value_rows: Vec<String> = batch
            .rows
            .iter()
            .map(|row| format!("({})", row_literal(row)))
            .collect();
        sql.push_str(&value_rows.join(", "));

        self.client
            .query(&sql)
            .execute()
            .await
            .map_err(AppError::Db)
    }

    async fn change_schema(&self, new_cols: &[ColumnDescriptor]) -> AppResult<()> {
        let on_cluster = self.on_cluster();
        let table = self.qualified_table();
        for col in new_cols {
            let sql = format!(
                "ALTER TABLE {table}{on_cluster} ADD COLUMN IF NOT EXISTS `{}` Nullable({})",
                col.name,
                col.ty.sql_type_name(),
            );
            self.client
                .query(&sql)
                .execute()
                .await
                .map_err(AppError::Db)?;
        }

        if let Some(dist) = &self.cfg.dist_table_name {
            let cluster = self
                .cfg
                .cluster
                .as_deref()
                .ok_or_else(|| AppError::InvalidConfig("dist_table_name set without cluster".into()))?;
            let drop_sql = format!("DROP TABLE IF EXISTS {}.{dist}{on_cluster}", self.cfg.database);
            self.client.query(&drop_sql).execute().await.map_err(AppError::Db)?;

            let create_sql = format!(
                "CREATE TABLE {}.{dist}{on_cluster} AS {table} ENGINE = Distributed({cluster}, {}, {})",
                self.cfg.database, self.cfg.database, self.cfg.table,
            );
            self.client.query(&create_sql).execute().await.map_err(AppError::Db)?;
        }

        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        Ok(())
    }

    fn current_schema(&self) -> Schema {
        (*self.schema.load_full()).clone()
    }
}

fn row_literal(row: &Row) -> String {
    row.iter().map(value_literal).collect::<Vec<_>>().join(", ")
}

fn value_literal(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => format!("'{}'", escape(s)),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
        Value::ArrayInt(v) => format!("[{}]", v.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")),
        Value::ArrayFloat(v) => format!("[{}]", v.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(",")),
        Value::ArrayString(v) => format!(
            "[{}]",
            v.iter().map(|s| format!("'{}'", escape(s))).collect::<Vec<_>>().join(",")
        ),
        Value::Null => "NULL".to_string(),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, ColumnType, ScalarType};

    #[test]
    fn value_literal_escapes_quotes() {
        assert_eq!(value_literal(&Value::Str("o'brien".into())), "'o\\'brien'");
        assert_eq!(value_literal(&Value::Null), "NULL");
        assert_eq!(value_literal(&Value::Int(42)), "42");
    }

    #[test]
    fn low_cardinality_is_stripped_in_either_wrapping_order() {
        assert_eq!(
            column_type_from_sql("LowCardinality(String)"),
            (ColumnType::Scalar(ScalarType::String), false)
        );
        assert_eq!(
            column_type_from_sql("LowCardinality(Nullable(String))"),
            (ColumnType::Scalar(ScalarType::String), true)
        );
        assert_eq!(
            column_type_from_sql("Nullable(LowCardinality(String))"),
            (ColumnType::Scalar(ScalarType::String), true)
        );
    }

    #[test]
    fn ddl_uses_nullable_and_add_column_if_not_exists() {
        let cfg = ClickHouseConfig {
            url_env: "CH_URL".into(),
            database: "db".into(),
            table: "events".into(),
            user: None,
            password_env: None,
            cluster: None,
            dist_table_name: None,
            exclude_columns: vec![],
        };
        unsafe { std::env::set_var("CH_URL", "http://localhost:8123") };
        let writer = ClickHouseWriter::new(cfg).unwrap();
        let col = ColumnDescriptor::new("newkey", ColumnType::Scalar(ScalarType::Int), true);
        let on_cluster = writer.on_cluster();
        assert_eq!(on_cluster, "");
        let sql = format!(
            "ALTER TABLE {}{} ADD COLUMN IF NOT EXISTS `{}` Nullable({})",
            writer.qualified_table(),
            on_cluster,
            col.name,
            col.ty.sql_type_name()
        );
        assert!(sql.contains("ADD COLUMN IF NOT EXISTS `newkey` Nullable(Int64)"));
    }
}
