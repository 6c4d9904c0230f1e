//! Core data model shared by every stage of the pipeline: the message the
//! input delivers, the column/schema description of the destination table,
//! and the row shape that flows from parsing through the ring, the
//! sharder, and into the writer.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};

/// A unit delivered by the input log. Immutable after delivery.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> (i32, i64) {
        (self.partition, self.offset)
    }
}

/// The scalar types a column may hold, before the array wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int,
    Float,
    String,
    Date,
    DateTime,
    DateTime64,
    ElasticDateTime,
}

/// The semantic type of a destination column (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Scalar(ScalarType),
    ArrayInt,
    ArrayFloat,
    ArrayString,
}

impl ColumnType {
    /// ClickHouse-style type name, without the `Nullable(...)` wrapper.
    pub fn sql_type_name(&self) -> &'static str {
        match self {
            ColumnType::Scalar(ScalarType::Int) => "Int64",
            ColumnType::Scalar(ScalarType::Float) => "Float64",
            ColumnType::Scalar(ScalarType::String) => "String",
            ColumnType::Scalar(ScalarType::Date) => "Date",
            ColumnType::Scalar(ScalarType::DateTime) => "DateTime",
            ColumnType::Scalar(ScalarType::DateTime64) => "DateTime64(3)",
            ColumnType::Scalar(ScalarType::ElasticDateTime) => "DateTime",
            ColumnType::ArrayInt => "Array(Int64)",
            ColumnType::ArrayFloat => "Array(Float64)",
            ColumnType::ArrayString => "Array(String)",
        }
    }
}

/// A column in the destination schema: its name, semantic type, nullability,
/// and the JSON key used to extract its value from a parsed message.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub source_key: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        let name = name.into();
        Self {
            source_key: name.clone(),
            name,
            ty,
            nullable,
        }
    }

    /// The value a missing/unparseable field resolves to: the column's null
    /// sentinel if nullable, else the type's zero value (spec §3).
    pub fn missing_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }
        match self.ty {
            ColumnType::Scalar(ScalarType::Int) => Value::Int(0),
            ColumnType::Scalar(ScalarType::Float) => Value::Float(0.0),
            ColumnType::Scalar(ScalarType::String) => Value::Str(String::new()),
            ColumnType::Scalar(ScalarType::Date) => {
                Value::Date(DateTime::<Utc>::UNIX_EPOCH.date_naive())
            }
            ColumnType::Scalar(ScalarType::DateTime)
            | ColumnType::Scalar(ScalarType::DateTime64)
            | ColumnType::Scalar(ScalarType::ElasticDateTime) => {
                Value::DateTime(DateTime::<Utc>::UNIX_EPOCH)
            }
            ColumnType::ArrayInt => Value::ArrayInt(Vec::new()),
            ColumnType::ArrayFloat => Value::ArrayFloat(Vec::new()),
            ColumnType::ArrayString => Value::ArrayString(Vec::new()),
        }
    }
}

/// The ordered list of column descriptors: the schema.
pub type Schema = Vec<ColumnDescriptor>;

/// A single cell in a row, aligned positionally with a `ColumnDescriptor`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    ArrayInt(Vec<i64>),
    ArrayFloat(Vec<f64>),
    ArrayString(Vec<String>),
    Null,
}

/// An ordered tuple of values aligned positionally with the schema.
pub type Row = Vec<Value>;

/// A `(Message, Row?)` pair. `row` is absent when parsing failed; the slot
/// is still placed in the ring so the offset is not lost (spec §3).
#[derive(Debug, Clone)]
pub struct MsgRow {
    pub message: Message,
    pub row: Option<Row>,
}

impl MsgRow {
    pub fn offset(&self) -> i64 {
        self.message.offset
    }

    pub fn partition(&self) -> i32 {
        self.message.partition
    }
}
