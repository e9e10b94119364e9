//! Entity, query and column types shared by the applier, the query session
//! manager and the client session.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Query result row
pub type Row = Vec<serde_json::Value>;

/// SQL column type as declared in CREATE statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Bigint,
    Double,
    String,
    Array(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
}

impl ColumnType {
    /// Name used by DESCRIBE output for a top-level column.
    pub fn describe_name(&self) -> String {
        match self {
            ColumnType::String => "VARCHAR(STRING)".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Boolean => f.write_str("BOOLEAN"),
            ColumnType::Integer => f.write_str("INTEGER"),
            ColumnType::Bigint => f.write_str("BIGINT"),
            ColumnType::Double => f.write_str("DOUBLE"),
            ColumnType::String => f.write_str("STRING"),
            ColumnType::Array(item) => write!(f, "ARRAY<{}>", item),
            ColumnType::Map(key, value) => write!(f, "MAP<{}, {}>", key, value),
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if let Some(inner) = generic_args(&upper, "ARRAY") {
            return Ok(ColumnType::Array(Box::new(inner.parse()?)));
        }
        if let Some(inner) = generic_args(&upper, "MAP") {
            let (key, value) = split_top_level_comma(inner)
                .ok_or_else(|| Error::InvalidColumnType(trimmed.to_string()))?;
            return Ok(ColumnType::Map(
                Box::new(key.parse()?),
                Box::new(value.parse()?),
            ));
        }

        match upper.as_str() {
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "INT" | "INTEGER" => Ok(ColumnType::Integer),
            "BIGINT" | "LONG" => Ok(ColumnType::Bigint),
            "DOUBLE" => Ok(ColumnType::Double),
            "VARCHAR" | "STRING" => Ok(ColumnType::String),
            _ => Err(Error::InvalidColumnType(trimmed.to_string())),
        }
    }
}

/// `ARRAY<DOUBLE>` with `name = "ARRAY"` yields `Some("DOUBLE")`.
fn generic_args<'a>(upper: &'a str, name: &str) -> Option<&'a str> {
    let rest = upper.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('<')?.strip_suffix('>')?;
    Some(inner.trim())
}

fn split_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Stream or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Stream,
    Table,
}

impl EntityKind {
    /// Prefix used when naming the persistent query that populates this kind of sink.
    pub fn query_prefix(&self) -> &'static str {
        match self {
            EntityKind::Stream => "CSAS",
            EntityKind::Table => "CTAS",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Stream => f.write_str("STREAM"),
            EntityKind::Table => f.write_str("TABLE"),
        }
    }
}

/// Value serialization format of a backing topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializationFormat {
    Json,
    Delimited,
    Avro,
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationFormat::Json => f.write_str("JSON"),
            SerializationFormat::Delimited => f.write_str("DELIMITED"),
            SerializationFormat::Avro => f.write_str("AVRO"),
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "JSON" => Ok(SerializationFormat::Json),
            "DELIMITED" | "CSV" => Ok(SerializationFormat::Delimited),
            "AVRO" => Ok(SerializationFormat::Avro),
            other => Err(Error::InvalidValue {
                property: "value_format".to_string(),
                value: other.to_string(),
                reason: "expected JSON, DELIMITED or AVRO".to_string(),
            }),
        }
    }
}

/// A stream or table known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub kind: EntityKind,
    pub schema: Vec<Column>,
    pub topic: String,
    pub format: SerializationFormat,
    pub key_column: Option<String>,
    pub partitions: u32,
    pub replicas: u16,
    /// Persistent query that writes into this entity, if it was created by CREATE ... AS SELECT.
    pub written_by: Option<String>,
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A topic registered with REGISTER TOPIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredTopic {
    pub name: String,
    pub kafka_topic: String,
    pub format: SerializationFormat,
}

/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Running,
    Errored,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Running => f.write_str("RUNNING"),
            QueryStatus::Errored => f.write_str("ERRORED"),
        }
    }
}

/// Local record of one streaming query's identity and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub id: String,
    pub statement_text: String,
    /// Entity the query writes into; `None` for one-shot SELECTs.
    pub sink: Option<String>,
    pub sources: Vec<String>,
    pub status: QueryStatus,
    pub error: Option<String>,
    pub row_limit: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    /// Effective configuration the query was started with.
    pub properties: BTreeMap<String, String>,
}

impl QueryDescriptor {
    /// True when the query exists only to serve a single client read.
    pub fn is_one_shot(&self) -> bool {
        self.sink.is_none()
    }

    pub fn reads(&self, entity: &str) -> bool {
        self.sources.iter().any(|s| s.eq_ignore_ascii_case(entity))
    }

    pub fn writes(&self, entity: &str) -> bool {
        self.sink
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case(entity))
            .unwrap_or(false)
    }
}
