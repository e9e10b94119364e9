//! Output rendering for the tributary shell
//!
//! Two formats:
//! - TABULAR: psql-style tables, the default
//! - JSON: pretty-printed JSON, one document per result
//!
//! Everything renders to a `String` so the shell decides where it goes.

use crate::config::OutputFormat;
use anyhow::Result;
use colored::*;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tributary_core::{Column, EntityDescriptor, PropertyListing, QueryDescriptor, RegisteredTopic, Row};
use tributary_engine::{EndReason, FunctionKind, StatementResult};

#[derive(Tabled, Serialize)]
struct MessageRow {
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled, Serialize)]
struct StreamRow {
    #[tabled(rename = "Stream Name")]
    name: String,
    #[tabled(rename = "Kafka Topic")]
    topic: String,
    #[tabled(rename = "Format")]
    format: String,
}

#[derive(Tabled, Serialize)]
struct TableRow {
    #[tabled(rename = "Table Name")]
    name: String,
    #[tabled(rename = "Kafka Topic")]
    topic: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Key")]
    key: String,
}

#[derive(Tabled, Serialize)]
struct QueryRow {
    #[tabled(rename = "Query ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Sink")]
    sink: String,
    #[tabled(rename = "Query String")]
    statement: String,
}

#[derive(Tabled, Serialize)]
struct TopicRow {
    #[tabled(rename = "Registered Topic Name")]
    name: String,
    #[tabled(rename = "Kafka Topic")]
    kafka_topic: String,
    #[tabled(rename = "Format")]
    format: String,
}

#[derive(Tabled, Serialize)]
struct FunctionRow {
    #[tabled(rename = "Function Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
}

#[derive(Tabled, Serialize)]
struct PropertyRow {
    #[tabled(rename = "Property")]
    property: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled, Serialize)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Type")]
    column_type: String,
}

pub struct Console {
    format: OutputFormat,
    colored: bool,
}

impl Console {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn set_format(&mut self, format: OutputFormat) {
        self.format = format;
    }

    /// Render any result except a result stream, which the shell drains row by row.
    pub fn render(&self, result: &StatementResult) -> Result<String> {
        match result {
            StatementResult::Command(outcome) => match self.format {
                OutputFormat::Tabular => Ok(self.success(&table(vec![MessageRow {
                    message: outcome.message.clone(),
                }]))),
                OutputFormat::Json => json(outcome),
            },
            StatementResult::Streaming(stream) => Ok(self.render_header(stream.schema())),
            StatementResult::PropertySet(outcome) => self.message(&outcome.to_string()),
            StatementResult::PropertyUnset(outcome) => self.message(&outcome.to_string()),
            StatementResult::Properties(listing) => self.list(properties(listing)),
            StatementResult::Streams(entities) => self.list(
                entities
                    .iter()
                    .map(|e| StreamRow {
                        name: e.name.clone(),
                        topic: e.topic.clone(),
                        format: e.format.to_string(),
                    })
                    .collect(),
            ),
            StatementResult::Tables(entities) => self.list(
                entities
                    .iter()
                    .map(|e| TableRow {
                        name: e.name.clone(),
                        topic: e.topic.clone(),
                        format: e.format.to_string(),
                        key: e.key_column.clone().unwrap_or_default(),
                    })
                    .collect(),
            ),
            StatementResult::Queries(queries) => self.list(queries.iter().map(query_row).collect()),
            StatementResult::Topics(topics) => self.list(topics.iter().map(topic_row).collect()),
            StatementResult::Functions(functions) => self.list(functions_rows(functions)),
            StatementResult::Entity(entity) => match self.format {
                OutputFormat::Tabular => Ok(describe_entity(entity)),
                OutputFormat::Json => json(entity),
            },
            StatementResult::Topic(topic) => self.list(vec![topic_row(topic)]),
            StatementResult::Function(function) => match self.format {
                OutputFormat::Tabular => Ok(function.to_string()),
                OutputFormat::Json => json(function),
            },
        }
    }

    /// Column header printed before the first streamed row.
    pub fn render_header(&self, schema: &[Column]) -> String {
        match self.format {
            OutputFormat::Tabular => {
                let names: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
                let header = names.join(" | ");
                let rule = "-".repeat(header.chars().count().max(1));
                format!("{}\n{}", header, rule)
            }
            OutputFormat::Json => String::new(),
        }
    }

    pub fn render_row(&self, row: &Row) -> String {
        match self.format {
            OutputFormat::Tabular => row
                .iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => "null".to_string(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" | "),
            OutputFormat::Json => serde_json::Value::Array(row.clone()).to_string(),
        }
    }

    /// Trailer printed once a result stream has ended.
    pub fn render_end(&self, reason: &EndReason) -> String {
        let text = reason.to_string();
        if reason.is_normal() {
            text
        } else {
            self.error(&text)
        }
    }

    pub fn error(&self, message: &str) -> String {
        if self.colored {
            message.red().to_string()
        } else {
            message.to_string()
        }
    }

    fn success(&self, text: &str) -> String {
        if self.colored {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    fn message(&self, message: &str) -> Result<String> {
        match self.format {
            OutputFormat::Tabular => Ok(message.to_string()),
            OutputFormat::Json => json(&MessageRow {
                message: message.to_string(),
            }),
        }
    }

    fn list<T: Tabled + Serialize>(&self, rows: Vec<T>) -> Result<String> {
        match self.format {
            OutputFormat::Tabular => Ok(table(rows)),
            OutputFormat::Json => json(&rows),
        }
    }
}

fn table<T: Tabled>(rows: Vec<T>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::psql());
    table.to_string()
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn properties(listing: &[PropertyListing]) -> Vec<PropertyRow> {
    listing
        .iter()
        .map(|p| PropertyRow {
            property: p.name.clone(),
            scope: p.scope.to_string(),
            value: p.value.clone().unwrap_or_else(|| "NULL".to_string()),
        })
        .collect()
}

fn query_row(query: &QueryDescriptor) -> QueryRow {
    let status = match &query.error {
        Some(error) => format!("{}: {}", query.status, error),
        None => query.status.to_string(),
    };
    QueryRow {
        id: query.id.clone(),
        status,
        sink: query.sink.clone().unwrap_or_default(),
        statement: query.statement_text.clone(),
    }
}

fn topic_row(topic: &RegisteredTopic) -> TopicRow {
    TopicRow {
        name: topic.name.clone(),
        kafka_topic: topic.kafka_topic.clone(),
        format: topic.format.to_string(),
    }
}

fn functions_rows(functions: &[(String, FunctionKind)]) -> Vec<FunctionRow> {
    functions
        .iter()
        .map(|(name, kind)| FunctionRow {
            name: name.clone(),
            kind: kind.to_string(),
        })
        .collect()
}

fn describe_entity(entity: &EntityDescriptor) -> String {
    let fields: Vec<FieldRow> = entity
        .schema
        .iter()
        .map(|c| FieldRow {
            field: c.name.clone(),
            column_type: c.column_type.describe_name(),
        })
        .collect();

    let mut out = format!("{:<20} : {}\n", "Name", entity.name);
    out.push_str(&format!("{:<20} : {}\n", "Type", entity.kind));
    out.push_str(&format!("{:<20} : {}\n", "Kafka topic", entity.topic));
    out.push_str(&format!("{:<20} : {}\n", "Format", entity.format));
    if let Some(key) = &entity.key_column {
        out.push_str(&format!("{:<20} : {}\n", "Key field", key));
    }
    if let Some(query) = &entity.written_by {
        out.push_str(&format!("{:<20} : {}\n", "Written by", query));
    }
    out.push('\n');
    out.push_str(&table(fields));
    out
}
