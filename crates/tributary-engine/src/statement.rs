//! Statement classification and planning
//!
//! Statements are classified by keyword prefix before any SQL parser sees
//! them: the DDL forms (`CREATE STREAM`, `REGISTER TOPIC`, `TERMINATE`, ...)
//! and the client-local commands (`SET`, `LIST`, `DESCRIBE`, ...) are not
//! standard SQL. Only SELECT bodies are handed to `sqlparser`.
//!
//! ## Kinds
//!
//! - **DDL**: replicated through the command log and applied on every node
//! - **Query**: a transient SELECT served by the local query session manager
//! - **Local**: handled entirely by the client session
//!
//! Unquoted identifiers are upper-cased; property keys in `WITH (...)` are
//! lower-cased.

use crate::error::{EngineError, Result};
use crate::metadata::MetadataSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::ast::{
    BinaryOperator, Expr, Query, SelectItem, SetExpr, Statement as SqlStatement, TableFactor,
    UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tributary_core::{Column, ColumnType, EntityKind, Row, SerializationFormat};

/// Coarse classification used to route a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Ddl,
    Query,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateSource(CreateSource),
    CreateAsSelect(CreateAsSelect),
    DropSource { kind: EntityKind, name: String },
    RegisterTopic(RegisterTopic),
    DropTopic { name: String },
    Terminate { query_id: String },
    Select(SelectStatement),
    Set { property: String, value: String },
    Unset { property: String },
    List(ListTarget),
    Describe(DescribeTarget),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::CreateSource(_)
            | Statement::CreateAsSelect(_)
            | Statement::DropSource { .. }
            | Statement::RegisterTopic(_)
            | Statement::DropTopic { .. }
            | Statement::Terminate { .. } => StatementKind::Ddl,
            Statement::Select(_) => StatementKind::Query,
            Statement::Set { .. }
            | Statement::Unset { .. }
            | Statement::List(_)
            | Statement::Describe(_) => StatementKind::Local,
        }
    }
}

/// `CREATE STREAM|TABLE name (columns) WITH (...)`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSource {
    pub kind: EntityKind,
    pub name: String,
    pub columns: Vec<Column>,
    pub topic: String,
    pub format: SerializationFormat,
    pub key: Option<String>,
    pub properties: BTreeMap<String, String>,
}

/// `CREATE STREAM|TABLE name [WITH (...)] AS SELECT ...`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAsSelect {
    pub kind: EntityKind,
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub select: SelectStatement,
}

/// `REGISTER TOPIC name WITH (kafka_topic=..., value_format=...)`
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterTopic {
    pub name: String,
    pub kafka_topic: String,
    pub format: SerializationFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    Streams,
    Tables,
    Queries,
    Properties,
    Functions,
    RegisteredTopics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescribeTarget {
    Source(String),
    Function(String),
    Topic(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub source: String,
    pub projection: Vec<Projection>,
    pub filters: Vec<Filter>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Column { name: String, alias: Option<String> },
}

/// `column op literal`; a WHERE clause is the conjunction of its filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl CompareOp {
    fn matches(&self, left: &Value, right: &Value) -> bool {
        match (self, compare_values(left, right)) {
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::NotEq, Some(o)) => o != Ordering::Equal,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::GtEq, Some(o)) => o != Ordering::Less,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::LtEq, Some(o)) => o != Ordering::Greater,
            (_, None) => false,
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Compiled plan for a single-source SELECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub source: String,
    pub source_topic: String,
    /// Source column index for each output column.
    pub projection: Vec<usize>,
    pub filters: Vec<PlannedFilter>,
    pub output_schema: Vec<Column>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedFilter {
    pub column: usize,
    pub op: CompareOp,
    pub value: Value,
}

impl QueryPlan {
    /// Filter and project one source row. `None` when the row is filtered out.
    pub fn evaluate(&self, row: &Row) -> Option<Row> {
        let passes = self.filters.iter().all(|f| {
            row.get(f.column)
                .map(|v| f.op.matches(v, &f.value))
                .unwrap_or(false)
        });
        if !passes {
            return None;
        }
        Some(
            self.projection
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// SQL parse/plan boundary.
pub trait StatementClassifier: Send + Sync {
    /// Classify raw statement text. Fails with `Malformed`.
    fn classify(&self, text: &str) -> Result<Statement>;

    /// Compile a SELECT against the given metadata.
    fn plan(&self, select: &SelectStatement, metadata: &MetadataSnapshot) -> Result<QueryPlan>;
}

/// Keyword-prefix classifier with `sqlparser` for SELECT bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlClassifier;

impl StatementClassifier for SqlClassifier {
    fn classify(&self, text: &str) -> Result<Statement> {
        parse_statement(text)
    }

    fn plan(&self, select: &SelectStatement, metadata: &MetadataSnapshot) -> Result<QueryPlan> {
        let source = metadata
            .entity(&select.source)
            .ok_or_else(|| EngineError::EntityNotFound(select.source.clone()))?;

        let resolve = |name: &str| -> Result<usize> {
            source
                .schema
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    EngineError::ValidationFailed(format!(
                        "Column {} cannot be resolved in {}.",
                        name, source.name
                    ))
                })
        };

        let mut projection = Vec::new();
        let mut output_schema = Vec::new();
        for item in &select.projection {
            match item {
                Projection::All => {
                    for (i, column) in source.schema.iter().enumerate() {
                        projection.push(i);
                        output_schema.push(column.clone());
                    }
                }
                Projection::Column { name, alias } => {
                    let index = resolve(name)?;
                    projection.push(index);
                    output_schema.push(Column::new(
                        alias.clone().unwrap_or_else(|| source.schema[index].name.clone()),
                        source.schema[index].column_type.clone(),
                    ));
                }
            }
        }

        let filters = select
            .filters
            .iter()
            .map(|f| {
                Ok(PlannedFilter {
                    column: resolve(&f.column)?,
                    op: f.op,
                    value: f.value.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryPlan {
            source: source.name.clone(),
            source_topic: source.topic.clone(),
            projection,
            filters,
            output_schema,
            limit: select.limit,
        })
    }
}

fn malformed(message: impl Into<String>) -> EngineError {
    EngineError::Malformed(message.into())
}

/// Parse one statement.
pub fn parse_statement(text: &str) -> Result<Statement> {
    let sql = strip_terminator(text);
    if sql.is_empty() {
        return Err(malformed("Empty statement"));
    }
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();

    match words.first().copied() {
        Some("CREATE") => parse_create(sql, &words),
        Some("DROP") => parse_drop(sql, &words),
        Some("REGISTER") => parse_register(sql, &words),
        Some("TERMINATE") => {
            let id = sql
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| malformed("TERMINATE requires a query id"))?;
            Ok(Statement::Terminate {
                query_id: identifier(id),
            })
        }
        Some("SELECT") => Ok(Statement::Select(parse_select(sql)?)),
        Some("SET") => {
            let rest = after_keywords(sql, 1);
            let (property, value) = rest
                .split_once('=')
                .ok_or_else(|| malformed("SET requires 'property' = 'value'"))?;
            Ok(Statement::Set {
                property: unquote(property),
                value: unquote(value),
            })
        }
        Some("UNSET") => {
            let property = unquote(after_keywords(sql, 1));
            if property.is_empty() {
                return Err(malformed("UNSET requires a property name"));
            }
            Ok(Statement::Unset { property })
        }
        Some("LIST") | Some("SHOW") => parse_list(&words),
        Some("DESCRIBE") | Some("DESC") => parse_describe(sql, &words),
        Some(other) => Err(malformed(format!(
            "line 1:1: mismatched input '{}' expecting a statement",
            other
        ))),
        None => Err(malformed("Empty statement")),
    }
}

fn strip_terminator(text: &str) -> &str {
    text.trim().trim_end_matches(';').trim()
}

/// The raw text that follows the first `n` whitespace-separated words.
fn after_keywords(sql: &str, n: usize) -> &str {
    let mut rest = sql.trim_start();
    for _ in 0..n {
        rest = rest
            .find(char::is_whitespace)
            .map(|i| rest[i..].trim_start())
            .unwrap_or("");
    }
    rest
}

fn identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['`', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_uppercase()
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2
        && ((trimmed.starts_with('\'') && trimmed.ends_with('\''))
            || (trimmed.starts_with('"') && trimmed.ends_with('"')))
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split on `sep` where it is not nested in parentheses, angle brackets or quotes.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' | '<' if !in_quote => depth += 1,
            ')' | '>' if !in_quote => depth -= 1,
            c if c == sep && depth == 0 && !in_quote => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Given text starting with `(`, return the inside and what follows the matching `)`.
fn parenthesized(s: &str) -> Result<(&str, &str)> {
    let s = s.trim_start();
    if !s.starts_with('(') {
        return Err(malformed("expected '('"));
    }
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&s[1..i], &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(malformed("unbalanced parentheses"))
}

fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    let s = s.trim_start();
    // `get` rather than indexing: user text may put a multibyte char at the cut.
    match (s.get(..keyword.len()), s.get(keyword.len()..)) {
        (Some(head), Some(tail)) => {
            head.eq_ignore_ascii_case(keyword)
                && tail
                    .chars()
                    .next()
                    .map(|c| c.is_whitespace() || c == '(')
                    .unwrap_or(true)
        }
        _ => false,
    }
}

/// Parse `WITH (k = v, ...)` at the start of `s`, returning the map and the rest.
fn parse_with(s: &str) -> Result<(BTreeMap<String, String>, &str)> {
    let after = s.trim_start()[4..].trim_start();
    let (inner, rest) = parenthesized(after)?;
    let mut properties = BTreeMap::new();
    for pair in split_top_level(inner, ',') {
        if pair.trim().is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| malformed(format!("expected key = value in WITH clause, got '{}'", pair.trim())))?;
        properties.insert(unquote(key).to_lowercase(), unquote(value));
    }
    Ok((properties, rest))
}

fn entity_kind(word: Option<&&str>) -> Result<EntityKind> {
    match word.copied() {
        Some("STREAM") => Ok(EntityKind::Stream),
        Some("TABLE") => Ok(EntityKind::Table),
        other => Err(malformed(format!(
            "expected STREAM or TABLE, got '{}'",
            other.unwrap_or("")
        ))),
    }
}

fn format_property(properties: &BTreeMap<String, String>) -> Result<SerializationFormat> {
    match properties.get("value_format") {
        Some(v) => v.parse().map_err(EngineError::from),
        None => Ok(SerializationFormat::Json),
    }
}

fn parse_create(sql: &str, words: &[&str]) -> Result<Statement> {
    let kind = entity_kind(words.get(1))?;
    let rest = after_keywords(sql, 2);
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    if name_end == 0 {
        return Err(malformed(format!("CREATE {} requires a name", kind)));
    }
    let name = identifier(&rest[..name_end]);
    let rest = rest[name_end..].trim_start();

    if rest.starts_with('(') {
        let (columns_text, rest) = parenthesized(rest)?;
        let mut columns = Vec::new();
        for column in split_top_level(columns_text, ',') {
            let column = column.trim();
            let (col_name, col_type) = column
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed(format!("column '{}' has no type", column)))?;
            columns.push(Column::new(identifier(col_name), col_type.parse::<ColumnType>()?));
        }

        let properties = if starts_with_keyword(rest, "WITH") {
            let (properties, trailing) = parse_with(rest)?;
            if !trailing.trim().is_empty() {
                return Err(malformed(format!("unexpected input '{}'", trailing.trim())));
            }
            properties
        } else if rest.trim().is_empty() {
            BTreeMap::new()
        } else {
            return Err(malformed(format!("unexpected input '{}'", rest.trim())));
        };

        let topic = properties.get("kafka_topic").cloned().ok_or_else(|| {
            malformed("Corresponding topic (KAFKA_TOPIC) should be set in WITH clause.")
        })?;
        return Ok(Statement::CreateSource(CreateSource {
            kind,
            name,
            columns,
            topic,
            format: format_property(&properties)?,
            key: properties.get("key").map(|k| identifier(k)),
            properties,
        }));
    }

    let (properties, rest) = if starts_with_keyword(rest, "WITH") {
        parse_with(rest)?
    } else {
        (BTreeMap::new(), rest)
    };
    if !starts_with_keyword(rest, "AS") {
        return Err(malformed(format!(
            "CREATE {} {} requires a column list or AS SELECT",
            kind, name
        )));
    }
    let select = parse_select(after_keywords(rest, 1))?;
    Ok(Statement::CreateAsSelect(CreateAsSelect {
        kind,
        name,
        properties,
        select,
    }))
}

fn parse_drop(sql: &str, words: &[&str]) -> Result<Statement> {
    let name = sql
        .split_whitespace()
        .nth(2)
        .map(identifier)
        .ok_or_else(|| malformed("DROP requires a name"))?;
    match words.get(1).copied() {
        Some("TOPIC") => Ok(Statement::DropTopic { name }),
        _ => Ok(Statement::DropSource {
            kind: entity_kind(words.get(1))?,
            name,
        }),
    }
}

fn parse_register(sql: &str, words: &[&str]) -> Result<Statement> {
    if words.get(1).copied() != Some("TOPIC") {
        return Err(malformed("expected REGISTER TOPIC"));
    }
    let rest = after_keywords(sql, 2);
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let name = identifier(&rest[..name_end]);
    if name.is_empty() {
        return Err(malformed("REGISTER TOPIC requires a name"));
    }
    let rest = &rest[name_end..];
    if !starts_with_keyword(rest, "WITH") {
        return Err(malformed("REGISTER TOPIC requires a WITH clause"));
    }
    let (properties, _) = parse_with(rest)?;
    let kafka_topic = properties
        .get("kafka_topic")
        .cloned()
        .ok_or_else(|| malformed("Corresponding topic (KAFKA_TOPIC) should be set in WITH clause."))?;
    let format = properties
        .get("value_format")
        .ok_or_else(|| malformed("Topic format (VALUE_FORMAT) should be set in WITH clause."))?
        .parse::<SerializationFormat>()?;
    Ok(Statement::RegisterTopic(RegisterTopic {
        name,
        kafka_topic,
        format,
    }))
}

fn parse_list(words: &[&str]) -> Result<Statement> {
    let target = match &words[1..] {
        ["STREAMS"] => ListTarget::Streams,
        ["TABLES"] => ListTarget::Tables,
        ["QUERIES"] => ListTarget::Queries,
        ["PROPERTIES"] => ListTarget::Properties,
        ["FUNCTIONS"] => ListTarget::Functions,
        ["TOPICS"] | ["REGISTERED", "TOPICS"] => ListTarget::RegisteredTopics,
        _ => {
            return Err(malformed(format!(
                "cannot list '{}'",
                words[1..].join(" ").to_lowercase()
            )))
        }
    };
    Ok(Statement::List(target))
}

fn parse_describe(sql: &str, words: &[&str]) -> Result<Statement> {
    let raw: Vec<&str> = sql.split_whitespace().collect();
    let target = match (words.get(1).copied(), raw.get(2)) {
        (Some("FUNCTION"), Some(name)) => DescribeTarget::Function(name.to_string()),
        (Some("TOPIC"), Some(name)) => DescribeTarget::Topic(identifier(name)),
        (Some("EXTENDED"), Some(name)) => DescribeTarget::Source(identifier(name)),
        (Some(_), _) if raw.len() == 2 => DescribeTarget::Source(identifier(raw[1])),
        _ => return Err(malformed("DESCRIBE requires a name")),
    };
    Ok(Statement::Describe(target))
}

/// Parse a single-source SELECT with `sqlparser`.
pub fn parse_select(sql: &str) -> Result<SelectStatement> {
    let dialect = GenericDialect {};
    let ast = Parser::parse_sql(&dialect, strip_terminator(sql))
        .map_err(|e| malformed(e.to_string()))?;

    let query = match ast.as_slice() {
        [SqlStatement::Query(query)] => query,
        [] => return Err(malformed("Empty query")),
        _ => return Err(malformed("Expected a single SELECT statement")),
    };
    select_from_query(query)
}

fn select_from_query(query: &Query) -> Result<SelectStatement> {
    let select = match &*query.body {
        SetExpr::Select(select) => select,
        _ => return Err(malformed("Only simple SELECT queries are supported")),
    };

    let table = match select.from.as_slice() {
        [table] if table.joins.is_empty() => table,
        [] => return Err(malformed("SELECT requires a FROM clause")),
        _ => return Err(malformed("Joins are not supported")),
    };
    let source = match &table.relation {
        TableFactor::Table { name, .. } => identifier(&name.to_string()),
        _ => return Err(malformed("Only simple source references are supported")),
    };

    let mut projection = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => projection.push(Projection::All),
            SelectItem::UnnamedExpr(expr) => projection.push(Projection::Column {
                name: column_name(expr)?,
                alias: None,
            }),
            SelectItem::ExprWithAlias { expr, alias } => projection.push(Projection::Column {
                name: column_name(expr)?,
                alias: Some(alias.value.to_uppercase()),
            }),
            other => {
                return Err(malformed(format!("Unsupported select item: {}", other)));
            }
        }
    }

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    let limit = match &query.limit {
        Some(expr) => Some(
            literal(expr)?
                .as_u64()
                .ok_or_else(|| malformed("LIMIT must be a non-negative integer"))?,
        ),
        None => None,
    };

    Ok(SelectStatement {
        source,
        projection,
        filters,
        limit,
    })
}

fn column_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.to_uppercase()),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.to_uppercase())
            .ok_or_else(|| malformed("empty identifier")),
        other => Err(malformed(format!("Unsupported expression: {}", other))),
    }
}

fn collect_filters(expr: &Expr, filters: &mut Vec<Filter>) -> Result<()> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, filters)?;
            collect_filters(right, filters)
        }
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Eq => CompareOp::Eq,
                BinaryOperator::NotEq => CompareOp::NotEq,
                BinaryOperator::Gt => CompareOp::Gt,
                BinaryOperator::GtEq => CompareOp::GtEq,
                BinaryOperator::Lt => CompareOp::Lt,
                BinaryOperator::LtEq => CompareOp::LtEq,
                other => return Err(malformed(format!("Unsupported operator: {}", other))),
            };
            filters.push(Filter {
                column: column_name(left)?,
                op,
                value: literal(right)?,
            });
            Ok(())
        }
        other => Err(malformed(format!("Unsupported WHERE expression: {}", other))),
    }
}

fn literal(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::from(i))
            } else {
                n.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| malformed(format!("Invalid number: {}", n)))
            }
        }
        Expr::Value(SqlValue::SingleQuotedString(s)) => Ok(Value::String(s.clone())),
        Expr::Value(SqlValue::Boolean(b)) => Ok(Value::Bool(*b)),
        Expr::Value(SqlValue::Null) => Ok(Value::Null),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(-i))
                } else {
                    n.as_f64()
                        .and_then(|f| serde_json::Number::from_f64(-f))
                        .map(Value::Number)
                        .ok_or_else(|| malformed("Invalid number"))
                }
            }
            _ => Err(malformed("Unary minus requires a number")),
        },
        other => Err(malformed(format!("Expected a literal, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_stream_with_columns() {
        let stmt = parse_statement(
            "CREATE STREAM orders (ORDERTIME bigint, ITEMID varchar, PRICEARRAY array<double>, \
             KEYVALUEMAP map<varchar, double>) WITH (value_format = 'json', kafka_topic = 'orders_topic', key='ITEMID');",
        )
        .unwrap();
        assert_eq!(stmt.kind(), StatementKind::Ddl);
        match stmt {
            Statement::CreateSource(create) => {
                assert_eq!(create.name, "ORDERS");
                assert_eq!(create.kind, EntityKind::Stream);
                assert_eq!(create.topic, "orders_topic");
                assert_eq!(create.format, SerializationFormat::Json);
                assert_eq!(create.key.as_deref(), Some("ITEMID"));
                assert_eq!(create.columns.len(), 4);
                assert_eq!(create.columns[3].column_type.to_string(), "MAP<STRING, DOUBLE>");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_create_requires_topic() {
        let err = parse_statement("CREATE TABLE t (A INT) WITH (value_format='json')").unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
    }

    #[test]
    fn test_create_as_select() {
        let stmt =
            parse_statement("create stream result_0 with (partitions = 2) as SELECT itemid, orderunits AS units FROM orders WHERE orderunits > 20 AND itemid = 'ITEM_8';")
                .unwrap();
        match stmt {
            Statement::CreateAsSelect(csas) => {
                assert_eq!(csas.name, "RESULT_0");
                assert_eq!(csas.properties.get("partitions").map(String::as_str), Some("2"));
                assert_eq!(csas.select.source, "ORDERS");
                assert_eq!(
                    csas.select.projection[1],
                    Projection::Column {
                        name: "ORDERUNITS".to_string(),
                        alias: Some("UNITS".to_string())
                    }
                );
                assert_eq!(csas.select.filters.len(), 2);
                assert_eq!(csas.select.filters[1].value, json!("ITEM_8"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_local_statements() {
        assert_eq!(
            parse_statement("set 'auto.offset.reset' = 'earliest'").unwrap(),
            Statement::Set {
                property: "auto.offset.reset".to_string(),
                value: "earliest".to_string()
            }
        );
        assert_eq!(
            parse_statement("UNSET 'auto.offset.reset';").unwrap(),
            Statement::Unset {
                property: "auto.offset.reset".to_string()
            }
        );
        assert_eq!(
            parse_statement("list registered topics;").unwrap(),
            Statement::List(ListTarget::RegisteredTopics)
        );
        assert_eq!(
            parse_statement("SHOW queries").unwrap(),
            Statement::List(ListTarget::Queries)
        );
        assert_eq!(
            parse_statement("describe function substring;").unwrap(),
            Statement::Describe(DescribeTarget::Function("substring".to_string()))
        );
        assert_eq!(
            parse_statement("describe orders").unwrap(),
            Statement::Describe(DescribeTarget::Source("ORDERS".to_string()))
        );
        assert_eq!(parse_statement("describe orders").unwrap().kind(), StatementKind::Local);
    }

    #[test]
    fn test_ddl_statements() {
        assert_eq!(
            parse_statement("terminate csas_result_0_0;").unwrap(),
            Statement::Terminate {
                query_id: "CSAS_RESULT_0_0".to_string()
            }
        );
        assert_eq!(
            parse_statement("drop stream result_0").unwrap(),
            Statement::DropSource {
                kind: EntityKind::Stream,
                name: "RESULT_0".to_string()
            }
        );
        assert_eq!(
            parse_statement("REGISTER TOPIC foo WITH (value_format = 'csv', kafka_topic='foo');")
                .unwrap(),
            Statement::RegisterTopic(RegisterTopic {
                name: "FOO".to_string(),
                kafka_topic: "foo".to_string(),
                format: SerializationFormat::Delimited,
            })
        );
    }

    #[test]
    fn test_select_limit_and_kind() {
        let stmt = parse_statement("SELECT ORDERID, ITEMID FROM ORDERS LIMIT 3;").unwrap();
        assert_eq!(stmt.kind(), StatementKind::Query);
        match stmt {
            Statement::Select(select) => assert_eq!(select.limit, Some(3)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            parse_statement("FROBNICATE everything"),
            Err(EngineError::Malformed(_))
        ));
        assert!(matches!(parse_statement("  ;"), Err(EngineError::Malformed(_))));
        assert!(matches!(
            parse_statement("SELECT * FROM a JOIN b ON a.x = b.x"),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn test_multibyte_text_after_name() {
        for text in [
            "CREATE STREAM X Aé (A INT) WITH (kafka_topic='t', value_format='json');",
            "CREATE STREAM X é;",
            "CREATE STREAM X (A INT) Wé;",
            "REGISTER TOPIC X éé;",
        ] {
            assert!(
                matches!(parse_statement(text), Err(EngineError::Malformed(_))),
                "{}",
                text
            );
        }

        let stmt = parse_statement("CREATE STREAM é (A INT) WITH (kafka_topic='t', value_format='json');")
            .unwrap();
        match stmt {
            Statement::CreateSource(create) => assert_eq!(create.name, "É"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_plan_evaluate() {
        let plan = QueryPlan {
            source: "ORDERS".to_string(),
            source_topic: "orders".to_string(),
            projection: vec![1, 0],
            filters: vec![PlannedFilter {
                column: 0,
                op: CompareOp::Gt,
                value: json!(20),
            }],
            output_schema: vec![],
            limit: None,
        };
        assert_eq!(plan.evaluate(&vec![json!(30.5), json!("a")]), Some(vec![json!("a"), json!(30.5)]));
        assert_eq!(plan.evaluate(&vec![json!(10), json!("b")]), None);
        assert_eq!(plan.evaluate(&vec![json!("x"), json!("c")]), None);
    }
}
