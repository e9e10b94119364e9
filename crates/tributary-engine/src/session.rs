//! Client session
//!
//! A [`ClientSession`] is what a CLI (or any other front end) drives. It owns
//! the session scope of the configuration chain and routes each statement:
//!
//! - `SET`, `UNSET`, `LIST` and `DESCRIBE` are answered locally or through
//!   the endpoint's read calls, nothing is appended
//! - DDL goes through [`ServerEndpoint::submit_statement`] with the session
//!   overrides attached, so every node applies it under the same settings
//! - `SELECT` opens a [`ResultStream`] the caller consumes on its own task

use crate::endpoint::{ServerEndpoint, ServerInfo};
use crate::error::{EngineError, Result};
use crate::functions::{FunctionDescriptor, FunctionKind};
use crate::query::ResultStream;
use crate::statement::{DescribeTarget, ListTarget, SqlClassifier, Statement, StatementClassifier};
use crate::status::CommandOutcome;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tributary_core::{
    EntityDescriptor, EntityKind, PropertyListing, QueryDescriptor, RegisteredTopic,
    ServerConfig, SessionConfig, SetOutcome, UnsetOutcome, Version,
};
use uuid::Uuid;

/// What a single statement produced.
pub enum StatementResult {
    Command(CommandOutcome),
    Streaming(ResultStream),
    PropertySet(SetOutcome),
    PropertyUnset(UnsetOutcome),
    Properties(Vec<PropertyListing>),
    Streams(Vec<EntityDescriptor>),
    Tables(Vec<EntityDescriptor>),
    Queries(Vec<QueryDescriptor>),
    Topics(Vec<RegisteredTopic>),
    Functions(Vec<(String, FunctionKind)>),
    Entity(EntityDescriptor),
    Topic(RegisteredTopic),
    Function(FunctionDescriptor),
}

impl fmt::Debug for StatementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementResult::Command(outcome) => f.debug_tuple("Command").field(outcome).finish(),
            StatementResult::Streaming(stream) => f
                .debug_struct("Streaming")
                .field("query_id", &stream.query_id())
                .finish(),
            StatementResult::PropertySet(outcome) => {
                f.debug_tuple("PropertySet").field(outcome).finish()
            }
            StatementResult::PropertyUnset(outcome) => {
                f.debug_tuple("PropertyUnset").field(outcome).finish()
            }
            StatementResult::Properties(list) => f.debug_tuple("Properties").field(list).finish(),
            StatementResult::Streams(list) => f.debug_tuple("Streams").field(list).finish(),
            StatementResult::Tables(list) => f.debug_tuple("Tables").field(list).finish(),
            StatementResult::Queries(list) => f.debug_tuple("Queries").field(list).finish(),
            StatementResult::Topics(list) => f.debug_tuple("Topics").field(list).finish(),
            StatementResult::Functions(list) => f.debug_tuple("Functions").field(list).finish(),
            StatementResult::Entity(entity) => f.debug_tuple("Entity").field(entity).finish(),
            StatementResult::Topic(topic) => f.debug_tuple("Topic").field(topic).finish(),
            StatementResult::Function(function) => {
                f.debug_tuple("Function").field(&function.name).finish()
            }
        }
    }
}

/// One executed statement in the session history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub statement: String,
    pub succeeded: bool,
}

pub struct ClientSession {
    id: String,
    endpoint: Arc<dyn ServerEndpoint>,
    classifier: SqlClassifier,
    config: SessionConfig,
    server_info: ServerInfo,
    history: Vec<HistoryEntry>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("classifier", &self.classifier)
            .field("config", &self.config)
            .field("server_info", &self.server_info)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Negotiate versions and open a session.
    ///
    /// The server info is read first. An endpoint that cannot answer is
    /// reported as `Unreachable`; a server older than `min_server_version`,
    /// or one that refuses `client_version`, as `VersionIncompatible`.
    pub async fn connect(
        endpoint: Arc<dyn ServerEndpoint>,
        client_version: &Version,
        min_server_version: Option<&Version>,
    ) -> Result<Self> {
        let server_info = endpoint
            .server_info()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        let server_version: Version = server_info.version.parse()?;
        if let Some(minimum) = min_server_version {
            if &server_version < minimum {
                return Err(EngineError::VersionIncompatible {
                    server_version: server_info.version.clone(),
                    message: format!(
                        "Server version {} is older than the minimum supported {}.",
                        server_version, minimum
                    ),
                });
            }
        }
        endpoint.check_client_version(client_version).await?;

        let server = ServerConfig::from_overrides(&server_info.properties)?;
        let id = Uuid::new_v4().to_string();
        info!(
            session_id = %id,
            server_version = %server_info.version,
            cluster_id = %server_info.cluster_id,
            "Session connected"
        );
        Ok(Self {
            id,
            endpoint,
            classifier: SqlClassifier,
            config: SessionConfig::new(Arc::new(server)),
            server_info,
            history: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// End the session on the server. A statement still waiting on another
    /// task keeps its submitter until it completes.
    pub async fn close(self) -> Result<()> {
        self.endpoint.close_session(&self.id).await?;
        info!(session_id = %self.id, statements = self.history.len(), "Session closed");
        Ok(())
    }

    /// Execute one statement.
    pub async fn execute(&mut self, text: &str) -> Result<StatementResult> {
        let result = self.dispatch(text).await;
        if let Err(e) = &result {
            warn!(session_id = %self.id, error = %e, "Statement failed");
        }
        self.history.push(HistoryEntry {
            at: Utc::now(),
            statement: text.trim().to_string(),
            succeeded: result.is_ok(),
        });
        result
    }

    async fn dispatch(&mut self, text: &str) -> Result<StatementResult> {
        let statement = self.classifier.classify(text)?;
        debug!(session_id = %self.id, kind = ?statement.kind(), "Dispatching statement");

        match statement {
            Statement::Set { property, value } => {
                Ok(StatementResult::PropertySet(self.config.set(&property, &value)?))
            }
            Statement::Unset { property } => {
                Ok(StatementResult::PropertyUnset(self.config.unset(&property)?))
            }
            Statement::List(target) => self.list(target).await,
            Statement::Describe(target) => self.describe(target).await,
            Statement::Select(_) => {
                let stream = self
                    .endpoint
                    .stream_query(text, self.config.session_overrides())
                    .await?;
                Ok(StatementResult::Streaming(stream))
            }
            Statement::CreateSource(_)
            | Statement::CreateAsSelect(_)
            | Statement::DropSource { .. }
            | Statement::RegisterTopic(_)
            | Statement::DropTopic { .. }
            | Statement::Terminate { .. } => {
                let outcome = self
                    .endpoint
                    .submit_statement(&self.id, text, self.config.session_overrides())
                    .await?;
                Ok(StatementResult::Command(outcome))
            }
        }
    }

    async fn list(&self, target: ListTarget) -> Result<StatementResult> {
        Ok(match target {
            ListTarget::Streams => {
                StatementResult::Streams(self.endpoint.list_entities(EntityKind::Stream).await?)
            }
            ListTarget::Tables => {
                StatementResult::Tables(self.endpoint.list_entities(EntityKind::Table).await?)
            }
            ListTarget::Queries => StatementResult::Queries(self.endpoint.list_queries().await?),
            ListTarget::Properties => StatementResult::Properties(self.config.list()),
            ListTarget::Functions => {
                StatementResult::Functions(self.endpoint.list_functions().await?)
            }
            ListTarget::RegisteredTopics => {
                StatementResult::Topics(self.endpoint.list_topics().await?)
            }
        })
    }

    async fn describe(&self, target: DescribeTarget) -> Result<StatementResult> {
        Ok(match target {
            DescribeTarget::Source(name) => {
                StatementResult::Entity(self.endpoint.describe_entity(&name).await?)
            }
            DescribeTarget::Topic(name) => {
                StatementResult::Topic(self.endpoint.describe_topic(&name).await?)
            }
            DescribeTarget::Function(name) => {
                StatementResult::Function(self.endpoint.describe_function(&name).await?)
            }
        })
    }
}

/// Split a script into statements on `;` outside quotes.
///
/// Quotes are `'` and `"`; a doubled quote inside a literal does not end
/// it. Blank statements are dropped. An unterminated tail counts as a
/// statement.
pub fn split_statements(script: &str) -> Vec<String> {
    let (mut statements, tail) = split_terminated(script);
    if !tail.trim().is_empty() {
        statements.push(tail.trim().to_string());
    }
    statements
}

/// Like [`split_statements`], but returns the unterminated tail separately
/// so a caller reading line by line can keep buffering it.
pub fn split_terminated(script: &str) -> (Vec<String>, String) {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in script.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == ';' => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            None => current.push(c),
        }
    }
    (statements, current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements() {
        let script = "CREATE STREAM A (X INT) WITH (kafka_topic='a;b', value_format='JSON');\n\
                      LIST STREAMS ;  ;\nSET 'x'='y'";
        let statements = split_statements(script);
        assert_eq!(
            statements,
            vec![
                "CREATE STREAM A (X INT) WITH (kafka_topic='a;b', value_format='JSON')",
                "LIST STREAMS",
                "SET 'x'='y'",
            ]
        );
    }

    #[test]
    fn test_split_statements_doubled_quote() {
        let statements = split_statements("SET 'p'='it''s;fine'; LIST TABLES;");
        assert_eq!(statements, vec!["SET 'p'='it''s;fine'", "LIST TABLES"]);
    }

    #[test]
    fn test_split_statements_blank() {
        assert!(split_statements(" ; \n ;").is_empty());
    }

    #[test]
    fn test_split_terminated_keeps_open_tail() {
        let (done, tail) = split_terminated("LIST STREAMS; CREATE STREAM X (A INT) WITH (kafka_topic='x;");
        assert_eq!(done, vec!["LIST STREAMS"]);
        assert_eq!(tail, " CREATE STREAM X (A INT) WITH (kafka_topic='x;");

        let (done, tail) = split_terminated("SET 'a'='b';\n");
        assert_eq!(done, vec!["SET 'a'='b'"]);
        assert_eq!(tail, "\n");
    }
}
