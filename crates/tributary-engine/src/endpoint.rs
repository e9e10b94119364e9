//! Server endpoint boundary
//!
//! [`ServerEndpoint`] is what a client session talks to. The transport is
//! not part of this crate; [`LocalEndpoint`] serves a session directly from
//! an in-process [`Node`].

use crate::coordinator::SessionSubmitter;
use crate::error::{EngineError, Result};
use crate::functions::{FunctionDescriptor, FunctionKind};
use crate::node::Node;
use crate::query::ResultStream;
use crate::statement::Statement;
use crate::status::CommandOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use tributary_core::config::{COMMAND_WAIT_TIMEOUT_MS, QUERY_IDLE_TIMEOUT_MS, QUERY_ROW_LIMIT};
use tributary_core::{
    EntityDescriptor, EntityKind, QueryDescriptor, RegisteredTopic, SerializationFormat, Version,
};

/// What a client learns about the server before doing anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub cluster_id: String,
    pub service_id: String,
    /// Server-wide property overrides; the client layers its session scope on top.
    pub properties: BTreeMap<String, String>,
}

#[async_trait]
pub trait ServerEndpoint: Send + Sync {
    async fn server_info(&self) -> Result<ServerInfo>;

    /// Fails with `VersionIncompatible` when the server no longer serves `client`.
    async fn check_client_version(&self, client: &Version) -> Result<()>;

    /// Submit a DDL statement on behalf of `session_id`.
    async fn submit_statement(
        &self,
        session_id: &str,
        statement_text: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<CommandOutcome>;

    /// Run a transient SELECT and stream its rows.
    async fn stream_query(
        &self,
        statement_text: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ResultStream>;

    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<EntityDescriptor>>;

    async fn list_queries(&self) -> Result<Vec<QueryDescriptor>>;

    async fn list_topics(&self) -> Result<Vec<RegisteredTopic>>;

    async fn list_functions(&self) -> Result<Vec<(String, FunctionKind)>>;

    async fn describe_entity(&self, name: &str) -> Result<EntityDescriptor>;

    async fn describe_topic(&self, name: &str) -> Result<RegisteredTopic>;

    async fn describe_function(&self, name: &str) -> Result<FunctionDescriptor>;

    /// Release whatever the server holds for `session_id`.
    async fn close_session(&self, session_id: &str) -> Result<()>;
}

/// Endpoint backed by a node in the same process.
pub struct LocalEndpoint {
    node: Arc<Node>,
    submitters: Mutex<HashMap<String, Arc<SessionSubmitter>>>,
}

impl LocalEndpoint {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            submitters: Mutex::new(HashMap::new()),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Sessions that have submitted a statement and are not closed yet.
    pub async fn open_sessions(&self) -> usize {
        self.submitters.lock().await.len()
    }

    async fn submitter(&self, session_id: &str) -> Arc<SessionSubmitter> {
        let mut submitters = self.submitters.lock().await;
        submitters
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "New session submitter");
                Arc::new(SessionSubmitter::new(
                    session_id,
                    self.node.coordinator().clone(),
                ))
            })
            .clone()
    }

    /// The command log, listed like any registered topic.
    fn command_topic(&self) -> RegisteredTopic {
        let topic = self.node.log().topic_name();
        RegisteredTopic {
            name: topic.to_uppercase(),
            kafka_topic: topic.to_string(),
            format: SerializationFormat::Json,
        }
    }

    /// A non-zero integer property, `None` when disabled.
    fn optional_limit(&self, overrides: &BTreeMap<String, String>, name: &str) -> Result<Option<u64>> {
        let value = self.node.server_config().resolve_u64_with(overrides, name)?;
        Ok((value > 0).then_some(value))
    }
}

#[async_trait]
impl ServerEndpoint for LocalEndpoint {
    async fn server_info(&self) -> Result<ServerInfo> {
        let config = self.node.config();
        let service_id = self
            .node
            .server_config()
            .resolve(tributary_core::config::SERVICE_ID)?
            .value;
        Ok(ServerInfo {
            version: self.node.version().to_string(),
            cluster_id: config.cluster_id.clone(),
            service_id,
            properties: self.node.server_config().overrides().clone(),
        })
    }

    async fn check_client_version(&self, client: &Version) -> Result<()> {
        let Some(minimum) = &self.node.config().min_client_version else {
            return Ok(());
        };
        let minimum: Version = minimum.parse()?;
        if client < &minimum {
            return Err(EngineError::VersionIncompatible {
                server_version: self.node.version().to_string(),
                message: format!(
                    "Minimum supported client version: {}. Please upgrade.",
                    minimum
                ),
            });
        }
        Ok(())
    }

    async fn submit_statement(
        &self,
        session_id: &str,
        statement_text: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<CommandOutcome> {
        let timeout_ms = self
            .node
            .server_config()
            .resolve_u64_with(overrides, COMMAND_WAIT_TIMEOUT_MS)?;
        let submitter = self.submitter(session_id).await;
        submitter
            .submit(
                statement_text,
                overrides.clone(),
                Duration::from_millis(timeout_ms),
            )
            .await
    }

    async fn stream_query(
        &self,
        statement_text: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ResultStream> {
        let select = match self.node.classifier().classify(statement_text)? {
            Statement::Select(select) => select,
            _ => {
                return Err(EngineError::Malformed(format!(
                    "Not a query: {}",
                    statement_text.trim()
                )))
            }
        };
        let metadata = self.node.metadata();
        let plan = self.node.classifier().plan(&select, &metadata)?;

        let row_limit = self.optional_limit(overrides, QUERY_ROW_LIMIT)?;
        let idle_timeout = self
            .optional_limit(overrides, QUERY_IDLE_TIMEOUT_MS)?
            .map(Duration::from_millis);

        let queries = self.node.queries();
        let handle = queries
            .start_transient(statement_text.trim(), plan, overrides.clone())
            .await?;
        info!(query_id = %handle.query_id, ?row_limit, ?idle_timeout, "Streaming query started");
        Ok(queries.stream_results(handle, row_limit, idle_timeout)?)
    }

    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<EntityDescriptor>> {
        Ok(self
            .node
            .metadata()
            .entities_of(kind)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list_queries(&self) -> Result<Vec<QueryDescriptor>> {
        Ok(self.node.metadata().queries.values().cloned().collect())
    }

    async fn list_topics(&self) -> Result<Vec<RegisteredTopic>> {
        let mut topics: Vec<RegisteredTopic> =
            self.node.metadata().topics.values().cloned().collect();
        topics.push(self.command_topic());
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn list_functions(&self) -> Result<Vec<(String, FunctionKind)>> {
        Ok(self
            .node
            .functions()
            .list()
            .into_iter()
            .map(|(name, kind)| (name.to_string(), kind))
            .collect())
    }

    async fn describe_entity(&self, name: &str) -> Result<EntityDescriptor> {
        self.node
            .metadata()
            .entity(name)
            .cloned()
            .ok_or_else(|| EngineError::EntityNotFound(name.to_string()))
    }

    async fn describe_topic(&self, name: &str) -> Result<RegisteredTopic> {
        let command_topic = self.command_topic();
        if command_topic.name.eq_ignore_ascii_case(name) {
            return Ok(command_topic);
        }
        self.node
            .metadata()
            .topic(name)
            .cloned()
            .ok_or_else(|| EngineError::TopicNotFound(name.to_string()))
    }

    async fn describe_function(&self, name: &str) -> Result<FunctionDescriptor> {
        self.node.functions().describe(name).cloned()
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        if self.submitters.lock().await.remove(session_id).is_some() {
            debug!(session_id = %session_id, "Session submitter released");
        }
        Ok(())
    }
}
