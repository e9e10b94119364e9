//! Node assembly
//!
//! A [`Node`] owns one applier, one status board, one query session manager
//! and one coordinator, all sharing a command log with the other nodes of
//! the cluster. [`Node::start`] blocks until the existing log has been
//! replayed; the returned node is ready for submissions.

use crate::applier::{ApplierSettings, CommandApplier};
use crate::coordinator::StatementCoordinator;
use crate::error::{EngineError, Result};
use crate::functions::FunctionRegistry;
use crate::metadata::{AppliedState, MetadataSnapshot};
use crate::query::{ExecutionEngine, QuerySessionManager, ResourceLimits};
use crate::statement::{SqlClassifier, StatementClassifier};
use crate::status::StatusBoard;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tributary_core::{ServerConfig, Version};
use tributary_log::CommandLog;

/// Node settings, loadable from TOML.
///
/// ```toml
/// node_id = "node-1"
/// cluster_id = "tributary"
///
/// [properties]
/// "command.wait.timeout.ms" = "10000"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub cluster_id: String,
    /// How long terminal command statuses are kept.
    pub status_retention_ms: u64,
    /// Statement ids remembered for deduplication.
    pub processed_capacity: usize,
    pub max_concurrent_queries: usize,
    pub retry_backoff_ms: u64,
    pub gc_interval_ms: u64,
    /// Oldest client version this node serves.
    pub min_client_version: Option<String>,
    /// Server-wide property overrides.
    pub properties: BTreeMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            cluster_id: "tributary".to_string(),
            status_retention_ms: 10 * 60 * 1000,
            processed_capacity: crate::metadata::DEFAULT_PROCESSED_CAPACITY,
            max_concurrent_queries: ResourceLimits::default().max_concurrent_queries,
            retry_backoff_ms: 200,
            gc_interval_ms: 30_000,
            min_client_version: None,
            properties: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| EngineError::NodeConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::NodeConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    fn applier_settings(&self) -> ApplierSettings {
        ApplierSettings {
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            gc_interval: Duration::from_millis(self.gc_interval_ms.max(1)),
        }
    }
}

/// One member of the cluster.
pub struct Node {
    config: NodeConfig,
    server_config: Arc<ServerConfig>,
    log: Arc<dyn CommandLog>,
    classifier: Arc<dyn StatementClassifier>,
    coordinator: Arc<StatementCoordinator>,
    queries: QuerySessionManager,
    functions: Arc<FunctionRegistry>,
    metadata: watch::Receiver<Arc<MetadataSnapshot>>,
    shutdown: CancellationToken,
    applier_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Replay the log, start the running queries and spawn the apply loop.
    pub async fn start(
        config: NodeConfig,
        log: Arc<dyn CommandLog>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<Self> {
        let server_config = Arc::new(ServerConfig::from_overrides(&config.properties)?);
        let classifier: Arc<dyn StatementClassifier> = Arc::new(SqlClassifier);
        let board = Arc::new(StatusBoard::new(Duration::from_millis(
            config.status_retention_ms,
        )));
        let (queries, query_events) = QuerySessionManager::new(
            engine,
            server_config.clone(),
            ResourceLimits {
                max_concurrent_queries: config.max_concurrent_queries,
            },
        );

        let mut applier = CommandApplier::new(
            log.clone(),
            AppliedState::new(config.processed_capacity),
            classifier.clone(),
            server_config.clone(),
            board.clone(),
            queries.clone(),
            query_events,
            config.applier_settings(),
        );
        applier.replay().await?;
        applier.start_running_queries().await;
        let metadata = applier.subscribe_metadata();

        let shutdown = CancellationToken::new();
        let applier_task = tokio::spawn(applier.run(shutdown.clone()));
        let coordinator = Arc::new(StatementCoordinator::new(
            log.clone(),
            board,
            classifier.clone(),
        ));

        info!(node_id = %config.node_id, cluster_id = %config.cluster_id, "Node ready");
        Ok(Self {
            config,
            server_config,
            log,
            classifier,
            coordinator,
            queries,
            functions: Arc::new(FunctionRegistry::builtin()),
            metadata,
            shutdown,
            applier_task: Mutex::new(Some(applier_task)),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn server_config(&self) -> &Arc<ServerConfig> {
        &self.server_config
    }

    pub fn log(&self) -> &Arc<dyn CommandLog> {
        &self.log
    }

    pub fn classifier(&self) -> &Arc<dyn StatementClassifier> {
        &self.classifier
    }

    pub fn coordinator(&self) -> &Arc<StatementCoordinator> {
        &self.coordinator
    }

    pub fn queries(&self) -> &QuerySessionManager {
        &self.queries
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn version(&self) -> Version {
        Version::current()
    }

    /// Latest applied metadata.
    pub fn metadata(&self) -> Arc<MetadataSnapshot> {
        self.metadata.borrow().clone()
    }

    /// Wait until the record at `offset` has been applied on this node.
    pub async fn wait_for_offset(&self, offset: u64, timeout: Duration) -> Result<Arc<MetadataSnapshot>> {
        let mut metadata = self.metadata.clone();
        let reached = tokio::time::timeout(timeout, async {
            loop {
                let snapshot = metadata.borrow_and_update().clone();
                if snapshot.last_applied.is_some_and(|applied| applied >= offset) {
                    return Ok(snapshot);
                }
                if metadata.changed().await.is_err() {
                    return Err(EngineError::NotReady("command applier stopped".to_string()));
                }
            }
        })
        .await;
        reached.unwrap_or_else(|_| {
            Err(EngineError::NotReady(format!(
                "offset {} not applied within {:?}",
                offset, timeout
            )))
        })
    }

    /// Stop the apply loop and every running query.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.applier_task.lock().await.take() {
            let _ = task.await;
        }
        info!(node_id = %self.config.node_id, "Node stopped");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_from_toml() {
        let config = NodeConfig::from_toml_str(
            r#"
            node_id = "node-7"
            max_concurrent_queries = 3

            [properties]
            "command.wait.timeout.ms" = "500"
            "auto.offset.reset" = "earliest"
            "#,
        )
        .unwrap();
        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.max_concurrent_queries, 3);
        assert_eq!(config.cluster_id, "tributary");
        assert_eq!(config.properties.len(), 2);

        let server = ServerConfig::from_overrides(&config.properties).unwrap();
        assert_eq!(
            server.resolve("streams.auto.offset.reset").unwrap().value,
            "earliest"
        );
    }

    #[test]
    fn test_node_config_rejects_bad_toml() {
        assert!(matches!(
            NodeConfig::from_toml_str("node_id = 5"),
            Err(EngineError::NodeConfig(_))
        ));
    }
}
