//! In-memory execution engine
//!
//! Topics are append-only vectors of rows. Sources tail a topic from the
//! position chosen by the offset reset and evaluate the query plan on each
//! row. Used by the CLI's embedded node and by tests, which can also inject
//! a failure into every source reading a topic.

use crate::error::QueryError;
use crate::query::{ExecutionEngine, OffsetReset, RowSource};
use crate::statement::QueryPlan;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tributary_core::Row;

struct Topic {
    rows: RwLock<Vec<Row>>,
    failure: RwLock<Option<String>>,
    /// Bumped on every append or injected failure.
    changed: watch::Sender<u64>,
}

impl Topic {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            rows: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
            changed,
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version += 1);
    }
}

#[derive(Default)]
struct Inner {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

/// Execution engine over in-memory topics.
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    inner: Arc<Inner>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.inner.topics.read().await.get(name) {
            return topic.clone();
        }
        self.inner
            .topics
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone()
    }

    /// Append a row to `topic`, creating it if needed.
    pub async fn produce(&self, topic: &str, row: Row) {
        let topic = self.topic(topic).await;
        topic.rows.write().await.push(row);
        topic.notify();
    }

    /// Snapshot of every row in `topic`.
    pub async fn rows(&self, topic: &str) -> Vec<Row> {
        match self.inner.topics.read().await.get(topic) {
            Some(topic) => topic.rows.read().await.clone(),
            None => Vec::new(),
        }
    }

    /// Wait until `topic` holds at least `count` rows or `timeout` passes,
    /// then return its rows.
    pub async fn wait_for_rows(&self, topic: &str, count: usize, timeout: Duration) -> Vec<Row> {
        let handle = self.topic(topic).await;
        let mut changes = handle.changed.subscribe();
        let _ = tokio::time::timeout(timeout, async {
            loop {
                if handle.rows.read().await.len() >= count {
                    return;
                }
                if changes.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        let rows = handle.rows.read().await.clone();
        rows
    }

    /// Make every source reading `topic` fail with `message`.
    pub async fn inject_failure(&self, topic: &str, message: &str) {
        let topic = self.topic(topic).await;
        *topic.failure.write().await = Some(message.to_string());
        topic.notify();
    }

    pub async fn clear_failure(&self, topic: &str) {
        let topic = self.topic(topic).await;
        *topic.failure.write().await = None;
    }

    /// Ids of physical queries currently started.
    pub async fn running_queries(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.running.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ExecutionEngine for InMemoryEngine {
    async fn start_physical_query(
        &self,
        query_id: &str,
        plan: &QueryPlan,
        reset: OffsetReset,
    ) -> Result<Box<dyn RowSource>, QueryError> {
        let topic = self.topic(&plan.source_topic).await;
        let position = match reset {
            OffsetReset::Earliest => 0,
            OffsetReset::Latest => topic.rows.read().await.len(),
        };
        let stop = CancellationToken::new();
        self.inner
            .running
            .lock()
            .await
            .insert(query_id.to_string(), stop.clone());
        debug!(query_id = %query_id, topic = %plan.source_topic, position, "Physical query started");

        Ok(Box::new(TopicSource {
            query_id: query_id.to_string(),
            changes: topic.changed.subscribe(),
            topic,
            position,
            plan: plan.clone(),
            stop,
        }))
    }

    async fn stop_physical_query(&self, query_id: &str) -> Result<(), QueryError> {
        let stop = self
            .inner
            .running
            .lock()
            .await
            .remove(query_id)
            .ok_or_else(|| QueryError::NotFound(query_id.to_string()))?;
        stop.cancel();
        debug!(query_id = %query_id, "Physical query stopped");
        Ok(())
    }

    async fn publish(&self, topic: &str, row: Row) -> Result<(), QueryError> {
        self.produce(topic, row).await;
        Ok(())
    }
}

struct TopicSource {
    query_id: String,
    topic: Arc<Topic>,
    changes: watch::Receiver<u64>,
    position: usize,
    plan: QueryPlan,
    stop: CancellationToken,
}

#[async_trait]
impl RowSource for TopicSource {
    async fn next_row(&mut self) -> Option<Result<Row, QueryError>> {
        loop {
            if self.stop.is_cancelled() {
                return None;
            }
            // Mark the current version seen before reading, so an append
            // racing with the read still wakes the wait below.
            let _ = self.changes.borrow_and_update();

            if let Some(message) = self.topic.failure.read().await.clone() {
                return Some(Err(QueryError::Execution {
                    query_id: self.query_id.clone(),
                    message,
                }));
            }

            let next = self.topic.rows.read().await.get(self.position).cloned();
            match next {
                Some(row) => {
                    self.position += 1;
                    if let Some(output) = self.plan.evaluate(&row) {
                        return Some(Ok(output));
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.stop.cancelled() => return None,
                        changed = self.changes.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }
}
