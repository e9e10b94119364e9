//! Query session manager
//!
//! Starts, tracks and stops the physical queries of one node. Each query
//! runs as its own Tokio task that pumps rows out of a [`RowSource`]:
//!
//! - a **persistent** query (`CREATE ... AS SELECT`) publishes every row into
//!   its sink topic until it is terminated; a failure is reported to the
//!   applier as a [`QueryEvent`]
//! - a **one-shot** query (a transient SELECT) feeds a bounded channel that the
//!   client drains through a [`ResultStream`]
//!
//! Stopping a query cancels its [`CancellationToken`], which unblocks the
//! pump even while it waits for the next row.

use crate::error::QueryError;
use crate::statement::QueryPlan;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tributary_core::config::AUTO_OFFSET_RESET;
use tributary_core::{Column, QueryDescriptor, QueryStatus, Row, ServerConfig};

type QueryResult<T> = std::result::Result<T, QueryError>;

/// Rows buffered between a one-shot query's pump and its consumer.
const RESULT_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Execution engine boundary
// ---------------------------------------------------------------------------

/// Pull-based row stream produced by the execution engine.
#[async_trait]
pub trait RowSource: Send {
    /// Next output row. `None` once the source is exhausted or stopped.
    async fn next_row(&mut self) -> Option<QueryResult<Row>>;
}

/// Where a new query starts reading its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl FromStr for OffsetReset {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(QueryError::Execution {
                query_id: String::new(),
                message: format!("invalid offset reset '{}'", other),
            }),
        }
    }
}

/// The streaming execution engine a node drives.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start executing `plan` and return its output rows.
    async fn start_physical_query(
        &self,
        query_id: &str,
        plan: &QueryPlan,
        reset: OffsetReset,
    ) -> QueryResult<Box<dyn RowSource>>;

    async fn stop_physical_query(&self, query_id: &str) -> QueryResult<()>;

    /// Write one row to a topic (the sink of a persistent query).
    async fn publish(&self, topic: &str, row: Row) -> QueryResult<()>;
}

// ---------------------------------------------------------------------------
// Launch requests and events
// ---------------------------------------------------------------------------

/// Everything needed to start one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLaunch {
    pub descriptor: QueryDescriptor,
    pub plan: QueryPlan,
    /// Topic persistent output is written to; `None` for one-shot queries.
    pub sink_topic: Option<String>,
}

/// Reported by persistent query tasks to the applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    Failed { query_id: String, message: String },
}

/// Resource limits for the manager.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Persistent and one-shot queries running at the same time.
    pub max_concurrent_queries: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// QueryHandle
// ---------------------------------------------------------------------------

/// Caller-side handle of a started query.
#[derive(Debug)]
pub struct QueryHandle {
    pub query_id: String,
    pub one_shot: bool,
    pub schema: Vec<Column>,
    limit: Option<u64>,
    cancel: CancellationToken,
    rows: Option<mpsc::Receiver<QueryResult<Row>>>,
}

impl QueryHandle {
    /// Token that stops the query when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct QueryEntry {
    one_shot: bool,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// QuerySessionManager
// ---------------------------------------------------------------------------

/// Tracks the physical queries running on this node.
#[derive(Clone)]
pub struct QuerySessionManager {
    engine: Arc<dyn ExecutionEngine>,
    config: Arc<ServerConfig>,
    limits: ResourceLimits,
    queries: Arc<RwLock<HashMap<String, QueryEntry>>>,
    events: mpsc::UnboundedSender<QueryEvent>,
    next_transient: Arc<AtomicU64>,
}

impl QuerySessionManager {
    /// Create a manager and the receiver for its query events.
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        config: Arc<ServerConfig>,
        limits: ResourceLimits,
    ) -> (Self, mpsc::UnboundedReceiver<QueryEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            engine,
            config,
            limits,
            queries: Arc::new(RwLock::new(HashMap::new())),
            events,
            next_transient: Arc::new(AtomicU64::new(0)),
        };
        (manager, events_rx)
    }

    /// Start a query.
    pub async fn start_query(&self, launch: QueryLaunch) -> QueryResult<QueryHandle> {
        let QueryLaunch {
            descriptor,
            plan,
            sink_topic,
        } = launch;
        let query_id = descriptor.id.clone();
        let one_shot = descriptor.is_one_shot();

        // The write lock is held across the engine call so two starts cannot
        // both pass the capacity check.
        let mut queries = self.queries.write().await;
        if queries.len() >= self.limits.max_concurrent_queries {
            return Err(QueryError::CapacityExceeded(
                self.limits.max_concurrent_queries,
            ));
        }
        if queries.contains_key(&query_id) {
            return Err(QueryError::Execution {
                query_id,
                message: "query is already running".to_string(),
            });
        }

        let sink_topic = match (one_shot, sink_topic) {
            (true, _) => None,
            (false, Some(topic)) => Some(topic),
            (false, None) => {
                return Err(QueryError::Execution {
                    query_id,
                    message: "persistent query has no sink topic".to_string(),
                })
            }
        };

        let reset = self.offset_reset(&descriptor.properties)?;
        let source = self
            .engine
            .start_physical_query(&query_id, &plan, reset)
            .await?;
        let cancel = CancellationToken::new();

        let (task, rows) = match sink_topic {
            None => {
                let (tx, rx) = mpsc::channel(RESULT_BUFFER);
                let task = tokio::spawn(self.clone().pump_to_client(
                    query_id.clone(),
                    source,
                    tx,
                    cancel.clone(),
                ));
                (task, Some(rx))
            }
            Some(topic) => {
                let task = tokio::spawn(self.clone().pump_to_sink(
                    query_id.clone(),
                    source,
                    topic,
                    cancel.clone(),
                ));
                (task, None)
            }
        };

        queries.insert(
            query_id.clone(),
            QueryEntry {
                one_shot,
                cancel: cancel.clone(),
                _task: task,
            },
        );
        info!(query_id = %query_id, one_shot, ?reset, "Query started");

        Ok(QueryHandle {
            query_id,
            one_shot,
            schema: plan.output_schema,
            limit: plan.limit,
            cancel,
            rows,
        })
    }

    /// Start a transient SELECT that serves a single client read.
    pub async fn start_transient(
        &self,
        statement_text: &str,
        plan: QueryPlan,
        properties: BTreeMap<String, String>,
    ) -> QueryResult<QueryHandle> {
        let n = self.next_transient.fetch_add(1, Ordering::Relaxed);
        let descriptor = QueryDescriptor {
            id: format!("TRANSIENT_{}_{}", plan.source, n),
            statement_text: statement_text.to_string(),
            sink: None,
            sources: vec![plan.source.clone()],
            status: QueryStatus::Running,
            error: None,
            row_limit: None,
            idle_timeout_ms: None,
            properties,
        };
        self.start_query(QueryLaunch {
            descriptor,
            plan,
            sink_topic: None,
        })
        .await
    }

    /// Stop a query and release its source.
    pub async fn terminate(&self, query_id: &str) -> QueryResult<()> {
        let entry = self
            .queries
            .write()
            .await
            .remove(query_id)
            .ok_or_else(|| QueryError::NotFound(query_id.to_string()))?;
        entry.cancel.cancel();
        if let Err(e) = self.engine.stop_physical_query(query_id).await {
            debug!(query_id = %query_id, error = %e, "Physical query already stopped");
        }
        info!(query_id = %query_id, one_shot = entry.one_shot, "Query terminated");
        Ok(())
    }

    /// Stop every query. Used on node shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.queries.read().await.keys().cloned().collect();
        for id in ids {
            let _ = self.terminate(&id).await;
        }
    }

    pub async fn is_running(&self, query_id: &str) -> bool {
        self.queries.read().await.contains_key(query_id)
    }

    /// Ids of running queries in name order.
    pub async fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.queries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Consume the client-visible rows of a one-shot query.
    ///
    /// `row_limit` and `idle_timeout` of `None` disable the respective bound.
    pub fn stream_results(
        &self,
        mut handle: QueryHandle,
        row_limit: Option<u64>,
        idle_timeout: Option<Duration>,
    ) -> QueryResult<ResultStream> {
        let rows = handle
            .rows
            .take()
            .ok_or_else(|| QueryError::NotStreamable(handle.query_id.clone()))?;
        let row_limit = match (row_limit, handle.limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Ok(ResultStream {
            manager: self.clone(),
            query_id: handle.query_id.clone(),
            schema: std::mem::take(&mut handle.schema),
            one_shot: handle.one_shot,
            cancel: handle.cancel.clone(),
            rows,
            row_limit,
            idle_timeout,
            delivered: 0,
            ended: None,
        })
    }

    fn offset_reset(&self, properties: &BTreeMap<String, String>) -> QueryResult<OffsetReset> {
        let resolved = self
            .config
            .resolve_with(properties, AUTO_OFFSET_RESET)
            .map_err(|e| QueryError::Execution {
                query_id: String::new(),
                message: e.to_string(),
            })?;
        resolved.value.parse()
    }

    /// Remove the entry of a query whose task ended on its own.
    async fn finished(&self, query_id: &str) {
        if self.queries.write().await.remove(query_id).is_some() {
            let _ = self.engine.stop_physical_query(query_id).await;
            debug!(query_id = %query_id, "Query task finished");
        }
    }

    async fn pump_to_client(
        self,
        query_id: String,
        mut source: Box<dyn RowSource>,
        tx: mpsc::Sender<QueryResult<Row>>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = source.next_row() => next,
            };
            let Some(item) = next else { break };
            let failed = item.is_err();
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(item) => if sent.is_err() { break },
            }
            if failed {
                break;
            }
        }
        self.finished(&query_id).await;
    }

    async fn pump_to_sink(
        self,
        query_id: String,
        mut source: Box<dyn RowSource>,
        topic: String,
        cancel: CancellationToken,
    ) {
        let mut published = 0u64;
        let failure = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break None,
                next = source.next_row() => next,
            };
            match next {
                Some(Ok(row)) => {
                    if let Err(e) = self.engine.publish(&topic, row).await {
                        break Some(e.to_string());
                    }
                    published += 1;
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };

        debug!(query_id = %query_id, published, "Persistent query pump stopped");
        if cancel.is_cancelled() {
            return;
        }
        self.finished(&query_id).await;
        if let Some(message) = failure {
            warn!(query_id = %query_id, error = %message, "Persistent query failed");
            let _ = self.events.send(QueryEvent::Failed { query_id, message });
        }
    }
}

// ---------------------------------------------------------------------------
// ResultStream
// ---------------------------------------------------------------------------

/// Why a result stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The row limit was delivered.
    LimitReached,
    /// No row arrived within the idle window.
    IdleTimeout,
    /// The consumer cancelled the stream.
    Cancelled,
    /// The source has no more rows.
    Exhausted,
    /// The query failed; fatal to this query only.
    Failed(QueryError),
}

impl EndReason {
    /// True for the end reasons that are not errors.
    pub fn is_normal(&self) -> bool {
        !matches!(self, EndReason::Failed(_))
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LimitReached => f.write_str("Limit Reached"),
            EndReason::IdleTimeout => f.write_str("Query idle timeout"),
            EndReason::Cancelled => f.write_str("Query terminated"),
            EndReason::Exhausted => f.write_str("Query completed"),
            EndReason::Failed(e) => write!(f, "Query failed: {}", e),
        }
    }
}

enum Received {
    Item(Option<QueryResult<Row>>),
    Idle,
    Cancelled,
}

/// Bounded, cancellable sequence of a one-shot query's rows.
pub struct ResultStream {
    manager: QuerySessionManager,
    query_id: String,
    schema: Vec<Column>,
    one_shot: bool,
    cancel: CancellationToken,
    rows: mpsc::Receiver<QueryResult<Row>>,
    row_limit: Option<u64>,
    idle_timeout: Option<Duration>,
    delivered: u64,
    ended: Option<EndReason>,
}

impl ResultStream {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn schema(&self) -> &[Column] {
        &self.schema
    }

    /// Token that ends the stream with [`EndReason::Cancelled`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Why the stream ended, once it has.
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.ended.as_ref()
    }

    /// Next row. `None` when the stream has ended; see [`end_reason`](Self::end_reason).
    pub async fn next(&mut self) -> Option<Row> {
        if self.ended.is_some() {
            return None;
        }
        if self.row_limit.is_some_and(|limit| self.delivered >= limit) {
            self.finish(EndReason::LimitReached).await;
            return None;
        }

        let received = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Received::Cancelled,
            received = recv_within(&mut self.rows, self.idle_timeout) => received,
        };

        match received {
            Received::Item(Some(Ok(row))) => {
                self.delivered += 1;
                if self.row_limit == Some(self.delivered) {
                    self.finish(EndReason::LimitReached).await;
                }
                Some(row)
            }
            Received::Item(Some(Err(e))) => {
                self.finish(EndReason::Failed(e)).await;
                None
            }
            Received::Item(None) => {
                // A cancelled pump closes the channel too.
                let reason = if self.cancel.is_cancelled() {
                    EndReason::Cancelled
                } else {
                    EndReason::Exhausted
                };
                self.finish(reason).await;
                None
            }
            Received::Idle => {
                self.finish(EndReason::IdleTimeout).await;
                None
            }
            Received::Cancelled => {
                self.finish(EndReason::Cancelled).await;
                None
            }
        }
    }

    /// Drain the stream.
    pub async fn collect(mut self) -> (Vec<Row>, EndReason) {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row);
        }
        let reason = self.ended.clone().unwrap_or(EndReason::Exhausted);
        (rows, reason)
    }

    async fn finish(&mut self, reason: EndReason) {
        debug!(query_id = %self.query_id, delivered = self.delivered, reason = %reason, "Result stream ended");
        self.ended = Some(reason);
        if self.one_shot {
            let _ = self.manager.terminate(&self.query_id).await;
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        if self.one_shot && self.ended.is_none() {
            // The pump sees the cancellation and releases the query.
            self.cancel.cancel();
        }
    }
}

async fn recv_within(
    rows: &mut mpsc::Receiver<QueryResult<Row>>,
    idle_timeout: Option<Duration>,
) -> Received {
    match idle_timeout {
        Some(window) => match tokio::time::timeout(window, rows.recv()).await {
            Ok(item) => Received::Item(item),
            Err(_) => Received::Idle,
        },
        None => Received::Item(rows.recv().await),
    }
}
