//! Tributary Engine
//!
//! The per-node half of the control plane. Every node tails the shared
//! command log with one [`CommandApplier`], so all nodes converge on the same
//! [`MetadataSnapshot`]; submissions block on the local applier through the
//! [`StatementCoordinator`]; accepted queries run under the
//! [`QuerySessionManager`].
//!
//! ## Flow
//!
//! ```text
//! ClientSession ─▶ ServerEndpoint ─▶ StatementCoordinator ──append──▶ CommandLog
//!                                         ▲                              │
//!                                         │ status                       ▼ subscribe
//!                                    StatusBoard ◀──complete── CommandApplier (one per node)
//!                                                                        │ effects
//!                                                                        ▼
//!                                                             QuerySessionManager ─▶ ExecutionEngine
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tributary_engine::{ClientSession, InMemoryEngine, LocalEndpoint, Node, NodeConfig};
//! use tributary_log::InMemoryCommandLog;
//!
//! let log = Arc::new(InMemoryCommandLog::default());
//! let node = Node::start(NodeConfig::default(), log, Arc::new(InMemoryEngine::new())).await?;
//! let endpoint = Arc::new(LocalEndpoint::new(Arc::new(node)));
//! let mut session = ClientSession::connect(endpoint, &Version::current(), None).await?;
//! session.execute("CREATE STREAM ORDERS (ID INT) WITH (kafka_topic='orders', value_format='JSON');").await?;
//! ```

pub mod applier;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod functions;
pub mod memory_engine;
pub mod metadata;
pub mod node;
pub mod query;
pub mod session;
pub mod statement;
pub mod status;

pub use applier::{ApplierSettings, CommandApplier};
pub use coordinator::{SessionSubmitter, StatementCoordinator};
pub use endpoint::{LocalEndpoint, ServerEndpoint, ServerInfo};
pub use error::{EngineError, QueryError, Result};
pub use functions::{FunctionDescriptor, FunctionKind, FunctionRegistry};
pub use memory_engine::InMemoryEngine;
pub use metadata::{AppliedState, ApplyStep, Effect, MetadataSnapshot};
pub use node::{Node, NodeConfig};
pub use query::{
    EndReason, ExecutionEngine, OffsetReset, QueryHandle, QueryLaunch, QuerySessionManager,
    ResourceLimits, ResultStream, RowSource,
};
pub use session::{split_statements, split_terminated, ClientSession, HistoryEntry, StatementResult};
pub use statement::{
    DescribeTarget, ListTarget, QueryPlan, SqlClassifier, Statement, StatementClassifier,
    StatementKind,
};
pub use status::{CommandOutcome, CommandStatus, StatusBoard, StatusView};
