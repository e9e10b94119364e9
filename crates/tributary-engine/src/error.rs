//! Engine error types
//!
//! `EngineError` is what the coordinator, the endpoint and the client
//! session surface to callers. `QueryError` is confined to a single
//! streaming query and never affects other queries or the applier.

use thiserror::Error;
use tributary_core::StatementId;
use tributary_log::LogError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The command log could not take the append. Nothing was appended; retryable.
    #[error("Command log unavailable: {0}")]
    LogUnavailable(String),

    /// The statement was applied and rejected by its preconditions.
    #[error("{0}")]
    ValidationFailed(String),

    /// The statement was appended but not applied locally within the wait.
    /// It may still be applied later.
    #[error("Timed out waiting for statement {statement_id} (offset {offset}) to be applied; its outcome is unknown")]
    TimedOut { statement_id: StatementId, offset: u64 },

    #[error("This CLI version no longer supported: {message}")]
    VersionIncompatible {
        server_version: String,
        message: String,
    },

    #[error("Remote server address may not be valid: {0}")]
    Unreachable(String),

    #[error("Could not find STREAM/TABLE '{0}' in the metastore")]
    EntityNotFound(String),

    #[error("Could not find registered topic '{0}'")]
    TopicNotFound(String),

    #[error("Can't find any functions with the name '{0}'")]
    FunctionNotFound(String),

    #[error("{0}")]
    Malformed(String),

    #[error("Node not ready: {0}")]
    NotReady(String),

    #[error(transparent)]
    Config(#[from] tributary_core::Error),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Command log error: {0}")]
    Log(LogError),

    #[error("Invalid node configuration: {0}")]
    NodeConfig(String),
}

impl From<LogError> for EngineError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Unavailable(reason) => EngineError::LogUnavailable(reason),
            other => EngineError::Log(other),
        }
    }
}

impl EngineError {
    /// True when the caller may resubmit the same statement.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LogUnavailable(_))
    }
}

/// Failures scoped to one streaming query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Query {0} not found")]
    NotFound(String),

    #[error("Query {query_id} failed: {message}")]
    Execution { query_id: String, message: String },

    #[error("Too many running queries (limit {0})")]
    CapacityExceeded(usize),

    #[error("Query {0} is not a client query and has no result stream")]
    NotStreamable(String),

    #[error("Unknown source '{0}'")]
    UnknownSource(String),
}
