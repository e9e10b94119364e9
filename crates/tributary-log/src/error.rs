//! Command Log Error Types
//!
//! ## Error Categories
//!
//! - `Unavailable`: the durable store cannot be reached; the append was not
//!   acknowledged and may be retried by the caller
//! - `Io`: a filesystem operation failed
//! - `Corrupt`: a stored frame failed its checksum or broke the offset sequence
//! - `Serialization`: a record payload could not be encoded or decoded
//! - `Closed`: the log was shut down while a caller was waiting on it

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Command log unavailable: {0}")]
    Unavailable(String),

    #[error("Command log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt command log at byte {position}: {reason}")]
    Corrupt { position: u64, reason: String },

    #[error("Command record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Command log closed")]
    Closed,
}

impl LogError {
    /// True when retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::Unavailable(_) | LogError::Io(_))
    }
}
