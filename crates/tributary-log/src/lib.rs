//! Tributary Command Log
//!
//! The command log is the append-only, totally ordered sequence of accepted
//! statements that every node in a cluster applies in the same order.
//!
//! ## Guarantees
//!
//! - **Total order**: a single sequencer assigns offsets; offsets start at 0 and
//!   increase by exactly one per record
//! - **No loss after acknowledgement**: once `append` returns an offset the
//!   record is never reordered or dropped
//! - **Restartable subscriptions**: `subscribe(from)` yields every record with
//!   `offset >= from`, then waits for new ones; each subscriber keeps its own
//!   position and delivery is at-least-once across resubscriptions
//!
//! ## Architecture
//!
//! ```text
//! Coordinator ──append──▶ [sequencer] ──▶ durable store
//!                              │
//!                              ▼
//!                         LogIndex ──watch(end offset)──▶ CommandSubscription (one per applier)
//! ```
//!
//! ## Implementations
//!
//! - [`InMemoryCommandLog`]: process-local log shared by every node in one
//!   process; supports simulated unavailability
//! - [`FileCommandLog`]: CRC-framed append-only file with a writer task that
//!   group-commits appends; recovers by replaying the file on open

pub mod error;
pub mod file;
mod index;
pub mod memory;

pub use error::{LogError, Result};
pub use file::{FileCommandLog, FileLogConfig, SyncPolicy};
pub use index::CommandSubscription;
pub use memory::InMemoryCommandLog;

use async_trait::async_trait;
use tributary_core::PendingCommand;

/// Durable, ordered, append-only store of command records.
///
/// Implementations must be safe to share between the submission coordinator
/// and the appliers of every node using the log (`Arc<dyn CommandLog>`).
#[async_trait]
pub trait CommandLog: Send + Sync {
    /// Sequence and durably store a command.
    ///
    /// # Returns
    ///
    /// The offset assigned to the record.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached; nothing was appended
    /// - `Io` / `Serialization`: the record could not be written
    async fn append(&self, command: PendingCommand) -> Result<u64>;

    /// Open a read position at `from_offset`.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    async fn subscribe(&self, from_offset: u64) -> Result<CommandSubscription>;

    /// Offset that the next appended record will receive.
    async fn end_offset(&self) -> Result<u64>;

    /// Name under which the log itself is listed among registered topics.
    fn topic_name(&self) -> &str;
}
