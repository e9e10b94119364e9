//! Command status tracking
//!
//! The status board maps a statement id to either the callers waiting for
//! it (`Pending`) or its terminal status. The submission coordinator
//! registers a waiter *before* appending, so a status recorded by the
//! applier can never be missed. Terminal entries are kept for a bounded
//! retention window so a caller whose wait timed out can still look the
//! outcome up.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use tributary_core::StatementId;

/// Result payload of a successfully applied statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub offset: u64,
    pub message: String,
    /// Persistent query started by the statement, if any.
    pub query_id: Option<String>,
}

/// Terminal status of one command record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Applied(CommandOutcome),
    Failed { offset: u64, reason: String },
}

impl CommandStatus {
    pub fn offset(&self) -> u64 {
        match self {
            CommandStatus::Applied(outcome) => outcome.offset,
            CommandStatus::Failed { offset, .. } => *offset,
        }
    }
}

/// What the board knows about a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusView {
    Pending,
    Terminal(CommandStatus),
}

enum Entry {
    Pending(Vec<oneshot::Sender<CommandStatus>>),
    Terminal {
        status: CommandStatus,
        recorded_at: Instant,
    },
}

pub struct StatusBoard {
    entries: Mutex<HashMap<StatementId, Entry>>,
    retention: Duration,
}

impl StatusBoard {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Register interest in `id`.
    ///
    /// If the status is already terminal the receiver resolves immediately.
    pub async fn register(&self, id: &StatementId) -> oneshot::Receiver<CommandStatus> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(id) {
            Some(Entry::Terminal { status, .. }) => {
                let _ = tx.send(status.clone());
            }
            Some(Entry::Pending(waiters)) => waiters.push(tx),
            None => {
                entries.insert(id.clone(), Entry::Pending(vec![tx]));
            }
        }
        rx
    }

    /// Record the terminal status of `id` and wake every waiter.
    pub async fn complete(&self, id: &StatementId, status: CommandStatus) {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(
            id.clone(),
            Entry::Terminal {
                status: status.clone(),
                recorded_at: Instant::now(),
            },
        );
        if let Some(Entry::Pending(waiters)) = previous {
            debug!(statement_id = %id, waiters = waiters.len(), "Completing waiters");
            for waiter in waiters {
                let _ = waiter.send(status.clone());
            }
        }
    }

    /// Drop a pending registration whose append failed.
    ///
    /// Terminal entries are left alone.
    pub async fn abandon(&self, id: &StatementId) {
        let mut entries = self.entries.lock().await;
        if let Some(Entry::Pending(waiters)) = entries.get_mut(id) {
            waiters.retain(|w| !w.is_closed());
            if waiters.is_empty() {
                entries.remove(id);
            }
        }
    }

    /// Forget a terminal status the caller has observed.
    pub async fn observed(&self, id: &StatementId) {
        let mut entries = self.entries.lock().await;
        if matches!(entries.get(id), Some(Entry::Terminal { .. })) {
            entries.remove(id);
        }
    }

    pub async fn get(&self, id: &StatementId) -> Option<StatusView> {
        let entries = self.entries.lock().await;
        entries.get(id).map(|entry| match entry {
            Entry::Pending(_) => StatusView::Pending,
            Entry::Terminal { status, .. } => StatusView::Terminal(status.clone()),
        })
    }

    /// Drop terminal entries older than the retention window. Returns how many were removed.
    pub async fn gc(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let retention = self.retention;
        entries.retain(|_, entry| match entry {
            Entry::Pending(waiters) => !waiters.iter().all(|w| w.is_closed()),
            Entry::Terminal { recorded_at, .. } => recorded_at.elapsed() < retention,
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
