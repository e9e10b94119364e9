//! Statement submission
//!
//! [`StatementCoordinator::submit`] turns an asynchronous replication step
//! into a synchronous-looking call:
//!
//! 1. classify locally; only DDL is appended
//! 2. register a waiter on the status board (before the append, so the
//!    applier's status can never be missed)
//! 3. append to the command log
//! 4. wait, bounded, for the local applier to report the terminal status
//!
//! A timeout does not cancel the append. The record may still be applied
//! later; the caller gets [`EngineError::TimedOut`] and can look the status
//! up by statement id.
//!
//! [`SessionSubmitter`] adds per-session serialization and deterministic
//! statement ids: the sequence number only advances once a statement
//! reached a terminal status, so resubmitting after a timeout or an
//! unavailable log reuses the same id and is deduplicated by the applier.

use crate::error::{EngineError, Result};
use crate::statement::{StatementClassifier, StatementKind};
use crate::status::{CommandOutcome, CommandStatus, StatusBoard, StatusView};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tributary_core::{PendingCommand, StatementId};
use tributary_log::CommandLog;

pub struct StatementCoordinator {
    log: Arc<dyn CommandLog>,
    board: Arc<StatusBoard>,
    classifier: Arc<dyn StatementClassifier>,
}

impl StatementCoordinator {
    pub fn new(
        log: Arc<dyn CommandLog>,
        board: Arc<StatusBoard>,
        classifier: Arc<dyn StatementClassifier>,
    ) -> Self {
        Self {
            log,
            board,
            classifier,
        }
    }

    /// Submit one DDL statement and wait for its local terminal status.
    ///
    /// # Errors
    ///
    /// - `Malformed`: the text does not classify as DDL; nothing was appended
    /// - `LogUnavailable`: the append failed; nothing was appended, retryable
    /// - `ValidationFailed`: applied and rejected by its preconditions
    /// - `TimedOut`: appended, outcome unknown
    pub async fn submit(
        &self,
        statement_id: StatementId,
        statement_text: &str,
        properties: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        let statement = self.classifier.classify(statement_text)?;
        if statement.kind() != StatementKind::Ddl {
            return Err(EngineError::Malformed(format!(
                "Only DDL statements can be submitted to the command log: {}",
                statement_text.trim()
            )));
        }

        // A resubmission of a statement whose outcome is already known.
        if let Some(StatusView::Terminal(status)) = self.board.get(&statement_id).await {
            debug!(statement_id = %statement_id, "Statement already has a terminal status");
            self.board.observed(&statement_id).await;
            return into_result(status);
        }

        let waiter = self.board.register(&statement_id).await;
        let command = PendingCommand::new(statement_id.clone(), statement_text.trim())
            .with_properties(properties);
        let offset = match self.log.append(command).await {
            Ok(offset) => offset,
            Err(e) => {
                drop(waiter);
                self.board.abandon(&statement_id).await;
                warn!(statement_id = %statement_id, error = %e, "Append failed");
                return Err(e.into());
            }
        };
        debug!(statement_id = %statement_id, offset, "Statement appended");

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(status)) => {
                self.board.observed(&statement_id).await;
                info!(statement_id = %statement_id, offset, "Statement reached terminal status");
                into_result(status)
            }
            Ok(Err(_)) => Err(EngineError::NotReady(
                "the command applier stopped before the statement was applied".to_string(),
            )),
            Err(_) => {
                warn!(
                    statement_id = %statement_id,
                    offset,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for statement to be applied"
                );
                Err(EngineError::TimedOut {
                    statement_id,
                    offset,
                })
            }
        }
    }

    /// Last known status of a statement, if still retained.
    pub async fn status(&self, statement_id: &StatementId) -> Option<StatusView> {
        self.board.get(statement_id).await
    }
}

fn into_result(status: CommandStatus) -> Result<CommandOutcome> {
    match status {
        CommandStatus::Applied(outcome) => Ok(outcome),
        CommandStatus::Failed { reason, .. } => Err(EngineError::ValidationFailed(reason)),
    }
}

/// Serializes the submissions of one client session.
pub struct SessionSubmitter {
    session_id: String,
    sequence: Mutex<u64>,
    coordinator: Arc<StatementCoordinator>,
}

impl SessionSubmitter {
    pub fn new(session_id: impl Into<String>, coordinator: Arc<StatementCoordinator>) -> Self {
        Self {
            session_id: session_id.into(),
            sequence: Mutex::new(0),
            coordinator,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submit the session's next statement. Waits for any earlier submission
    /// of this session to finish first.
    pub async fn submit(
        &self,
        statement_text: &str,
        properties: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        let mut sequence = self.sequence.lock().await;
        let statement_id = StatementId::derive(&self.session_id, *sequence, statement_text);
        let result = self
            .coordinator
            .submit(statement_id, statement_text, properties, timeout)
            .await;
        if matches!(result, Ok(_) | Err(EngineError::ValidationFailed(_))) {
            *sequence += 1;
        }
        result
    }
}
