//! Command applier
//!
//! One applier per node tails the command log and feeds every record, in
//! offset order, through [`AppliedState::apply`]. For each record it then
//!
//! 1. publishes the new metadata snapshot
//! 2. runs the record's effects (starting or stopping persistent queries)
//! 3. completes the statement's entry on the status board
//!
//! Startup is split in two: [`CommandApplier::replay`] applies the whole
//! existing log without running effects or reporting statuses, then
//! [`CommandApplier::start_running_queries`] starts every query the replayed
//! state says is running. Only then is the node ready for submissions.
//!
//! Log errors are never fatal to the loop: the applier backs off and
//! resubscribes from its next expected offset.

use crate::error::{EngineError, Result};
use crate::metadata::{AppliedState, ApplyStep, Effect, MetadataSnapshot};
use crate::query::{QueryEvent, QuerySessionManager};
use crate::statement::StatementClassifier;
use crate::status::{CommandStatus, StatusBoard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_core::{CommandRecord, ServerConfig};
use tributary_log::{CommandLog, CommandSubscription};

/// Timing knobs of the apply loop.
#[derive(Debug, Clone)]
pub struct ApplierSettings {
    /// Wait before resubscribing after a log error.
    pub retry_backoff: Duration,
    /// How often terminal statuses past their retention are dropped.
    pub gc_interval: Duration,
}

impl Default for ApplierSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(200),
            gc_interval: Duration::from_secs(30),
        }
    }
}

pub struct CommandApplier {
    log: Arc<dyn CommandLog>,
    state: AppliedState,
    classifier: Arc<dyn StatementClassifier>,
    config: Arc<ServerConfig>,
    board: Arc<StatusBoard>,
    queries: QuerySessionManager,
    query_events: mpsc::UnboundedReceiver<QueryEvent>,
    snapshot: watch::Sender<Arc<MetadataSnapshot>>,
    settings: ApplierSettings,
}

impl CommandApplier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Arc<dyn CommandLog>,
        state: AppliedState,
        classifier: Arc<dyn StatementClassifier>,
        config: Arc<ServerConfig>,
        board: Arc<StatusBoard>,
        queries: QuerySessionManager,
        query_events: mpsc::UnboundedReceiver<QueryEvent>,
        settings: ApplierSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(state.metadata().clone()));
        Self {
            log,
            state,
            classifier,
            config,
            board,
            queries,
            query_events,
            snapshot,
            settings,
        }
    }

    /// Receiver of the metadata snapshot published after every record.
    pub fn subscribe_metadata(&self) -> watch::Receiver<Arc<MetadataSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Offset of the next record to apply.
    pub fn next_offset(&self) -> u64 {
        self.state.next_offset()
    }

    /// Apply every record present in the log at call time.
    ///
    /// Effects are not run and statuses are not reported.
    pub async fn replay(&mut self) -> Result<u64> {
        let end = self.log.end_offset().await?;
        let start = self.state.next_offset();
        info!(from = start, to = end, "Replaying command log");

        let mut subscription = self.log.subscribe(start).await?;
        while self.state.next_offset() < end {
            let record = subscription.next().await?;
            self.process(record, false).await?;
        }
        self.publish();

        let replayed = end.saturating_sub(start);
        info!(
            records = replayed,
            entities = self.state.metadata().entities.len(),
            queries = self.state.metadata().queries.len(),
            "Command log replay complete"
        );
        Ok(replayed)
    }

    /// Start the physical execution of every query marked running.
    pub async fn start_running_queries(&mut self) {
        for launch in self.state.running_queries() {
            let query_id = launch.descriptor.id.clone();
            if let Err(e) = self.queries.start_query(launch).await {
                self.query_failed(&query_id, &e.to_string());
            }
        }
        self.publish();
    }

    /// Tail the log until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut gc = tokio::time::interval(self.settings.gc_interval);
        gc.tick().await;

        let Some(mut subscription) = self.resubscribe(&shutdown).await else {
            self.queries.shutdown().await;
            return;
        };
        info!(from = self.state.next_offset(), "Command applier running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                record = subscription.next() => {
                    let outcome = match record {
                        Ok(record) => self.process(record, true).await,
                        Err(e) => Err(EngineError::from(e)),
                    };
                    if let Err(e) = outcome {
                        warn!(error = %e, next_offset = self.state.next_offset(), "Command log read failed; resubscribing");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                        }
                        match self.resubscribe(&shutdown).await {
                            Some(fresh) => subscription = fresh,
                            None => break,
                        }
                    }
                }
                Some(event) = self.query_events.recv() => self.handle_query_event(event),
                _ = gc.tick() => {
                    let removed = self.board.gc().await;
                    if removed > 0 {
                        debug!(removed, "Dropped expired command statuses");
                    }
                }
            }
        }

        info!(next_offset = self.state.next_offset(), "Command applier stopped");
        self.queries.shutdown().await;
    }

    async fn resubscribe(&self, shutdown: &CancellationToken) -> Option<CommandSubscription> {
        loop {
            match self.log.subscribe(self.state.next_offset()).await {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    warn!(error = %e, "Cannot subscribe to command log; retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                    }
                }
            }
        }
    }

    /// Apply one record. `live` is false during replay.
    async fn process(&mut self, record: CommandRecord, live: bool) -> Result<()> {
        let step = self
            .state
            .apply(&record, self.classifier.as_ref(), &self.config);

        match step {
            ApplyStep::Processed { status, effects } => {
                match &status {
                    CommandStatus::Applied(outcome) => info!(
                        offset = record.offset,
                        statement_id = %record.statement_id,
                        message = %outcome.message,
                        "Command applied"
                    ),
                    CommandStatus::Failed { reason, .. } => warn!(
                        offset = record.offset,
                        statement_id = %record.statement_id,
                        reason = %reason,
                        "Command failed"
                    ),
                }
                if live {
                    self.publish();
                    for effect in effects {
                        self.run_effect(effect).await;
                    }
                    self.board.complete(&record.statement_id, status).await;
                }
            }
            ApplyStep::Duplicate { status } => {
                debug!(offset = record.offset, statement_id = %record.statement_id, "Duplicate statement; re-reporting status");
                if live {
                    self.publish();
                    self.board.complete(&record.statement_id, status).await;
                }
            }
            ApplyStep::Redelivered { status } => {
                debug!(offset = record.offset, "Record already applied");
                if let (true, Some(status)) = (live, status) {
                    self.board.complete(&record.statement_id, status).await;
                }
            }
            ApplyStep::Gap { expected, found } => {
                error!(expected, found, "Command log gap");
                return Err(EngineError::NotReady(format!(
                    "expected offset {} but the log delivered {}",
                    expected, found
                )));
            }
        }
        Ok(())
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::StartQuery(launch) => {
                let query_id = launch.descriptor.id.clone();
                if let Err(e) = self.queries.start_query(launch).await {
                    self.query_failed(&query_id, &e.to_string());
                }
            }
            Effect::StopQuery { query_id } => {
                if let Err(e) = self.queries.terminate(&query_id).await {
                    debug!(query_id = %query_id, error = %e, "Query was not running");
                }
            }
        }
    }

    fn handle_query_event(&mut self, event: QueryEvent) {
        match event {
            QueryEvent::Failed { query_id, message } => self.query_failed(&query_id, &message),
        }
    }

    fn query_failed(&mut self, query_id: &str, message: &str) {
        if self.state.mark_query_failed(query_id, message) {
            error!(query_id = %query_id, error = %message, "Query marked ERRORED");
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshot
            .send_replace(Arc::new(self.state.metadata().clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_engine::InMemoryEngine;
    use crate::query::ResourceLimits;
    use crate::statement::SqlClassifier;
    use tributary_core::{PendingCommand, QueryStatus, StatementId};
    use tributary_log::InMemoryCommandLog;

    const STATEMENTS: [&str; 4] = [
        "CREATE STREAM ORDERS (ORDERID VARCHAR, ITEMID VARCHAR, ORDERUNITS DOUBLE) \
         WITH (kafka_topic='orders_topic', value_format='json');",
        "CREATE STREAM A AS SELECT * FROM ORDERS;",
        "CREATE STREAM B AS SELECT ITEMID FROM ORDERS;",
        "TERMINATE CSAS_A_0;",
    ];

    async fn filled_log() -> Arc<dyn CommandLog> {
        let log: Arc<dyn CommandLog> = Arc::new(InMemoryCommandLog::default());
        for (i, text) in STATEMENTS.iter().enumerate() {
            log.append(PendingCommand::new(StatementId::from(format!("stmt-{}", i).as_str()), *text))
                .await
                .unwrap();
        }
        log
    }

    fn applier(log: Arc<dyn CommandLog>, engine: &InMemoryEngine) -> CommandApplier {
        let config = Arc::new(ServerConfig::new());
        let (queries, events) =
            QuerySessionManager::new(Arc::new(engine.clone()), config.clone(), ResourceLimits::default());
        CommandApplier::new(
            log,
            AppliedState::default(),
            Arc::new(SqlClassifier),
            config,
            Arc::new(StatusBoard::new(Duration::from_secs(60))),
            queries,
            events,
            ApplierSettings::default(),
        )
    }

    /// Apply `count` records live, reading from `from`.
    async fn apply_live(applier: &mut CommandApplier, from: u64, count: usize) {
        let mut subscription = applier.log.subscribe(from).await.unwrap();
        for _ in 0..count {
            let record = subscription.next().await.unwrap();
            applier.process(record, true).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_redelivered_prefix_matches_a_clean_pass() {
        let log = filled_log().await;

        let clean_engine = InMemoryEngine::new();
        let mut clean = applier(log.clone(), &clean_engine);
        apply_live(&mut clean, 0, STATEMENTS.len()).await;

        // Three records applied, then the subscription is lost and the log
        // delivers everything again from offset 0.
        let resumed_engine = InMemoryEngine::new();
        let mut resumed = applier(log.clone(), &resumed_engine);
        apply_live(&mut resumed, 0, 3).await;
        assert_eq!(
            resumed_engine.running_queries().await,
            vec!["CSAS_A_0".to_string(), "CSAS_B_1".to_string()]
        );
        apply_live(&mut resumed, 0, STATEMENTS.len()).await;

        assert_eq!(resumed.state.metadata(), clean.state.metadata());
        assert_eq!(resumed.state.next_offset(), 4);
        assert_eq!(resumed.state.metadata().last_applied, Some(3));

        // A second StartQuery for CSAS_B_1 would have failed and marked it ERRORED.
        let b = resumed.state.metadata().query("CSAS_B_1").unwrap();
        assert_eq!(b.status, QueryStatus::Running);
        assert!(resumed.state.metadata().query("CSAS_A_0").is_none());
        assert_eq!(resumed_engine.running_queries().await, vec!["CSAS_B_1".to_string()]);
        assert_eq!(
            resumed_engine.running_queries().await,
            clean_engine.running_queries().await
        );
        assert_eq!(resumed.queries.running().await, vec!["CSAS_B_1".to_string()]);
    }
}
