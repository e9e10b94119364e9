//! Process-local command log.
//!
//! Used by tests and by single-process clusters where several nodes share one
//! log through an `Arc`. Appends are serialized by a mutex around the next
//! offset, which plays the role of the single sequencer.

use crate::error::{LogError, Result};
use crate::index::{CommandSubscription, LogIndex};
use crate::CommandLog;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use tributary_core::PendingCommand;

pub struct InMemoryCommandLog {
    topic: String,
    index: Arc<LogIndex>,
    sequencer: Mutex<u64>,
    available: AtomicBool,
}

impl InMemoryCommandLog {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            index: Arc::new(LogIndex::new(Vec::new())),
            sequencer: Mutex::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the durable store becoming unreachable (or reachable again).
    ///
    /// While unavailable, `append` and `subscribe` fail with `Unavailable`.
    /// Existing subscriptions keep reading what was already acknowledged.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LogError::Unavailable(format!(
                "command log '{}' is not reachable",
                self.topic
            )))
        }
    }
}

impl Default for InMemoryCommandLog {
    fn default() -> Self {
        Self::new("_tributary_commands")
    }
}

#[async_trait]
impl CommandLog for InMemoryCommandLog {
    async fn append(&self, command: PendingCommand) -> Result<u64> {
        self.check_available()?;

        let mut next = self.sequencer.lock().await;
        let offset = *next;
        let record = command.into_record(offset);
        debug!(
            offset,
            statement_id = %record.statement_id,
            "Appended command"
        );
        self.index.publish(record).await;
        *next += 1;
        Ok(offset)
    }

    async fn subscribe(&self, from_offset: u64) -> Result<CommandSubscription> {
        self.check_available()?;
        Ok(CommandSubscription::new(self.index.clone(), from_offset))
    }

    async fn end_offset(&self) -> Result<u64> {
        Ok(self.index.end_offset())
    }

    fn topic_name(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tributary_core::StatementId;

    fn command(id: &str, text: &str) -> PendingCommand {
        PendingCommand::new(StatementId::from(id), text)
    }

    #[tokio::test]
    async fn test_offsets_start_at_zero_and_increase() {
        let log = InMemoryCommandLog::default();
        assert_eq!(log.append(command("a", "DROP STREAM A;")).await.unwrap(), 0);
        assert_eq!(log.append(command("b", "DROP STREAM B;")).await.unwrap(), 1);
        assert_eq!(log.end_offset().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_tails() {
        let log = Arc::new(InMemoryCommandLog::default());
        log.append(command("a", "one")).await.unwrap();

        let mut sub = log.subscribe(0).await.unwrap();
        assert_eq!(sub.next().await.unwrap().statement_text, "one");

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(command("b", "two")).await.unwrap();
        });

        let record = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.offset, 1);
        assert_eq!(record.statement_text, "two");
    }

    #[tokio::test]
    async fn test_subscriptions_are_independent() {
        let log = InMemoryCommandLog::default();
        for i in 0..3 {
            log.append(command(&format!("id-{}", i), &format!("stmt {}", i)))
                .await
                .unwrap();
        }

        let mut from_start = log.subscribe(0).await.unwrap();
        let mut from_two = log.subscribe(2).await.unwrap();
        assert_eq!(from_two.next().await.unwrap().offset, 2);
        assert_eq!(from_start.next().await.unwrap().offset, 0);
        assert_eq!(from_start.position(), 1);
        assert!(from_two.try_next().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_rejects_append_and_subscribe() {
        let log = InMemoryCommandLog::default();
        log.set_available(false);

        let err = log.append(command("a", "x")).await.unwrap_err();
        assert!(matches!(err, LogError::Unavailable(_)));
        assert!(err.is_retryable());
        assert!(log.subscribe(0).await.is_err());
        assert_eq!(log.end_offset().await.unwrap(), 0);

        log.set_available(true);
        assert_eq!(log.append(command("a", "x")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_offsets() {
        let log = Arc::new(InMemoryCommandLog::default());
        let mut handles = Vec::new();
        for i in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(command(&format!("id-{}", i), "stmt")).await.unwrap()
            }));
        }

        let mut offsets = Vec::new();
        for h in handles {
            offsets.push(h.await.unwrap());
        }
        offsets.sort();
        assert_eq!(offsets, (0..20).collect::<Vec<u64>>());
    }
}
