//! In-memory index of sequenced records and the subscriptions that tail it.
//!
//! Both log implementations keep every acknowledged record here, in offset
//! order, and publish the next unassigned offset through a `watch` channel.
//! Subscribers read from the index at their own position and park on the
//! watch channel when they reach the end.

use crate::error::{LogError, Result};
use tokio::sync::{watch, RwLock};
use tributary_core::CommandRecord;

pub(crate) struct LogIndex {
    records: RwLock<Vec<CommandRecord>>,
    end_offset: watch::Sender<u64>,
}

impl LogIndex {
    pub(crate) fn new(records: Vec<CommandRecord>) -> Self {
        let end = records.len() as u64;
        let (end_offset, _) = watch::channel(end);
        Self {
            records: RwLock::new(records),
            end_offset,
        }
    }

    /// Make a record visible to subscribers.
    ///
    /// Callers are the single sequencer and pass records whose offset equals
    /// the current end offset.
    pub(crate) async fn publish(&self, record: CommandRecord) {
        let mut records = self.records.write().await;
        debug_assert_eq!(record.offset, records.len() as u64);
        records.push(record);
        let end = records.len() as u64;
        drop(records);
        self.end_offset.send_replace(end);
    }

    pub(crate) async fn get(&self, offset: u64) -> Option<CommandRecord> {
        let records = self.records.read().await;
        usize::try_from(offset)
            .ok()
            .and_then(|i| records.get(i))
            .cloned()
    }

    pub(crate) fn end_offset(&self) -> u64 {
        *self.end_offset.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.end_offset.subscribe()
    }
}

/// A restartable read position in the command log.
///
/// `next()` never returns past the end of the log; it waits for the next
/// append instead. Dropping the subscription releases it.
pub struct CommandSubscription {
    index: std::sync::Arc<LogIndex>,
    position: u64,
    end_offset: watch::Receiver<u64>,
}

impl CommandSubscription {
    pub(crate) fn new(index: std::sync::Arc<LogIndex>, from_offset: u64) -> Self {
        let end_offset = index.watch();
        Self {
            index,
            position: from_offset,
            end_offset,
        }
    }

    /// Offset of the record the next call to `next()` will return.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Wait for and return the next record.
    pub async fn next(&mut self) -> Result<CommandRecord> {
        loop {
            // Mark the current end as seen before looking, so an append that
            // lands between the lookup and the wait still wakes us.
            self.end_offset.borrow_and_update();

            if let Some(record) = self.index.get(self.position).await {
                self.position = record.offset + 1;
                return Ok(record);
            }

            if self.end_offset.changed().await.is_err() {
                return Err(LogError::Closed);
            }
        }
    }

    /// Return the next record if one is already available.
    pub async fn try_next(&mut self) -> Option<CommandRecord> {
        let record = self.index.get(self.position).await?;
        self.position = record.offset + 1;
        Some(record)
    }
}
