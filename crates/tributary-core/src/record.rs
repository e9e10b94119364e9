//! Command Record
//!
//! A command record is one accepted statement, durably ordered in the command
//! log. It is created by the submission coordinator, stamped with an offset by
//! the log's single sequencer, and never mutated afterwards.
//!
//! ## Structure
//! - **offset**: assigned by the log; unique and strictly increasing, defines the total order
//! - **statement_id**: derived from the submitting session, its sequence number and the
//!   statement text; a resubmission of the same statement by the same session maps to the
//!   same id, which is what makes application idempotent
//! - **statement_text**: the raw SQL
//! - **origin_timestamp**: milliseconds since epoch on the submitting node
//! - **properties**: the session-scope configuration overrides in force at submission, so
//!   every node resolves the same configuration when it applies the record

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Deterministic identity of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(String);

impl StatementId {
    /// Derive the id for the `sequence`-th statement of `session_id`.
    ///
    /// The same triple always yields the same id; changing any part changes it.
    pub fn derive(session_id: &str, sequence: u64, statement_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(sequence.to_be_bytes());
        hasher.update([0u8]);
        hasher.update(statement_text.trim().as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A statement on its way into the log (no offset yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub statement_id: StatementId,
    pub statement_text: String,
    pub origin_timestamp: i64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl PendingCommand {
    pub fn new(statement_id: StatementId, statement_text: impl Into<String>) -> Self {
        Self {
            statement_id,
            statement_text: statement_text.into(),
            origin_timestamp: now_ms(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Stamp the command with the offset chosen by the log sequencer.
    pub fn into_record(self, offset: u64) -> CommandRecord {
        CommandRecord {
            offset,
            statement_id: self.statement_id,
            statement_text: self.statement_text,
            origin_timestamp: self.origin_timestamp,
            properties: self.properties,
        }
    }
}

/// One accepted statement at a fixed position in the command log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub offset: u64,
    pub statement_id: StatementId,
    pub statement_text: String,
    pub origin_timestamp: i64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Wall-clock milliseconds since epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_id_is_deterministic() {
        let a = StatementId::derive("session-1", 0, "CREATE STREAM S (A INT) WITH (kafka_topic='s');");
        let b = StatementId::derive("session-1", 0, "CREATE STREAM S (A INT) WITH (kafka_topic='s');");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_statement_id_depends_on_submission_identity() {
        let text = "TERMINATE CSAS_X_0;";
        let base = StatementId::derive("session-1", 3, text);
        assert_ne!(base, StatementId::derive("session-2", 3, text));
        assert_ne!(base, StatementId::derive("session-1", 4, text));
        assert_ne!(base, StatementId::derive("session-1", 3, "TERMINATE CSAS_Y_0;"));
    }

    #[test]
    fn test_statement_id_ignores_surrounding_whitespace() {
        assert_eq!(
            StatementId::derive("s", 1, "  DROP STREAM X; \n"),
            StatementId::derive("s", 1, "DROP STREAM X;")
        );
    }

    #[test]
    fn test_pending_command_into_record_keeps_payload() {
        let mut props = BTreeMap::new();
        props.insert("streams.auto.offset.reset".to_string(), "earliest".to_string());
        let pending = PendingCommand::new(StatementId::from("abc"), "DROP STREAM X;")
            .with_properties(props.clone());
        let ts = pending.origin_timestamp;

        let record = pending.into_record(42);
        assert_eq!(record.offset, 42);
        assert_eq!(record.statement_id.as_str(), "abc");
        assert_eq!(record.statement_text, "DROP STREAM X;");
        assert_eq!(record.origin_timestamp, ts);
        assert_eq!(record.properties, props);
    }

    #[test]
    fn test_record_json_shape() {
        let record = PendingCommand::new(StatementId::from("id-1"), "TERMINATE Q;").into_record(7);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["offset"], 7);
        assert_eq!(json["statement_id"], "id-1");

        // Records written before properties existed still decode.
        let legacy = r#"{"offset":1,"statement_id":"x","statement_text":"DROP TOPIC T;","origin_timestamp":5}"#;
        let decoded: CommandRecord = serde_json::from_str(legacy).unwrap();
        assert!(decoded.properties.is_empty());
    }
}
