//! File-backed Command Log
//!
//! A single append-only file holding every command record, framed with a
//! length and a CRC32 checksum.
//!
//! ## Architecture
//!
//! ```text
//! append() ─→ [mpsc channel] ─→ Writer Task ─→ write_all ─→ sync_data ─→ publish to LogIndex
//!                                    │
//!                          assigns offsets (single sequencer),
//!                          group-commits everything queued
//! ```
//!
//! The writer task is the only place offsets are assigned, so concurrent
//! appenders are serialized without a lock. A record becomes visible to
//! subscribers only after its batch is on disk.
//!
//! ## File Format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────────────────┐
//! │ Payload Size │ CRC32    │ Payload (CommandRecord   │
//! │ (4 bytes LE) │(4 bytes) │ as JSON)                 │
//! └──────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! ## Recovery
//!
//! On open the whole file is replayed. A frame cut short at the end of the
//! file (crash mid-write) is truncated away. A checksum mismatch anywhere
//! but the final frame, or a break in the offset sequence, fails the open
//! with `Corrupt`.

use crate::error::{LogError, Result};
use crate::index::{CommandSubscription, LogIndex};
use crate::CommandLog;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tributary_core::{CommandRecord, PendingCommand};

const FRAME_HEADER_LEN: usize = 8;

/// When the writer task forces data to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// `sync_data` after every batch before acknowledging it
    Always,
    /// Leave flushing to the OS (tests only)
    Never,
}

/// File log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// Path of the log file; parent directories are created on open
    pub path: PathBuf,

    /// Name the log is listed under among registered topics
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_sync_policy")]
    pub sync_policy: SyncPolicy,

    /// Capacity of the append channel in front of the writer task
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_topic() -> String {
    "_tributary_commands".to_string()
}

fn default_sync_policy() -> SyncPolicy {
    SyncPolicy::Always
}

fn default_channel_capacity() -> usize {
    1024
}

impl FileLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            topic: default_topic(),
            sync_policy: default_sync_policy(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

struct AppendRequest {
    command: PendingCommand,
    reply: oneshot::Sender<std::result::Result<u64, String>>,
}

pub struct FileCommandLog {
    topic: String,
    path: PathBuf,
    index: Arc<LogIndex>,
    append_tx: mpsc::Sender<AppendRequest>,
    writer_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for FileCommandLog {
    fn drop(&mut self) {
        if let Some(handle) = self.writer_handle.take() {
            handle.abort();
        }
    }
}

impl FileCommandLog {
    /// Open (or create) the log file, recover its records and start the writer task.
    pub async fn open(config: FileLogConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = match tokio::fs::read(&config.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (records, valid_len) = decode_frames(&contents)?;
        if valid_len < contents.len() as u64 {
            warn!(
                path = ?config.path,
                valid_bytes = valid_len,
                file_bytes = contents.len(),
                "Partial frame at end of command log, truncating"
            );
            let file = OpenOptions::new().write(true).open(&config.path).await?;
            file.set_len(valid_len).await?;
            file.sync_all().await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .await?;

        let next_offset = records.len() as u64;
        info!(
            path = ?config.path,
            records = next_offset,
            "Command log opened"
        );

        let index = Arc::new(LogIndex::new(records));
        let (append_tx, append_rx) = mpsc::channel(config.channel_capacity.max(1));

        let writer = LogWriter {
            file,
            len: valid_len,
            next_offset,
            index: index.clone(),
            sync: config.sync_policy == SyncPolicy::Always,
        };
        let writer_handle = tokio::spawn(writer.run(append_rx));

        Ok(Self {
            topic: config.topic,
            path: config.path,
            index,
            append_tx,
            writer_handle: Some(writer_handle),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl CommandLog for FileCommandLog {
    async fn append(&self, command: PendingCommand) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.append_tx
            .send(AppendRequest { command, reply })
            .await
            .map_err(|_| LogError::Closed)?;
        rx.await
            .map_err(|_| LogError::Closed)?
            .map_err(LogError::Unavailable)
    }

    async fn subscribe(&self, from_offset: u64) -> Result<CommandSubscription> {
        Ok(CommandSubscription::new(self.index.clone(), from_offset))
    }

    async fn end_offset(&self) -> Result<u64> {
        Ok(self.index.end_offset())
    }

    fn topic_name(&self) -> &str {
        &self.topic
    }
}

/// Encode one record as a `[len][crc][json]` frame.
fn encode_frame(record: &CommandRecord) -> Result<BytesMut> {
    let payload = serde_json::to_vec(record)?;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_u32_le(crc32fast::hash(&payload));
    frame.put_slice(&payload);
    Ok(frame)
}

/// Decode every complete frame in `buf`.
///
/// Returns the records and the number of bytes they occupy. Trailing bytes
/// that do not form a complete, valid final frame are excluded from the
/// returned length.
fn decode_frames(buf: &[u8]) -> Result<(Vec<CommandRecord>, u64)> {
    let mut records: Vec<CommandRecord> = Vec::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        if buf.len() - pos < FRAME_HEADER_LEN {
            break;
        }
        let len = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        let stored_crc =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);
        let start = pos + FRAME_HEADER_LEN;
        let end = match start.checked_add(len) {
            Some(end) if end <= buf.len() => end,
            _ => break,
        };

        let payload = &buf[start..end];
        if crc32fast::hash(payload) != stored_crc {
            if end == buf.len() {
                break;
            }
            return Err(LogError::Corrupt {
                position: pos as u64,
                reason: "checksum mismatch".to_string(),
            });
        }

        let record: CommandRecord =
            serde_json::from_slice(payload).map_err(|e| LogError::Corrupt {
                position: pos as u64,
                reason: e.to_string(),
            })?;
        if record.offset != records.len() as u64 {
            return Err(LogError::Corrupt {
                position: pos as u64,
                reason: format!(
                    "expected offset {}, found {}",
                    records.len(),
                    record.offset
                ),
            });
        }

        records.push(record);
        pos = end;
    }

    Ok((records, pos as u64))
}

/// Background task that owns the file and the next offset.
struct LogWriter {
    file: File,
    len: u64,
    next_offset: u64,
    index: Arc<LogIndex>,
    sync: bool,
}

impl LogWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<AppendRequest>) {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(request) = rx.try_recv() {
                batch.push(request);
            }
            self.commit(batch).await;
        }
        debug!("Command log writer stopped");
    }

    async fn commit(&mut self, batch: Vec<AppendRequest>) {
        let mut buffer = BytesMut::new();
        let mut staged = Vec::with_capacity(batch.len());

        for request in batch {
            let record = request.command.into_record(self.next_offset + staged.len() as u64);
            match encode_frame(&record) {
                Ok(frame) => {
                    buffer.extend_from_slice(&frame);
                    staged.push((record, request.reply));
                }
                Err(e) => {
                    let _ = request.reply.send(Err(e.to_string()));
                }
            }
        }

        if staged.is_empty() {
            return;
        }

        if let Err(e) = self.write(&buffer).await {
            error!(error = %e, "Command log write failed");
            // Drop whatever part of the batch reached the file.
            if let Err(e) = self.file.set_len(self.len).await {
                error!(error = %e, "Failed to roll back partial command log write");
            }
            let message = e.to_string();
            for (_, reply) in staged {
                let _ = reply.send(Err(message.clone()));
            }
            return;
        }

        self.len += buffer.len() as u64;
        for (record, reply) in staged {
            let offset = record.offset;
            debug!(offset, statement_id = %record.statement_id, "Appended command");
            self.index.publish(record).await;
            self.next_offset = offset + 1;
            let _ = reply.send(Ok(offset));
        }
    }

    async fn write(&mut self, buffer: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buffer).await?;
        self.file.flush().await?;
        if self.sync {
            self.file.sync_data().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tributary_core::StatementId;

    fn command(id: &str, text: &str) -> PendingCommand {
        PendingCommand::new(StatementId::from(id), text)
    }

    #[tokio::test]
    async fn test_append_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = FileLogConfig::new(temp_dir.path().join("log/commands.log"));

        {
            let log = FileCommandLog::open(config.clone()).await.unwrap();
            assert_eq!(log.append(command("a", "first")).await.unwrap(), 0);
            assert_eq!(log.append(command("b", "second")).await.unwrap(), 1);
        }

        let log = FileCommandLog::open(config).await.unwrap();
        assert_eq!(log.end_offset().await.unwrap(), 2);
        let mut sub = log.subscribe(0).await.unwrap();
        assert_eq!(sub.next().await.unwrap().statement_text, "first");
        assert_eq!(sub.next().await.unwrap().statement_text, "second");
        assert_eq!(log.append(command("c", "third")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("commands.log");

        {
            let log = FileCommandLog::open(FileLogConfig::new(&path)).await.unwrap();
            log.append(command("a", "kept")).await.unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        // Half a frame, as left by a crash mid-write.
        let torn = encode_frame(&command("b", "lost").into_record(1)).unwrap();
        let mut contents = std::fs::read(&path).unwrap();
        contents.extend_from_slice(&torn[..torn.len() / 2]);
        std::fs::write(&path, contents).unwrap();

        let log = FileCommandLog::open(FileLogConfig::new(&path)).await.unwrap();
        assert_eq!(log.end_offset().await.unwrap(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(log.append(command("c", "next")).await.unwrap(), 1);
    }

    #[test]
    fn test_corrupt_middle_frame_rejected() {
        let mut buf = Vec::new();
        for i in 0..3u64 {
            let frame = encode_frame(&command("x", "stmt").into_record(i)).unwrap();
            buf.extend_from_slice(&frame);
        }
        // Flip a payload byte of the first frame.
        buf[FRAME_HEADER_LEN + 2] ^= 0xFF;

        let err = decode_frames(&buf).unwrap_err();
        assert!(matches!(err, LogError::Corrupt { position: 0, .. }));
    }

    #[test]
    fn test_offset_gap_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode_frame(&command("x", "a").into_record(0)).unwrap());
        buf.extend_from_slice(&encode_frame(&command("y", "b").into_record(5)).unwrap());

        assert!(matches!(
            decode_frames(&buf),
            Err(LogError::Corrupt { .. })
        ));
    }
}
