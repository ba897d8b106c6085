// ABOUTME: Per-session instruction inbox stored as append-only JSON lines.
// ABOUTME: Appends take an exclusive file lock and assign a monotone sequence number.
//
// The highest assigned sequence number is also kept in a sidecar (`inbox.seq`), so
// truncating or rewriting the inbox never makes a new message reuse an old number.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub seq: u64,
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub from: String,
    pub body: String,
}

/// Messages read from an inbox plus the byte offset just past the last complete line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxRead {
    pub messages: Vec<InboxMessage>,
    pub end_offset: u64,
}

/// Append one message, assigning `seq = last + 1` under an exclusive lock.
pub fn append(path: &Path, from: &str, body: &str) -> Result<InboxMessage> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::write(path, e))?;

    file.lock_exclusive().map_err(|e| StoreError::write(path, e))?;
    let result = append_locked(&mut file, path, from, body);
    let _ = FileExt::unlock(&file);
    result
}

fn append_locked(file: &mut File, path: &Path, from: &str, body: &str) -> Result<InboxMessage> {
    let mut existing = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut existing))
        .map_err(|e| StoreError::read(path, e))?;

    let seq_path = path.with_extension("seq");
    let recorded = std::fs::read_to_string(&seq_path)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let last_seq = parse_lines(&existing)
        .iter()
        .map(|m| m.seq)
        .max()
        .unwrap_or(0)
        .max(recorded);

    let message = InboxMessage {
        seq: last_seq + 1,
        id: Uuid::new_v4(),
        sent_at: Utc::now(),
        from: from.to_string(),
        body: body.to_string(),
    };

    let mut line = serde_json::to_string(&message).map_err(|e| StoreError::parse(path, e))?;
    line.push('\n');
    // A previous writer may have died mid-line; start on a fresh one.
    if !existing.is_empty() && !existing.ends_with('\n') {
        line.insert(0, '\n');
    }
    file.write_all(line.as_bytes())
        .map_err(|e| StoreError::write(path, e))?;
    std::fs::write(&seq_path, message.seq.to_string())
        .map_err(|e| StoreError::write(&seq_path, e))?;
    Ok(message)
}

/// Read messages with `seq > after_seq`, starting at byte `offset`.
///
/// A file shorter than `offset` was truncated or rewritten; it is rescanned from the
/// start and filtered by sequence number instead. A trailing partial line is left for
/// the next read.
pub fn read_since(path: &Path, offset: u64, after_seq: u64) -> Result<InboxRead> {
    let content = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InboxRead::default()),
        Err(e) => return Err(StoreError::read(path, e)),
    };

    let len = content.len() as u64;
    let start = if offset <= len { offset } else { 0 };
    let tail = &content[start as usize..];
    let complete = match tail.iter().rposition(|b| *b == b'\n') {
        Some(pos) => &tail[..=pos],
        None => &tail[..0],
    };

    let messages = parse_lines(&String::from_utf8_lossy(complete))
        .into_iter()
        .filter(|m| m.seq > after_seq)
        .collect();

    Ok(InboxRead {
        messages,
        end_offset: start + complete.len() as u64,
    })
}

fn parse_lines(content: &str) -> Vec<InboxMessage> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<InboxMessage>(line) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed inbox line");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_assigns_increasing_seq() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("inbox.jsonl");
        let a = append(&path, "user", "first").unwrap();
        let b = append(&path, "architect-ada", "second").unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);

        let read = read_since(&path, 0, 0).unwrap();
        assert_eq!(read.messages.len(), 2);
        assert_eq!(read.messages[1].body, "second");
        assert_eq!(read.messages[0].id, a.id);
        assert_ne!(read.messages[0].id, read.messages[1].id);
        assert_eq!(read.end_offset, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_read_since_offset_skips_consumed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("inbox.jsonl");
        append(&path, "user", "one").unwrap();
        let first = read_since(&path, 0, 0).unwrap();
        append(&path, "user", "two").unwrap();

        let second = read_since(&path, first.end_offset, 1).unwrap();
        assert_eq!(second.messages.len(), 1);
        assert_eq!(second.messages[0].body, "two");
    }

    #[test]
    fn test_partial_trailing_line_is_deferred() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("inbox.jsonl");
        append(&path, "user", "whole").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":2,\"id\"").unwrap();

        let read = read_since(&path, 0, 0).unwrap();
        assert_eq!(read.messages.len(), 1);
        assert!(read.end_offset < std::fs::metadata(&path).unwrap().len());

        // The next append repairs the broken line and continues the sequence.
        let next = append(&path, "user", "after").unwrap();
        assert_eq!(next.seq, 2);
        let read = read_since(&path, 0, 1).unwrap();
        assert_eq!(read.messages.len(), 1);
        assert_eq!(read.messages[0].body, "after");
    }

    #[test]
    fn test_truncated_file_is_rescanned_by_seq() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("inbox.jsonl");
        append(&path, "user", "one").unwrap();
        append(&path, "user", "two").unwrap();
        let read = read_since(&path, 0, 0).unwrap();

        std::fs::write(&path, "").unwrap();
        append(&path, "user", "three").unwrap();
        let after = read_since(&path, read.end_offset, 2).unwrap();
        assert_eq!(after.messages.len(), 1);
        assert_eq!(after.messages[0].seq, 3);
        assert_eq!(after.messages[0].body, "three");
    }

    #[test]
    fn test_missing_inbox_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let read = read_since(&tmp.path().join("nope.jsonl"), 0, 0).unwrap();
        assert!(read.messages.is_empty());
        assert_eq!(read.end_offset, 0);
    }
}
