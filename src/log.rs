//! Bounded in-memory recent-entry buffer backed by an append-only file.
//!
//! Grounded on the `VecDeque`-of-entries shape the teacher's
//! `transcript::Transcript` uses to accumulate a session's entries, here
//! bounded to a fixed capacity and paired with an unbounded file for
//! diagnosis (`autopilot-log/sdk-output.log`).

use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

const DEFAULT_CAPACITY: usize = 1000;

/// One line of raw agent stream output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

struct Inner {
    ring: VecDeque<LogEntry>,
    capacity: usize,
    pending: Vec<LogEntry>,
    file_path: Option<PathBuf>,
}

/// Circular buffer of the last `capacity` entries plus an append-only file.
pub struct RingLog {
    inner: Mutex<Inner>,
}

impl RingLog {
    pub fn new(file_path: Option<PathBuf>) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, file_path)
    }

    pub fn with_capacity(capacity: usize, file_path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                pending: Vec::new(),
                file_path,
            }),
        }
    }

    /// Add synchronously to the ring; queue for the next `flush()` to the
    /// file so a burst of log calls does not stall on disk IO.
    pub fn log(&self, line: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            line: line.into(),
        };

        let mut inner = self.inner.lock().expect("ring log mutex poisoned");
        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(entry.clone());
        inner.pending.push(entry);
    }

    /// Tail of the ring, oldest first, limited to `n` most recent entries.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock().expect("ring log mutex poisoned");
        inner
            .ring
            .iter()
            .rev()
            .take(n)
            .rev()
            .cloned()
            .collect()
    }

    /// Drain pending writes to the file. Ready-then-sync: entries are only
    /// removed from `pending` after the write and fsync succeed, so a crash
    /// mid-flush just means the next flush re-writes the same lines rather
    /// than truncating the file. Idempotent when there is nothing pending.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("ring log mutex poisoned");
        if inner.pending.is_empty() {
            return Ok(());
        }
        let Some(path) = inner.file_path.clone() else {
            inner.pending.clear();
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        for entry in &inner.pending {
            writeln!(file, "[{}] {}", entry.timestamp.to_rfc3339(), entry.line)?;
        }
        file.sync_all()?;
        inner.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_caps_at_capacity() {
        let log = RingLog::with_capacity(3, None);
        for i in 0..5 {
            log.log(format!("line {i}"));
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].line, "line 2");
        assert_eq!(recent[2].line, "line 4");
    }

    #[test]
    fn flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdk-output.log");
        let log = RingLog::new(Some(path.clone()));
        log.log("hello");
        log.flush().unwrap();
        log.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
