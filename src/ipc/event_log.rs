//! Append-only newline-delimited JSON event log with a monotonic `seq`.
//!
//! Grounded on the same atomic-append discipline the teacher applies to
//! `transcript::Transcript` persistence, narrowed to a single growing file
//! rather than one file per session since the spec requires total seq order
//! across the run.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub data: serde_json::Value,
}

struct Inner {
    file: std::fs::File,
    current_seq: u64,
}

/// Single appender. `write` assigns the next seq and fsyncs before
/// returning, so readers observing the file afterward see a consistent line.
pub struct EventLogWriter {
    inner: Mutex<Inner>,
    path: PathBuf,
    subscribers: broadcast::Sender<EventRecord>,
}

impl EventLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_seq = count_lines(&path)? as u64;
        let (subscribers, _) = broadcast::channel(256);

        Ok(Self {
            inner: Mutex::new(Inner { file, current_seq }),
            path,
            subscribers,
        })
    }

    pub fn write(&self, event: &str, data: serde_json::Value) -> Result<u64> {
        let mut inner = self.inner.lock().expect("event log mutex poisoned");
        inner.current_seq += 1;
        let record = EventRecord {
            seq: inner.current_seq,
            timestamp: Utc::now(),
            event: event.to_string(),
            data,
        };

        let line = serde_json::to_string(&record)?;
        writeln!(inner.file, "{line}")?;
        inner.file.sync_all()?;

        let _ = self.subscribers.send(record.clone());
        Ok(record.seq)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.subscribers.subscribe()
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<Vec<EventRecord>> {
        read_all(&self.path)
    }
}

fn count_lines(path: &std::path::Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().filter(|l| !l.trim().is_empty()).count())
}

/// Read every record currently in the file, in seq order. Used both for the
/// SSE initial burst and for tests.
pub fn read_all(path: &std::path::Path) -> Result<Vec<EventRecord>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let writer = EventLogWriter::new(&path).unwrap();

        let s1 = writer.write("phase-started", serde_json::json!({"phase": 1})).unwrap();
        let s2 = writer.write("step-started", serde_json::json!({"step": "plan"})).unwrap();
        assert!(s2 > s1);

        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, s1);
        assert_eq!(records[1].seq, s2);
    }

    #[test]
    fn reopening_an_existing_log_continues_the_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        {
            let writer = EventLogWriter::new(&path).unwrap();
            writer.write("a", serde_json::json!({})).unwrap();
        }
        let writer = EventLogWriter::new(&path).unwrap();
        let seq = writer.write("b", serde_json::json!({})).unwrap();
        assert_eq!(seq, 2);
    }
}
