//! Newest-first bounded activity feed, persisted atomically.
//!
//! Distinct from [`crate::log::RingLog`]: the activity feed is a
//! human-facing rolling log of notable events, the Ring-Buffered Log is raw
//! agent stream output. Persistence failures here are logged and swallowed
//! — activity is diagnostic, never load-bearing (§7: "Activity persistence
//! failure").

use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 200;
const TRUNCATE_AT: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    StepStarted,
    StepCompleted,
    QuestionPending,
    QuestionAnswered,
    Error,
    BuildComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ActivityDocument<'a> {
    activities: &'a VecDeque<ActivityEntry>,
}

/// Truncate `message` at a word boundary near `TRUNCATE_AT` characters.
fn truncate_at_word_boundary(message: &str) -> String {
    if message.chars().count() <= TRUNCATE_AT {
        return message.to_string();
    }
    let truncated: String = message.chars().take(TRUNCATE_AT).collect();
    match truncated.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}...", &truncated[..idx]),
        _ => format!("{truncated}..."),
    }
}

pub struct ActivityStore {
    path: PathBuf,
    entries: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl ActivityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record an entry, newest-first, and persist best-effort.
    pub fn record(&self, kind: ActivityKind, message: &str, metadata: Option<serde_json::Value>) {
        let entry = ActivityEntry {
            kind,
            message: truncate_at_word_boundary(message),
            timestamp: Utc::now(),
            metadata,
        };

        let mut entries = self.entries.lock().expect("activity mutex poisoned");
        entries.push_front(entry);
        if entries.len() > self.capacity {
            entries.pop_back();
        }

        if let Err(e) = self.persist(&entries) {
            warn!("failed to persist activity feed: {e}");
        }
    }

    fn persist(&self, entries: &VecDeque<ActivityEntry>) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = ActivityDocument { activities: entries };
        let serialized = serde_json::to_string_pretty(&doc)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            tmp.write_all(serialized.as_bytes())?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn feed(&self) -> Vec<ActivityEntry> {
        self.entries
            .lock()
            .expect("activity mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_messages_at_word_boundary() {
        let msg = "this is a very long activity message that definitely exceeds sixty characters in length";
        let truncated = truncate_at_word_boundary(msg);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() < msg.len());
    }

    #[test]
    fn feed_is_newest_first_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActivityStore::with_capacity(dir.path().join("autopilot-activity.json"), 2);
        store.record(ActivityKind::PhaseStarted, "phase 1", None);
        store.record(ActivityKind::PhaseCompleted, "phase 1 done", None);
        store.record(ActivityKind::PhaseStarted, "phase 2", None);

        let feed = store.feed();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].message, "phase 2");
    }
}
