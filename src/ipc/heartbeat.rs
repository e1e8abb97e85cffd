//! Liveness stamp an out-of-process dashboard polls for staleness.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
pub const HEARTBEAT_STALE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeartbeatDocument {
    timestamp: DateTime<Utc>,
}

pub struct HeartbeatWriter {
    path: PathBuf,
}

impl HeartbeatWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn beat(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = HeartbeatDocument { timestamp: Utc::now() };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Spawn a task that beats every [`HEARTBEAT_INTERVAL`] until cancelled.
    pub fn spawn(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = self.beat() {
                    warn!("failed to write heartbeat: {e}");
                }
            }
        })
    }
}

/// Reader-side staleness check, used by dashboards and by tests.
pub fn is_alive(path: &std::path::Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(doc) = serde_json::from_str::<HeartbeatDocument>(&content) else {
        return false;
    };
    let age = Utc::now().signed_duration_since(doc.timestamp);
    age.to_std().map(|d| d < HEARTBEAT_STALE).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_heartbeat_is_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        let writer = HeartbeatWriter::new(&path);
        writer.beat().unwrap();
        assert!(is_alive(&path));
    }

    #[test]
    fn missing_heartbeat_is_not_alive() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_alive(&dir.path().join("nope.json")));
    }
}
