//! Scans the answers directory for dashboard-submitted `{id}.json` drops and
//! feeds them to the [`QuestionBroker`](crate::broker::QuestionBroker).
//!
//! Grounded on the Response Surface's `POST /api/questions/:id` handler:
//! both paths terminate in the same `submit_answer` call, this one reached
//! by filesystem poll rather than HTTP, per the spec's file-drop-over-NAT
//! design note.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::broker::QuestionBroker;

pub const ANSWER_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct AnswerDrop {
    #[serde(rename = "questionId")]
    question_id: String,
    answers: HashMap<String, String>,
}

pub struct AnswerPoller {
    dir: PathBuf,
    broker: Arc<QuestionBroker>,
}

impl AnswerPoller {
    pub fn new(dir: impl Into<PathBuf>, broker: Arc<QuestionBroker>) -> Self {
        Self { dir: dir.into(), broker }
    }

    /// Scan once. Malformed or already-deleted files are skipped silently;
    /// well-formed drops are submitted to the Broker and removed on success.
    pub fn poll_once(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };

            let Ok(drop) = serde_json::from_str::<AnswerDrop>(&content) else {
                debug!(path = %path.display(), "malformed answer drop, skipping");
                continue;
            };

            match self.broker.submit_answer(&drop.question_id, drop.answers) {
                Ok(true) => {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("failed to remove consumed answer drop {}: {e}", path.display());
                    }
                }
                Ok(false) => debug!(question_id = %drop.question_id, "no matching pending question, leaving drop"),
                Err(e) => warn!("failed to submit answer from {}: {e}", path.display()),
            }
        }
    }

    /// Spawn a task that polls every [`ANSWER_POLL_INTERVAL`] until cancelled.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ANSWER_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                self.poll_once();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use std::collections::HashMap as StdHashMap;

    fn broker() -> Arc<QuestionBroker> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(QuestionBroker::new(Arc::new(StateStore::create_fresh(dir.path().join("state.json")))))
    }

    #[tokio::test]
    async fn well_formed_drop_is_submitted_and_deleted() {
        let broker = broker();
        let answers_dir = tempfile::tempdir().unwrap();

        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move { broker2.handle_question(1, crate::state::StepKind::Plan, vec![]).await });
        tokio::task::yield_now().await;
        let id = broker.get_pending()[0].id.clone();

        let drop_path = answers_dir.path().join("drop1.json");
        let mut answers = StdHashMap::new();
        answers.insert("DB?".to_string(), "Postgres".to_string());
        std::fs::write(
            &drop_path,
            serde_json::to_string(&serde_json::json!({"questionId": id, "answers": answers})).unwrap(),
        )
        .unwrap();

        let poller = AnswerPoller::new(answers_dir.path(), broker.clone());
        poller.poll_once();

        waiter.await.unwrap().unwrap();
        assert!(!drop_path.exists());
    }

    #[test]
    fn malformed_drop_is_skipped_and_left_in_place() {
        let broker = broker();
        let answers_dir = tempfile::tempdir().unwrap();
        let drop_path = answers_dir.path().join("bad.json");
        std::fs::write(&drop_path, "not json").unwrap();

        let poller = AnswerPoller::new(answers_dir.path(), broker);
        poller.poll_once();

        assert!(drop_path.exists());
    }
}
