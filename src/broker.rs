//! Correlates tool-level question events with later answers via suspension
//! handles.
//!
//! Grounded on the teacher's `workflow::gate::GateController`
//! (send-notifications-then-wait shape) but rewritten around a one-shot
//! `tokio::sync::oneshot` channel per question instead of the gate's
//! repeated `mpsc::Receiver` poll loop: the spec calls for a deferred
//! promise with at-most-once resolution, not a gate that can be polled
//! indefinitely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notify::{question_notification, NotificationManager};
use crate::state::{Question, QuestionItem, StateStore, StepKind};
use crate::{Error, Result};

/// What a suspended `handle_question` caller eventually receives.
#[derive(Debug, Clone)]
pub enum BrokerOutcome {
    /// A human answered. Wrapped in the "allow" verdict shape the agent
    /// runtime's tool-call gate expects.
    Allowed {
        questions: Vec<QuestionItem>,
        answers: HashMap<String, String>,
    },
    /// The handle was rejected (shutdown, timeout) before being answered.
    Rejected { reason: String },
}

/// Broadcast to anyone observing broker activity (Notification Manager,
/// IPC event log, Response Surface SSE).
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Pending(Question),
    Answered(String),
}

struct PendingHandle {
    resolve: oneshot::Sender<BrokerOutcome>,
}

/// Holds question id → suspension handle, and delegates question metadata
/// to the shared [`StateStore`] (Ownership: the Broker never persists
/// metadata itself, it only owns the resolvers).
pub struct QuestionBroker {
    state: Arc<StateStore>,
    handles: Mutex<HashMap<String, PendingHandle>>,
    events: broadcast::Sender<BrokerEvent>,
}

impl QuestionBroker {
    pub fn new(state: Arc<StateStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state,
            handles: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    /// Bridge broker activity to the Notification Manager for the life of
    /// the process: every newly pending question is dispatched and gets a
    /// reminder timer, every answer cancels that question's reminder.
    pub fn spawn_notifier(&self, notifications: Arc<NotificationManager>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(BrokerEvent::Pending(question)) => {
                        let notification = question_notification(&question);
                        notifications.notify(&notification).await;
                        notifications.start_reminder(question.id.clone(), notification);
                    }
                    Ok(BrokerEvent::Answered(id)) => {
                        notifications.cancel_reminder(&id);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Mint a question, register its handle, persist the metadata, and
    /// suspend the caller until `submit_answer` or `reject_all` resolves it.
    pub async fn handle_question(
        &self,
        phase: u32,
        step: StepKind,
        items: Vec<QuestionItem>,
    ) -> Result<BrokerOutcome> {
        let question = Question::new(phase, step, items);
        let id = question.id.clone();

        let (tx, rx) = oneshot::channel();
        {
            let mut handles = self.handles.lock().expect("broker mutex poisoned");
            handles.insert(id.clone(), PendingHandle { resolve: tx });
        }

        self.state.apply(|s| s.add_pending_question(question.clone()))?;
        let _ = self.events.send(BrokerEvent::Pending(question));
        info!(question_id = %id, "question pending, suspended for answer");

        rx.await
            .map_err(|_| Error::Facade("question handle dropped without resolution".into()))
    }

    /// Resolve a pending handle exactly once. A duplicate or unknown id
    /// returns `false` and does not mutate state.
    pub fn submit_answer(&self, id: &str, answers: HashMap<String, String>) -> Result<bool> {
        let handle = {
            let mut handles = self.handles.lock().expect("broker mutex poisoned");
            handles.remove(id)
        };

        let Some(handle) = handle else {
            debug!(question_id = %id, "submit_answer: no such pending question");
            return Ok(false);
        };

        let items = self
            .get_pending_by_id(id)
            .map(|q| q.items)
            .unwrap_or_default();

        if let Err(e) = self.state.apply(|s| {
            s.resolve_question(id, answers.clone());
        }) {
            warn!("failed to persist answered question: {e}");
        }

        let _ = handle.resolve.send(BrokerOutcome::Allowed {
            questions: items,
            answers,
        });
        let _ = self.events.send(BrokerEvent::Answered(id.to_string()));
        info!(question_id = %id, "question answered");
        Ok(true)
    }

    pub fn get_pending(&self) -> Vec<Question> {
        self.state.snapshot().pending_questions.into_values().collect()
    }

    pub fn get_pending_by_id(&self, id: &str) -> Option<Question> {
        self.state.snapshot().pending_questions.get(id).cloned()
    }

    /// Reject every outstanding handle with `reason`. Used on shutdown and
    /// on reminder-exhaustion timeout paths.
    pub fn reject_all(&self, reason: &str) {
        let handles = {
            let mut handles = self.handles.lock().expect("broker mutex poisoned");
            std::mem::take(&mut *handles)
        };

        for (id, handle) in handles {
            let _ = handle.resolve.send(BrokerOutcome::Rejected {
                reason: reason.to_string(),
            });
            debug!(question_id = %id, "rejected pending question: {reason}");
        }

        if let Err(e) = self.state.apply(|s| s.clear_pending_questions()) {
            warn!("failed to clear pending questions on reject_all: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::QuestionOption;
    use std::sync::Arc;

    fn store() -> Arc<StateStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(StateStore::create_fresh(dir.path().join("state.json")))
    }

    #[tokio::test]
    async fn submit_answer_resumes_handle_question_with_exact_answers() {
        let broker = Arc::new(QuestionBroker::new(store()));
        let items = vec![QuestionItem {
            prompt: "DB?".to_string(),
            header: None,
            options: vec![
                QuestionOption { label: "Postgres".to_string(), description: None },
                QuestionOption { label: "MySQL".to_string(), description: None },
            ],
            multi_select: false,
        }];

        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move {
            broker2.handle_question(1, StepKind::Verify, items).await
        });

        // Give the waiter a moment to register its handle.
        tokio::task::yield_now().await;
        let pending = broker.get_pending();
        assert_eq!(pending.len(), 1);
        let id = pending[0].id.clone();

        let mut answers = HashMap::new();
        answers.insert("DB?".to_string(), "Postgres".to_string());
        assert!(broker.submit_answer(&id, answers.clone()).unwrap());

        let outcome = waiter.await.unwrap().unwrap();
        match outcome {
            BrokerOutcome::Allowed { answers: got, .. } => assert_eq!(got, answers),
            BrokerOutcome::Rejected { .. } => panic!("expected Allowed"),
        }
        assert!(broker.get_pending().is_empty());
    }

    #[tokio::test]
    async fn duplicate_submit_answer_returns_false_without_side_effects() {
        let broker = QuestionBroker::new(store());
        let items = vec![];
        let broker = Arc::new(broker);
        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move { broker2.handle_question(1, StepKind::Verify, items).await });

        tokio::task::yield_now().await;
        let id = broker.get_pending()[0].id.clone();

        assert!(broker.submit_answer(&id, HashMap::new()).unwrap());
        assert!(!broker.submit_answer(&id, HashMap::new()).unwrap());
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reject_all_resumes_every_outstanding_caller() {
        let broker = Arc::new(QuestionBroker::new(store()));
        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move {
            broker2.handle_question(1, StepKind::Verify, vec![]).await
        });

        tokio::task::yield_now().await;
        broker.reject_all("shutting down");

        let outcome = waiter.await.unwrap().unwrap();
        assert!(matches!(outcome, BrokerOutcome::Rejected { .. }));
        assert!(broker.get_pending().is_empty());
    }
}
