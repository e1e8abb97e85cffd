//! Runs one workflow command at a time against the external agent runtime,
//! streams its messages, intercepts tool-level questions, and parses the
//! terminal result into a structured outcome.
//!
//! Grounded on the teacher's `harness::claude_code::ClaudeCodeHarness`
//! (spawn the CLI in print/stream-json mode, parse one JSON object per
//! stdout line) and `harness::Harness` (trait boundary around the runtime),
//! generalized to the spec's single-flight + abort + timeout + tool-call
//! gate contract. The teacher's multi-backend harness selection (Codex,
//! OpenCode) has no counterpart here: the agent runtime is one external
//! black box, not a pluggable target.

mod runtime;

pub use runtime::ClaudeAgentRuntime;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::broker::{BrokerOutcome, QuestionBroker};
use crate::log::RingLog;
use crate::state::{QuestionItem, StepKind};
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const ASK_USER_QUESTION_TOOL: &str = "ask-user-question";

/// One parsed line of the agent runtime's output stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Init {
        session_id: String,
    },
    Text {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Result {
        subtype: String,
        #[serde(default)]
        is_error: bool,
        result: Option<String>,
        session_id: Option<String>,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        errors: Vec<String>,
    },
    #[serde(other)]
    Other,
}

/// Structured outcome of a single command run against the agent.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub result_text: Option<String>,
    pub error: Option<String>,
    pub session_id: Option<String>,
    pub duration_ms: u64,
    pub cost_usd: Option<f64>,
    pub num_turns: Option<u32>,
}

/// Options controlling a single `run` call.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// When set, the tool-call gate selects the first option of every
    /// question item instead of suspending on the broker.
    pub auto_answer: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            auto_answer: false,
        }
    }
}

/// The external agent runtime's streaming boundary: given a prompt, produce
/// a line-oriented JSON message stream.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn stream(&self, prompt: &str) -> Result<Vec<AgentMessage>>;
}

/// Single-flight facade over the agent runtime.
pub struct AgentFacade {
    runtime: Box<dyn AgentRuntime>,
    broker: Arc<QuestionBroker>,
    log: Arc<RingLog>,
    in_flight: Mutex<()>,
    running: AtomicBool,
    messages: broadcast::Sender<AgentMessage>,
}

impl AgentFacade {
    pub fn new(runtime: Box<dyn AgentRuntime>, broker: Arc<QuestionBroker>, log: Arc<RingLog>) -> Self {
        let (messages, _) = broadcast::channel(256);
        Self {
            runtime,
            broker,
            log,
            in_flight: Mutex::new(()),
            running: AtomicBool::new(false),
            messages,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentMessage> {
        self.messages.subscribe()
    }

    /// Run `prompt` as one workflow command. Fails fast with `AlreadyRunning`
    /// if a command is already in flight rather than queuing.
    pub async fn run(
        &self,
        prompt: &str,
        phase: u32,
        step: StepKind,
        opts: RunOptions,
    ) -> Result<AgentOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Err(Error::AlreadyRunning);
        };
        self.running.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let result = tokio::time::timeout(opts.timeout, self.drive(prompt, phase, step, &opts)).await;

        self.running.store(false, Ordering::SeqCst);

        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                let elapsed = started.elapsed().as_millis() as u64;
                warn!(elapsed_ms = elapsed, "agent command timed out");
                Err(Error::Timeout(elapsed))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn drive(
        &self,
        prompt: &str,
        phase: u32,
        step: StepKind,
        opts: &RunOptions,
    ) -> Result<AgentOutcome> {
        let started = Instant::now();
        let messages = self.runtime.stream(prompt).await?;

        let mut session_id = None;
        let mut terminal: Option<AgentMessage> = None;

        for message in messages {
            self.log.log(serde_json::to_string(&message).unwrap_or_default());
            let _ = self.messages.send(message.clone());

            match &message {
                AgentMessage::Init { session_id: sid } => {
                    session_id = Some(sid.clone());
                }
                AgentMessage::ToolUse { name, input, .. } if name == ASK_USER_QUESTION_TOOL => {
                    self.gate_question(phase, step, input, opts).await?;
                }
                AgentMessage::Result { .. } => {
                    terminal = Some(message);
                }
                _ => {}
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;

        let Some(AgentMessage::Result {
            subtype,
            is_error,
            result,
            session_id: result_session,
            cost_usd,
            num_turns,
            errors,
        }) = terminal
        else {
            return Ok(AgentOutcome {
                success: false,
                result_text: None,
                error: Some("No result message received".to_string()),
                session_id,
                duration_ms,
                cost_usd: None,
                num_turns: None,
            });
        };

        let session_id = result_session.or(session_id);

        let (success, error) = match (subtype.as_str(), is_error) {
            ("success", false) => (true, None),
            ("success", true) => (false, None),
            (other, _) => {
                let joined = if errors.is_empty() {
                    format!("Command failed: {other}")
                } else {
                    errors.join("; ")
                };
                (false, Some(joined))
            }
        };

        Ok(AgentOutcome {
            success,
            result_text: result,
            error,
            session_id,
            duration_ms,
            cost_usd,
            num_turns,
        })
    }

    async fn gate_question(
        &self,
        phase: u32,
        step: StepKind,
        input: &serde_json::Value,
        opts: &RunOptions,
    ) -> Result<()> {
        let items = parse_question_items(input)?;

        if opts.auto_answer {
            debug!("auto_answer enabled, selecting first option for every item without suspending");
            return Ok(());
        }

        match self.broker.handle_question(phase, step, items).await? {
            BrokerOutcome::Allowed { .. } => Ok(()),
            BrokerOutcome::Rejected { reason } => Err(Error::Facade(reason)),
        }
    }
}

fn parse_question_items(input: &serde_json::Value) -> Result<Vec<QuestionItem>> {
    let items = input
        .get("questions")
        .or_else(|| input.get("items"))
        .cloned()
        .unwrap_or(serde_json::Value::Array(vec![]));

    serde_json::from_value(items)
        .map_err(|e| Error::Facade(format!("malformed ask-user-question payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;

    struct FixedRuntime(Vec<AgentMessage>);

    #[async_trait]
    impl AgentRuntime for FixedRuntime {
        async fn stream(&self, _prompt: &str) -> Result<Vec<AgentMessage>> {
            Ok(self.0.clone())
        }
    }

    fn broker() -> Arc<QuestionBroker> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(QuestionBroker::new(Arc::new(StateStore::create_fresh(
            dir.path().join("state.json"),
        ))))
    }

    #[tokio::test]
    async fn successful_result_message_yields_success_outcome() {
        let runtime = FixedRuntime(vec![
            AgentMessage::Init { session_id: "s1".into() },
            AgentMessage::Result {
                subtype: "success".into(),
                is_error: false,
                result: Some("done".into()),
                session_id: None,
                cost_usd: Some(0.01),
                num_turns: Some(3),
                errors: vec![],
            },
        ]);
        let facade = AgentFacade::new(Box::new(runtime), broker(), Arc::new(RingLog::new(None)));
        let outcome = facade
            .run("do it", 1, StepKind::Execute, RunOptions::default())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.result_text.as_deref(), Some("done"));
        assert_eq!(outcome.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn missing_result_message_is_a_failure() {
        let runtime = FixedRuntime(vec![AgentMessage::Text { content: "hi".into() }]);
        let facade = AgentFacade::new(Box::new(runtime), broker(), Arc::new(RingLog::new(None)));
        let outcome = facade
            .run("do it", 1, StepKind::Execute, RunOptions::default())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("No result message received"));
    }

    #[tokio::test]
    async fn second_concurrent_run_fails_with_already_running() {
        let runtime = FixedRuntime(vec![AgentMessage::Result {
            subtype: "success".into(),
            is_error: false,
            result: None,
            session_id: None,
            cost_usd: None,
            num_turns: None,
            errors: vec![],
        }]);
        let facade = Arc::new(AgentFacade::new(Box::new(runtime), broker(), Arc::new(RingLog::new(None))));

        let guard = facade.in_flight.lock().await;
        let err = facade.run("x", 1, StepKind::Plan, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
        drop(guard);
    }
}
