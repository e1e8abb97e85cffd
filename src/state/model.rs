//! The persisted workflow state document.
//!
//! Mirrors the shape the dashboard process reads from `autopilot-state.json`:
//! every field here is part of the on-disk contract, so renaming or
//! reshaping one is a breaking change for out-of-process readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Top-level run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    WaitingForHuman,
    Error,
    Complete,
}

/// Which step of a phase is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Idle,
    Discuss,
    Plan,
    Execute,
    Verify,
    Done,
}

/// Status of a single step within a phase's per-step map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Idle,
    Done,
}

/// Status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// A single git commit recorded against a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub message: String,
}

/// One cohesive milestone in the roadmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub number: u32,
    pub name: String,
    pub status: PhaseStatus,
    pub steps: HashMap<StepKind, StepStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub commits: Vec<CommitRecord>,
    pub gap_iterations: u32,
    /// Set when this phase was injected mid-run rather than part of the
    /// original roadmap.
    pub inserted: Option<bool>,
    pub depends_on: Option<Vec<u32>>,
}

impl Phase {
    pub fn new(number: u32, name: impl Into<String>) -> Self {
        let mut steps = HashMap::new();
        for step in [
            StepKind::Discuss,
            StepKind::Plan,
            StepKind::Execute,
            StepKind::Verify,
        ] {
            steps.insert(step, StepStatus::Idle);
        }

        Self {
            number,
            name: name.into(),
            status: PhaseStatus::Pending,
            steps,
            started_at: None,
            completed_at: None,
            commits: Vec::new(),
            gap_iterations: 0,
            inserted: None,
            depends_on: None,
        }
    }

    /// A phase is only `completed` once plan, execute and verify are all
    /// `done` — discuss is optional per the step state machine.
    pub fn required_steps_done(&self) -> bool {
        [StepKind::Plan, StepKind::Execute, StepKind::Verify]
            .iter()
            .all(|s| matches!(self.steps.get(s), Some(StepStatus::Done)))
    }

    pub fn mark_step_done(&mut self, step: StepKind) {
        self.steps.insert(step, StepStatus::Done);
    }

    pub fn reset_step(&mut self, step: StepKind) {
        self.steps.insert(step, StepStatus::Idle);
    }
}

/// A single offered choice within a question item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub description: Option<String>,
}

/// One prompt within a (possibly batched) question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionItem {
    pub prompt: String,
    pub header: Option<String>,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

/// A structured request for a human decision, raised via the agent's
/// `ask-user-question` tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub phase: u32,
    pub step: StepKind,
    pub items: Vec<QuestionItem>,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    /// Answers keyed by the item's prompt, once resolved.
    pub answers: Option<HashMap<String, String>>,
}

impl Question {
    pub fn new(phase: u32, step: StepKind, items: Vec<QuestionItem>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phase,
            step,
            items,
            created_at: Utc::now(),
            answered_at: None,
            answers: None,
        }
    }
}

/// One entry in the append-only error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: u32,
    pub step: StepKind,
    pub message: String,
    pub truncated_output: Option<String>,
}

/// The full persisted document. Single writer (the core), any number of
/// readers tolerating staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub status: WorkflowStatus,
    pub current_phase: u32,
    pub current_step: StepKind,
    pub phases: Vec<Phase>,
    pub pending_questions: HashMap<String, Question>,
    pub error_history: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub tunnel_url: Option<String>,
}

impl WorkflowState {
    /// Build a fresh, never-persisted state document. Invariant (i) holds
    /// trivially: no pending questions, not waiting.
    pub fn new_fresh() -> Self {
        let now = Utc::now();
        Self {
            status: WorkflowStatus::Idle,
            current_phase: 0,
            current_step: StepKind::Idle,
            phases: Vec::new(),
            pending_questions: HashMap::new(),
            error_history: Vec::new(),
            started_at: now,
            last_updated_at: now,
            tunnel_url: None,
        }
    }

    /// Stamp `last_updated_at` with now. Never goes backwards (invariant iii)
    /// because `Utc::now()` is itself monotonic from the caller's
    /// perspective within one process.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated_at {
            self.last_updated_at = now;
        }
    }

    pub fn current_phase_mut(&mut self) -> Option<&mut Phase> {
        let n = self.current_phase;
        self.phases.iter_mut().find(|p| p.number == n)
    }

    pub fn phase_mut(&mut self, number: u32) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.number == number)
    }

    /// Register a newly raised question. Flips status to `waiting_for_human`
    /// per invariant (i).
    pub fn add_pending_question(&mut self, question: Question) {
        self.pending_questions.insert(question.id.clone(), question);
        self.status = WorkflowStatus::WaitingForHuman;
        self.touch();
    }

    /// Stamp the question answered and remove it from the pending set in one
    /// step, satisfying invariant (v). Returns the resolved question, if any.
    pub fn resolve_question(
        &mut self,
        id: &str,
        answers: HashMap<String, String>,
    ) -> Option<Question> {
        let mut question = self.pending_questions.remove(id)?;
        question.answered_at = Some(Utc::now());
        question.answers = Some(answers);

        if self.pending_questions.is_empty() && self.status == WorkflowStatus::WaitingForHuman {
            self.status = WorkflowStatus::Running;
        }
        self.touch();
        Some(question)
    }

    /// Drop every pending question without resolving it (shutdown / reject-all).
    pub fn clear_pending_questions(&mut self) {
        self.pending_questions.clear();
        if self.status == WorkflowStatus::WaitingForHuman {
            self.status = WorkflowStatus::Running;
        }
        self.touch();
    }

    pub fn push_error(&mut self, error: ErrorRecord) {
        self.error_history.push(error);
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_pending_questions() {
        let state = WorkflowState::new_fresh();
        assert!(state.pending_questions.is_empty());
        assert_eq!(state.status, WorkflowStatus::Idle);
    }

    #[test]
    fn adding_a_question_flips_status_to_waiting() {
        let mut state = WorkflowState::new_fresh();
        state.status = WorkflowStatus::Running;
        let q = Question::new(1, StepKind::Verify, vec![]);
        state.add_pending_question(q);
        assert_eq!(state.status, WorkflowStatus::WaitingForHuman);
        assert_eq!(state.pending_questions.len(), 1);
    }

    #[test]
    fn resolving_the_only_pending_question_returns_to_running() {
        let mut state = WorkflowState::new_fresh();
        state.status = WorkflowStatus::Running;
        let q = Question::new(1, StepKind::Verify, vec![]);
        let id = q.id.clone();
        state.add_pending_question(q);

        let mut answers = HashMap::new();
        answers.insert("DB?".to_string(), "Postgres".to_string());
        let resolved = state.resolve_question(&id, answers).unwrap();

        assert!(resolved.answered_at.is_some());
        assert!(state.pending_questions.is_empty());
        assert_eq!(state.status, WorkflowStatus::Running);
    }

    #[test]
    fn resolving_an_unknown_id_returns_none_and_does_not_mutate() {
        let mut state = WorkflowState::new_fresh();
        let q = Question::new(1, StepKind::Verify, vec![]);
        state.add_pending_question(q);
        let before = state.pending_questions.len();

        let result = state.resolve_question("not-a-real-id", HashMap::new());
        assert!(result.is_none());
        assert_eq!(state.pending_questions.len(), before);
    }

    #[test]
    fn phase_requires_plan_execute_verify_done_not_discuss() {
        let mut phase = Phase::new(1, "Setup");
        phase.mark_step_done(StepKind::Plan);
        phase.mark_step_done(StepKind::Execute);
        assert!(!phase.required_steps_done());
        phase.mark_step_done(StepKind::Verify);
        assert!(phase.required_steps_done());
    }
}
