//! The top-level state machine: drives a product brief through
//! discuss → plan → execute → verify per phase, with a bounded gap loop and
//! human-in-the-loop escalation.
//!
//! Grounded on the teacher's `workflow::runner::WorkflowRunner` (stage loop,
//! persist-after-every-stage, resume-from-state) and `ralph_loop::run`
//! (bounded-iteration-then-escalate shape for the gap loop), generalized
//! from the teacher's named stage list to the spec's fixed
//! discuss/plan/execute/verify cycle with a verify-driven gap loop the
//! teacher has no counterpart for.

mod verdict;

pub use verdict::Verdict;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::activity::{ActivityKind, ActivityStore};
use crate::broker::{BrokerOutcome, QuestionBroker};
use crate::facade::{AgentFacade, RunOptions as FacadeRunOptions};
use crate::ipc::EventLogWriter;
use crate::notify::{question_notification, Notification, NotificationManager, NotificationType, Severity};
use crate::state::{
    ErrorRecord, Phase, PhaseStatus, QuestionItem, QuestionOption, StateStore, StepKind, WorkflowStatus,
};
use crate::{Error, Result};

const GAP_ITERATION_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Quick,
    Standard,
    Comprehensive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Quality,
    Balanced,
    Budget,
}

/// Inputs named by the spec: a phase selector plus the flag set.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub skip_discuss: bool,
    pub skip_verify: bool,
    pub auto_resume: bool,
    pub depth: Depth,
    pub model: ModelTier,
    pub phases: Option<(u32, u32)>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            skip_discuss: false,
            skip_verify: false,
            auto_resume: false,
            depth: Depth::Standard,
            model: ModelTier::Balanced,
            phases: None,
        }
    }
}

pub struct Orchestrator {
    store: Arc<StateStore>,
    facade: Arc<AgentFacade>,
    broker: Arc<QuestionBroker>,
    notifications: Arc<NotificationManager>,
    activity: Arc<ActivityStore>,
    events: Arc<EventLogWriter>,
    brief: String,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<StateStore>,
        facade: Arc<AgentFacade>,
        broker: Arc<QuestionBroker>,
        notifications: Arc<NotificationManager>,
        activity: Arc<ActivityStore>,
        events: Arc<EventLogWriter>,
        brief: String,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            facade,
            broker,
            notifications,
            activity,
            events,
            brief,
            options,
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.initialize_if_needed().await?;
        self.re_emit_pending_questions_on_resume();

        loop {
            let snapshot = self.store.snapshot();
            let Some(phase) = self.next_runnable_phase(&snapshot) else {
                break;
            };

            if let Some((from, to)) = self.options.phases {
                if phase.number < from || phase.number > to {
                    break;
                }
            }

            match self.run_phase(phase.number).await {
                Ok(()) => {}
                Err(Error::ShuttingDown) => return Err(Error::ShuttingDown),
                Err(e) => {
                    self.handle_phase_error(phase.number, &e).await?;
                }
            }
        }

        self.complete().await
    }

    async fn initialize_if_needed(&self) -> Result<()> {
        let snapshot = self.store.snapshot();
        if !snapshot.phases.is_empty() {
            return Ok(());
        }

        info!("no roadmap yet, asking the agent to generate one");
        let prompt = format!(
            "Generate a phased roadmap for the following product brief. \
             Respond with one phase name per line.\n\n{}",
            self.brief
        );
        let outcome = self
            .facade
            .run(&prompt, 0, StepKind::Idle, FacadeRunOptions::default())
            .await?;

        if !outcome.success {
            return Err(Error::Command(
                outcome.error.unwrap_or_else(|| "roadmap generation failed".to_string()),
            ));
        }

        let phases = parse_roadmap(outcome.result_text.as_deref().unwrap_or_default());
        self.store.apply(|s| {
            s.phases = phases;
            s.status = WorkflowStatus::Running;
            if let Some(first) = s.phases.first() {
                s.current_phase = first.number;
            }
        })?;

        Ok(())
    }

    /// Open Question (b): cancel reminders on restore when the pending set
    /// is empty; otherwise re-emit so a restarted notification adapter set
    /// still sees an outstanding question.
    fn re_emit_pending_questions_on_resume(&self) {
        let snapshot = self.store.snapshot();
        if snapshot.pending_questions.is_empty() {
            return;
        }

        for question in snapshot.pending_questions.values() {
            let notification = question_notification(question);
            let notifications = self.notifications.clone();
            let payload = notification.clone();
            tokio::spawn(async move { notifications.notify(&payload).await });
        }
    }

    fn next_runnable_phase(&self, snapshot: &crate::state::WorkflowState) -> Option<Phase> {
        snapshot
            .phases
            .iter()
            .find(|p| !matches!(p.status, PhaseStatus::Completed | PhaseStatus::Skipped))
            .cloned()
    }

    async fn run_phase(&self, phase_number: u32) -> Result<()> {
        self.store.apply(|s| {
            s.current_phase = phase_number;
            if let Some(phase) = s.phase_mut(phase_number) {
                phase.status = PhaseStatus::InProgress;
                phase.started_at = Some(chrono::Utc::now());
            }
        })?;
        self.record_event("phase-started", serde_json::json!({ "phase": phase_number }))?;
        self.activity
            .record(ActivityKind::PhaseStarted, &format!("Phase {phase_number} started"), None);

        if self.options.skip_discuss {
            self.store.apply(|s| {
                if let Some(phase) = s.phase_mut(phase_number) {
                    phase.mark_step_done(StepKind::Discuss);
                }
            })?;
        } else {
            self.run_step(phase_number, StepKind::Discuss).await?;
        }

        loop {
            self.run_step(phase_number, StepKind::Plan).await?;
            self.run_step(phase_number, StepKind::Execute).await?;

            if self.options.skip_verify {
                self.store.apply(|s| {
                    if let Some(phase) = s.phase_mut(phase_number) {
                        phase.mark_step_done(StepKind::Verify);
                    }
                })?;
                break;
            }

            match self.run_verify(phase_number).await? {
                Verdict::Passed => break,
                Verdict::GapsFound => {
                    let mut updated = self.store.apply(|s| {
                        if let Some(phase) = s.phase_mut(phase_number) {
                            phase.gap_iterations += 1;
                            phase.reset_step(StepKind::Plan);
                            phase.reset_step(StepKind::Execute);
                        }
                    })?;
                    let iterations = updated
                        .phase_mut(phase_number)
                        .map(|p| p.gap_iterations)
                        .unwrap_or(0);
                    if iterations > GAP_ITERATION_LIMIT {
                        warn!(phase = phase_number, "gap loop exceeded bound, promoting to human_needed");
                        self.handle_human_needed(phase_number).await?;
                        break;
                    }
                }
                Verdict::HumanNeeded => {
                    self.handle_human_needed(phase_number).await?;
                    break;
                }
            }
        }

        let updated = self.store.apply(|s| {
            if let Some(phase) = s.phase_mut(phase_number) {
                if phase.required_steps_done() {
                    phase.status = PhaseStatus::Completed;
                    phase.completed_at = Some(chrono::Utc::now());
                }
            }
        })?;

        // The retry/skip branches of handle_human_needed can leave the phase
        // InProgress or Skipped instead of Completed; only fire the
        // completion event when it actually landed on Completed.
        let is_completed = updated
            .phases
            .iter()
            .find(|p| p.number == phase_number)
            .map(|p| matches!(p.status, PhaseStatus::Completed))
            .unwrap_or(false);

        if is_completed {
            self.record_event("phase-completed", serde_json::json!({ "phase": phase_number }))?;
            self.activity
                .record(ActivityKind::PhaseCompleted, &format!("Phase {phase_number} completed"), None);
        }

        Ok(())
    }

    async fn run_step(&self, phase_number: u32, step: StepKind) -> Result<()> {
        self.store.apply(|s| s.current_step = step)?;
        self.record_event("step-started", serde_json::json!({ "phase": phase_number, "step": step }))?;
        self.activity
            .record(ActivityKind::StepStarted, &format!("Phase {phase_number}: {step:?}"), None);

        let outcome = self.run_with_one_retry(phase_number, step).await?;
        if !outcome.success {
            return Err(Error::Command(
                outcome.error.unwrap_or_else(|| "step failed".to_string()),
            ));
        }

        self.store.apply(|s| {
            if let Some(phase) = s.phase_mut(phase_number) {
                phase.mark_step_done(step);
            }
        })?;
        self.record_event("step-completed", serde_json::json!({ "phase": phase_number, "step": step }))?;
        self.activity
            .record(ActivityKind::StepCompleted, &format!("Phase {phase_number}: {step:?} done"), None);

        Ok(())
    }

    async fn run_verify(&self, phase_number: u32) -> Result<Verdict> {
        self.store.apply(|s| s.current_step = StepKind::Verify)?;
        self.record_event("step-started", serde_json::json!({ "phase": phase_number, "step": "verify" }))?;

        let outcome = self.run_with_one_retry(phase_number, StepKind::Verify).await?;
        if !outcome.success {
            return Err(Error::Command(
                outcome.error.unwrap_or_else(|| "verify failed".to_string()),
            ));
        }

        let verdict = Verdict::parse(outcome.result_text.as_deref().unwrap_or_default());
        if verdict == Verdict::Passed {
            self.store.apply(|s| {
                if let Some(phase) = s.phase_mut(phase_number) {
                    phase.mark_step_done(StepKind::Verify);
                }
            })?;
        }
        self.record_event(
            "step-completed",
            serde_json::json!({ "phase": phase_number, "step": "verify", "verdict": format!("{verdict:?}") }),
        )?;

        Ok(verdict)
    }

    /// One automatic retry on command failure, per the error-handling design.
    async fn run_with_one_retry(&self, phase_number: u32, step: StepKind) -> Result<crate::facade::AgentOutcome> {
        let prompt = self.build_prompt(phase_number, step);
        let opts = FacadeRunOptions::default();

        match self.facade.run(&prompt, phase_number, step, opts.clone()).await {
            Ok(outcome) if outcome.success => Ok(outcome),
            _ => {
                warn!(phase = phase_number, ?step, "command failed, retrying once");
                self.facade.run(&prompt, phase_number, step, opts).await
            }
        }
    }

    fn build_prompt(&self, phase_number: u32, step: StepKind) -> String {
        let depth = match self.options.depth {
            Depth::Quick => "quick",
            Depth::Standard => "standard",
            Depth::Comprehensive => "comprehensive",
        };
        format!(
            "Phase {phase_number}, step {step:?} (depth: {depth}).\n\nProduct brief:\n{}",
            self.brief
        )
    }

    async fn handle_human_needed(&self, phase_number: u32) -> Result<()> {
        let item = QuestionItem {
            prompt: format!("Phase {phase_number} needs a decision"),
            header: Some("How should the orchestrator proceed?".to_string()),
            options: vec![
                QuestionOption { label: "retry".to_string(), description: None },
                QuestionOption { label: "skip".to_string(), description: None },
                QuestionOption { label: "abort".to_string(), description: None },
            ],
            multi_select: false,
        };

        // Notified via the broker's Pending event, bridged to the
        // Notification Manager by QuestionBroker::spawn_notifier.
        let outcome = self.broker.handle_question(phase_number, StepKind::Verify, vec![item]).await?;
        let choice = match outcome {
            BrokerOutcome::Allowed { answers, .. } => answers.values().next().cloned().unwrap_or_default(),
            BrokerOutcome::Rejected { .. } => "abort".to_string(),
        };

        match choice.as_str() {
            "retry" => {
                self.store.apply(|s| {
                    if let Some(phase) = s.phase_mut(phase_number) {
                        phase.gap_iterations = 0;
                        phase.reset_step(StepKind::Plan);
                        phase.reset_step(StepKind::Execute);
                        phase.reset_step(StepKind::Verify);
                    }
                })?;
            }
            "skip" => {
                self.store.apply(|s| {
                    if let Some(phase) = s.phase_mut(phase_number) {
                        phase.status = PhaseStatus::Skipped;
                    }
                })?;
            }
            _ => {
                self.store.apply(|s| {
                    if let Some(phase) = s.phase_mut(phase_number) {
                        phase.status = PhaseStatus::Failed;
                    }
                })?;
                return Err(Error::Command(format!("phase {phase_number} aborted by operator")));
            }
        }

        Ok(())
    }

    async fn handle_phase_error(&self, phase_number: u32, error: &Error) -> Result<()> {
        error!(phase = phase_number, "phase failed: {error}");
        self.store.apply(|s| {
            s.push_error(ErrorRecord {
                timestamp: chrono::Utc::now(),
                phase: phase_number,
                step: s.current_step,
                message: error.to_string(),
                truncated_output: None,
            });
            if let Some(phase) = s.phase_mut(phase_number) {
                phase.status = PhaseStatus::Failed;
            }
            s.status = WorkflowStatus::Error;
        })?;
        self.activity.record(ActivityKind::PhaseFailed, &format!("Phase {phase_number} failed: {error}"), None);

        let notification = Notification::new(
            format!("phase-{phase_number}-error"),
            NotificationType::Error,
            format!("Phase {phase_number} failed"),
            error.to_string(),
        )
        .with_options(vec!["retry".to_string(), "skip".to_string(), "abort".to_string()])
        .with_severity(Severity::Critical);
        self.notifications.notify(&notification).await;

        Err(Error::Command(error.to_string()))
    }

    async fn complete(&self) -> Result<()> {
        let snapshot = self.store.snapshot();
        if snapshot.phases.iter().any(|p| matches!(p.status, PhaseStatus::Failed)) {
            return Ok(());
        }

        info!("all phases complete, running milestone completion");
        let outcome = self
            .facade
            .run(
                "Run the milestone-completion command for this roadmap.",
                0,
                StepKind::Done,
                FacadeRunOptions::default(),
            )
            .await?;

        self.store.apply(|s| s.status = WorkflowStatus::Complete)?;
        self.record_event("build-complete", serde_json::json!({ "success": outcome.success }))?;
        self.activity.record(ActivityKind::BuildComplete, "Build complete", None);

        let notification = Notification::new(
            "build-complete",
            NotificationType::Complete,
            "Build complete",
            "All phases finished.",
        );
        self.notifications.notify(&notification).await;

        Ok(())
    }

    fn record_event(&self, event: &str, data: serde_json::Value) -> Result<()> {
        self.events.write(event, data)?;
        Ok(())
    }
}

fn parse_roadmap(text: &str) -> Vec<Phase> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, name)| Phase::new((i + 1) as u32, name.trim_start_matches(['-', '*', '.']).trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roadmap_strips_bullets_and_numbers_lines() {
        let phases = parse_roadmap("- Setup\n- Build API\n- Ship\n");
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0].number, 1);
        assert_eq!(phases[0].name, "Setup");
        assert_eq!(phases[2].name, "Ship");
    }

    #[test]
    fn parse_roadmap_skips_blank_lines() {
        let phases = parse_roadmap("Setup\n\n\nBuild\n");
        assert_eq!(phases.len(), 2);
    }
}
