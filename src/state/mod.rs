//! Crash-safe persistence of the full workflow state document.
//!
//! Grounded on the teacher's `workflow::state` module (load/save round trip,
//! stage/gate transition helpers) generalized to the spec's phase/step
//! vocabulary and atomic-write contract.

mod model;
mod store;

pub use model::{
    CommitRecord, ErrorRecord, Phase, PhaseStatus, Question, QuestionItem, QuestionOption,
    StepKind, StepStatus, WorkflowState, WorkflowStatus,
};
pub use store::StateStore;
