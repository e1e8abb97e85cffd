//! gsd-autopilot: unattended AI development workflow orchestrator
//!
//! Drives a product brief through discuss/plan/execute/verify phases against
//! an external agent runtime, without requiring an operator at a prompt. The
//! orchestrator intercepts the agent's requests for human input, routes them
//! through pluggable outbound notification channels, and collects answers
//! through a locally hosted response surface. State is persisted so a crash
//! or restart resumes without losing progress.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Orchestrator                  │
//! │  discuss → plan → execute → verify, per phase │
//! └───────┬───────────────┬───────────────┬───────┘
//!         ▼               ▼               ▼
//!  ┌────────────┐  ┌─────────────┐  ┌────────────┐
//!  │AgentFacade │  │QuestionBroker│  │ StateStore │
//!  │ (runtime)  │  │ (suspension) │  │  (atomic)  │
//!  └─────┬──────┘  └──────┬───────┘  └────────────┘
//!        │                │
//!        ▼                ▼
//!  ┌────────────┐  ┌─────────────────┐
//!  │  RingLog   │  │NotificationMgr  │
//!  └────────────┘  └─────────────────┘
//! ```
//!
//! The [`ipc`] layer and [`server`] module let a separate dashboard process
//! observe state, tail events, and post answers back without sharing memory
//! with the core.

pub mod activity;
pub mod broker;
pub mod config;
pub mod facade;
pub mod ipc;
pub mod log;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod shutdown;
pub mod state;

pub use activity::{ActivityEntry, ActivityKind, ActivityStore};
pub use broker::QuestionBroker;
pub use config::Config;
pub use facade::{AgentFacade, AgentOutcome};
pub use log::RingLog;
pub use notify::{Notification, NotificationChannel, NotificationManager};
pub use orchestrator::Orchestrator;
pub use state::{Phase, PhaseStatus, Question, StateStore, WorkflowState, WorkflowStatus};

/// Crate-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("agent runtime error: {0}")]
    Facade(String),

    #[error("a command is already running against the agent")]
    AlreadyRunning,

    #[error("command timed out after {0}ms")]
    Timeout(u64),

    #[error("state file not found at {0}")]
    StateNotFound(std::path::PathBuf),

    #[error("state document failed schema validation: {0}")]
    InvalidSchema(String),

    #[error("no pending question with id {0}")]
    QuestionNotFound(String),

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("shutting down")]
    ShuttingDown,

    #[error("notification error: {0}")]
    Notification(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
