//! Cross-process surface for a dashboard that runs outside the core: an
//! append-only event log, a heartbeat file, and an answers-directory poller,
//! all rooted at `<project>/.planning/`.
//!
//! Grounded on the teacher's atomic-write discipline (`workflow::state`) and
//! its `interactive` module's filesystem-driven coordination; the event log
//! and answers poller are new, the spec names no teacher counterpart for
//! them.

mod answers;
mod event_log;
mod heartbeat;

pub use answers::AnswerPoller;
pub use event_log::{EventLogWriter, EventRecord};
pub use heartbeat::HeartbeatWriter;

use std::path::{Path, PathBuf};

/// Layout of the `.planning/` tree, composed portably from a project root.
#[derive(Debug, Clone)]
pub struct PlanningPaths {
    root: PathBuf,
}

impl PlanningPaths {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            root: project_dir.as_ref().join(".planning"),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("autopilot-state.json")
    }

    pub fn activity_file(&self) -> PathBuf {
        self.root.join("autopilot-activity.json")
    }

    pub fn events_file(&self) -> PathBuf {
        self.root.join("autopilot-log").join("events.ndjson")
    }

    pub fn sdk_output_file(&self) -> PathBuf {
        self.root.join("autopilot-log").join("sdk-output.log")
    }

    pub fn heartbeat_file(&self) -> PathBuf {
        self.root.join("autopilot-log").join("heartbeat.json")
    }

    pub fn answers_dir(&self) -> PathBuf {
        self.root.join("autopilot-answers")
    }

    pub fn agent_config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_under_dot_planning() {
        let paths = PlanningPaths::new("/tmp/myproject");
        assert_eq!(paths.state_file(), PathBuf::from("/tmp/myproject/.planning/autopilot-state.json"));
        assert_eq!(paths.answers_dir(), PathBuf::from("/tmp/myproject/.planning/autopilot-answers"));
    }
}
