//! Default [`super::AgentRuntime`]: spawns the agent CLI in headless,
//! stream-json print mode and parses one JSON object per stdout line.
//!
//! Grounded on the teacher's `harness::claude_code::ClaudeCodeHarness`
//! (`build_args`/`parse_output_line` shape), narrowed from a dispatchable
//! `Harness` trait down to a single external runtime the way the spec
//! treats it: a black box that consumes a prompt and streams messages.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{AgentMessage, AgentRuntime};
use crate::{Error, Result};

pub struct ClaudeAgentRuntime {
    binary: String,
    model: String,
    skip_permissions: bool,
}

impl ClaudeAgentRuntime {
    pub fn new(binary: impl Into<String>, model: impl Into<String>, skip_permissions: bool) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            skip_permissions,
        }
    }

    fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            self.model.clone(),
        ];

        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.push("--verbose".to_string());
        args
    }
}

#[async_trait]
impl AgentRuntime for ClaudeAgentRuntime {
    async fn stream(&self, prompt: &str) -> Result<Vec<AgentMessage>> {
        let args = self.build_args(prompt);
        debug!("running: {} {:?}", self.binary, args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Facade(format!("failed to spawn agent runtime: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Facade("failed to capture agent runtime stdout".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut messages = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<AgentMessage>(&line) {
                Ok(message) => messages.push(message),
                Err(_) => debug!("unparseable agent runtime line, skipping: {line}"),
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!("agent runtime process exited with status: {status}");
        }

        Ok(messages)
    }
}
