//! Configuration loading: TOML file, then environment variables, then CLI
//! flags, in that order of increasing precedence.
//!
//! Grounded on the teacher's `Config::load` layering (explicit path →
//! project-local dotfile → home dotfile → built-in default), narrowed to
//! the single flat config this crate needs instead of the teacher's
//! per-category map.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::orchestrator::{Depth, ModelTier, OrchestratorOptions};
use crate::{Error, Result};

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    4173
}

fn default_depth() -> String {
    "standard".to_string()
}

fn default_model() -> String {
    "balanced".to_string()
}

fn default_claude_model() -> String {
    "opus".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeCodeConfig {
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_claude_model")]
    pub model: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub dangerously_skip_permissions: bool,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            binary: None,
            model: default_claude_model(),
            headless: true,
            dangerously_skip_permissions: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub prd: Option<PathBuf>,

    /// Comma-separated adapter names, e.g. "telegram,slack,log".
    #[serde(default)]
    pub notify: Vec<String>,

    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub skip_discuss: bool,

    #[serde(default)]
    pub skip_verify: bool,

    /// Raw "<from>-<to>" phase range, parsed by [`Config::phase_range`].
    #[serde(default)]
    pub phases: Option<String>,

    #[serde(default)]
    pub resume: bool,

    #[serde(default = "default_depth")]
    pub depth: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub claude_code: ClaudeCodeConfig,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            port: default_port(),
            prd: None,
            notify: vec!["log".to_string()],
            webhook_url: None,
            skip_discuss: false,
            skip_verify: false,
            phases: None,
            resume: false,
            depth: default_depth(),
            model: default_model(),
            claude_code: ClaudeCodeConfig::default(),
            telegram: None,
            slack: None,
        }
    }
}

impl Config {
    /// Layer: explicit path → `.gsd-autopilot/config.toml` in the current
    /// directory → `~/.gsd-autopilot/config.toml` → built-in default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            let local = PathBuf::from(".gsd-autopilot/config.toml");
            if local.exists() {
                return Some(local);
            }
            dirs::home_dir().map(|h| h.join(".gsd-autopilot/config.toml"))
        });

        let mut config = match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                toml::from_str(&content)?
            }
            _ => Config::default(),
        };

        config.apply_env();
        Ok(config)
    }

    /// Environment variables take precedence over the file, but CLI flags
    /// (applied by the caller after `load`) take precedence over both.
    fn apply_env(&mut self) {
        if let Ok(channel) = std::env::var("GSD_NOTIFY_CHANNEL") {
            self.notify = channel.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(url) = std::env::var("GSD_WEBHOOK_URL") {
            self.webhook_url = Some(url);
        }
        if let Ok(port) = std::env::var("GSD_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
    }

    pub fn phase_range(&self) -> Option<(u32, u32)> {
        let raw = self.phases.as_ref()?;
        let (from, to) = raw.split_once('-')?;
        Some((from.trim().parse().ok()?, to.trim().parse().ok()?))
    }

    pub fn depth(&self) -> Depth {
        match self.depth.as_str() {
            "quick" => Depth::Quick,
            "comprehensive" => Depth::Comprehensive,
            _ => Depth::Standard,
        }
    }

    pub fn model_tier(&self) -> ModelTier {
        match self.model.as_str() {
            "quality" => ModelTier::Quality,
            "budget" => ModelTier::Budget,
            _ => ModelTier::Balanced,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            skip_discuss: self.skip_discuss,
            skip_verify: self.skip_verify,
            auto_resume: self.resume,
            depth: self.depth(),
            model: self.model_tier(),
            phases: self.phase_range(),
        }
    }
}

/// Write a default config file under `.gsd-autopilot/` in the current
/// directory if one does not already exist.
pub fn init() -> Result<()> {
    let dir = PathBuf::from(".gsd-autopilot");
    std::fs::create_dir_all(&dir)?;

    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        let default_config = Config::default();
        let serialized = toml::to_string_pretty(&default_config).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, serialized)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_range_parses_dash_separated_bounds() {
        let mut config = Config::default();
        config.phases = Some("2-4".to_string());
        assert_eq!(config.phase_range(), Some((2, 4)));
    }

    #[test]
    fn missing_phases_yields_none() {
        let config = Config::default();
        assert_eq!(config.phase_range(), None);
    }

    #[test]
    fn unparseable_depth_falls_back_to_standard() {
        let mut config = Config::default();
        config.depth = "nonsense".to_string();
        assert_eq!(config.depth(), Depth::Standard);
    }
}
