//! Pilot configuration stored in `pilot.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "pilot.toml";

/// Pilot configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PilotConfig {
    /// Maximum number of actions per goal.
    pub max_steps: u32,

    /// Number of trajectory blocks rendered into each step prompt.
    pub context_max_events: usize,

    /// Maximum bytes for the user prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    /// How long the idle worker waits on its command queue per poll.
    pub queue_poll_ms: u64,

    /// Where per-goal trajectory logs are written. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory_dir: Option<PathBuf>,

    pub intent: IntentConfig,
    pub reasoner: ReasonerConfig,
    pub environment: EnvironmentConfig,
}

/// What to do when the reasoning service cannot produce an intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentFailurePolicy {
    /// Keep going without an intent (or with the previous one).
    Continue,
    /// End the goal as fatal.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IntentConfig {
    /// Intent requests made before `on_failure` applies.
    pub attempts: u32,
    pub on_failure: IntentFailurePolicy,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            on_failure: IntentFailurePolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Command that answers one JSON request on stdin with one JSON object on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate reasoner stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            command: vec!["pilot-reasoner".to_string()],
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

impl ReasonerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Long-lived browser bridge speaking JSON lines on stdin/stdout.
    pub command: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            command: vec!["pilot-browser-bridge".to_string()],
        }
    }
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            context_max_events: 10,
            prompt_budget_bytes: 60_000,
            queue_poll_ms: 100,
            trajectory_dir: None,
            intent: IntentConfig::default(),
            reasoner: ReasonerConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.context_max_events == 0 {
            return Err(anyhow!("context_max_events must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.queue_poll_ms == 0 {
            return Err(anyhow!("queue_poll_ms must be > 0"));
        }
        if self.intent.attempts == 0 {
            return Err(anyhow!("intent.attempts must be > 0"));
        }
        if self.reasoner.timeout_secs == 0 {
            return Err(anyhow!("reasoner.timeout_secs must be > 0"));
        }
        if self.reasoner.output_limit_bytes == 0 {
            return Err(anyhow!("reasoner.output_limit_bytes must be > 0"));
        }
        if is_blank_command(&self.reasoner.command) {
            return Err(anyhow!("reasoner.command must be a non-empty array"));
        }
        if is_blank_command(&self.environment.command) {
            return Err(anyhow!("environment.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PilotConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let cfg = PilotConfig {
            max_steps: 7,
            trajectory_dir: Some(PathBuf::from(".pilot/trajectories")),
            ..PilotConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "max_steps = 12\n\n[intent]\non_failure = \"fail\"\n").expect("write");

        let cfg = load_config(&path).expect("load");

        assert_eq!(cfg.max_steps, 12);
        assert_eq!(cfg.intent.on_failure, IntentFailurePolicy::Fail);
        assert_eq!(cfg.intent.attempts, 1);
        assert_eq!(cfg.context_max_events, 10);
        assert_eq!(cfg.reasoner, ReasonerConfig::default());
    }

    #[test]
    fn rejects_invalid_values_with_key_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "max_steps = 0\n").expect("write");
        let err = load_config(&path).expect_err("zero steps");
        assert!(format!("{err:#}").contains("max_steps"));

        let cfg = PilotConfig {
            environment: EnvironmentConfig {
                command: vec![" ".to_string()],
            },
            ..PilotConfig::default()
        };
        let err = cfg.validate().expect_err("blank command");
        assert!(err.to_string().contains("environment.command"));
    }
}
