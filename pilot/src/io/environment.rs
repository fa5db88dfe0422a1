//! Environment (browser backend) abstraction.
//!
//! The worker thread is the only owner of an [`Environment`]. [`BridgeEnvironment`] talks
//! to a long-lived bridge process over JSON lines:
//!
//! ```text
//! -> {"op":"reset"}
//! <- {"observation":{...}}
//! -> {"op":"step","code":"click('13')"}
//! <- {"observation":{...},"done":false}
//! <- {"error":"browser crashed"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{EnvStep, RawObservation};
use crate::io::config::EnvironmentConfig;
use crate::io::process::command_from_argv;

/// Stateful backend that executes action code.
pub trait Environment {
    /// Start from a fresh page.
    fn reset(&mut self) -> Result<RawObservation>;

    /// Execute one action statement. `Err` means the backend itself failed, not the action.
    fn step(&mut self, code: &str) -> Result<EnvStep>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Reset,
    Step { code: &'a str },
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    observation: Option<RawObservation>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl BridgeResponse {
    fn into_step(self) -> Result<EnvStep> {
        if let Some(error) = self.error {
            bail!("browser bridge error: {error}");
        }
        let observation = self
            .observation
            .ok_or_else(|| anyhow!("browser bridge response missing observation"))?;
        Ok(EnvStep {
            observation,
            done: self.done,
        })
    }
}

struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Environment backed by a browser bridge child process, spawned on first use.
pub struct BridgeEnvironment {
    config: EnvironmentConfig,
    process: Option<BridgeProcess>,
}

impl BridgeEnvironment {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    fn process(&mut self) -> Result<&mut BridgeProcess> {
        if self.process.is_none() {
            self.process = Some(self.spawn()?);
        }
        self.process
            .as_mut()
            .ok_or_else(|| anyhow!("browser bridge not running"))
    }

    fn spawn(&self) -> Result<BridgeProcess> {
        let mut cmd = command_from_argv(&self.config.command).context("environment.command")?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn().context("spawn browser bridge")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        info!(pid = child.id(), "browser bridge started");
        Ok(BridgeProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn call(&mut self, request: &BridgeRequest<'_>) -> Result<EnvStep> {
        let mut line = serde_json::to_string(request).context("serialize bridge request")?;
        line.push('\n');

        let result = exchange(self.process()?, &line);
        if result.is_err() {
            // A bridge that failed mid-exchange is out of sync; start over on next use.
            self.shutdown();
        }
        let response: BridgeResponse =
            serde_json::from_str(&result?).context("parse browser bridge response")?;
        response.into_step()
    }

    fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(err) = process.child.kill() {
                debug!(err = %err, "browser bridge already exited");
            }
            if let Err(err) = process.child.wait() {
                warn!(err = %err, "failed to reap browser bridge");
            }
        }
    }
}

fn exchange(process: &mut BridgeProcess, line: &str) -> Result<String> {
    process
        .stdin
        .write_all(line.as_bytes())
        .and_then(|()| process.stdin.flush())
        .context("write to browser bridge")?;
    let mut response = String::new();
    let n = process
        .stdout
        .read_line(&mut response)
        .context("read from browser bridge")?;
    if n == 0 {
        bail!("browser bridge closed its output");
    }
    Ok(response)
}

impl Environment for BridgeEnvironment {
    #[instrument(skip_all)]
    fn reset(&mut self) -> Result<RawObservation> {
        let step = self.call(&BridgeRequest::Reset)?;
        debug!(url = %step.observation.url, "environment reset");
        Ok(step.observation)
    }

    #[instrument(skip_all, fields(code = %code))]
    fn step(&mut self, code: &str) -> Result<EnvStep> {
        self.call(&BridgeRequest::Step { code })
    }
}

impl Drop for BridgeEnvironment {
    fn drop(&mut self) {
        self.shutdown();
    }
}
