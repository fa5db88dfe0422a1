//! Command surface and the dedicated worker thread that runs goals.
//!
//! Callers on any thread send [`Command`]s over a channel; the worker is the single
//! consumer and the only owner of the environment and reasoner. Interruption goes
//! through [`ControlState`] so that it is visible between steps without waiting for the
//! channel to be drained.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::control::ControlState;
use crate::core::change::to_observation;
use crate::core::event::BrowserObservation;
use crate::core::state::TaskState;
use crate::io::config::PilotConfig;
use crate::io::environment::Environment;
use crate::io::prompt::PromptBuilder;
use crate::io::reasoner::Reasoner;
use crate::io::speech::Speech;
use crate::io::trajectory_log::{TrajectoryMeta, goal_id, write_trajectory};
use crate::looping::{GoalStop, run_goal};
use crate::step::Session;

/// Messages processed by the worker, strictly in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartGoal(String),
    AmendGoal(String),
    Stop,
    Shutdown,
}

/// Outcome of one goal, delivered to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalReport {
    pub goal_id: String,
    pub goal: String,
    pub steps_executed: u32,
    pub stop: GoalStop,
}

impl GoalReport {
    pub fn success(&self) -> bool {
        self.stop.is_success()
    }
}

/// Commands received by the worker but not yet acted on.
#[derive(Debug, Default)]
struct Inbox {
    pending_goal: Option<String>,
    notes: Vec<String>,
    shutdown: bool,
}

impl Inbox {
    fn accept(&mut self, command: Command, running: bool) {
        match command {
            Command::StartGoal(goal) => {
                if let Some(previous) = self.pending_goal.replace(goal) {
                    debug!(goal = %previous, "dropped queued goal");
                }
            }
            Command::AmendGoal(note) if running => self.notes.push(note),
            Command::AmendGoal(note) => {
                debug!("no goal running, amendment starts a new goal");
                self.pending_goal = Some(note);
            }
            Command::Stop => {
                self.pending_goal = None;
            }
            Command::Shutdown => self.shutdown = true,
        }
    }
}

/// Thread-safe handle to the worker.
pub struct Orchestrator {
    sender: Sender<Command>,
    control: Arc<ControlState>,
    speech: Option<Arc<dyn Speech>>,
    worker: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Start the worker thread. `on_complete` runs on the worker once per goal.
    pub fn spawn<R, E, F>(
        config: PilotConfig,
        reasoner: R,
        environment: E,
        control: Arc<ControlState>,
        speech: Option<Arc<dyn Speech>>,
        on_complete: F,
    ) -> Result<Self>
    where
        R: Reasoner + Send + 'static,
        E: Environment + Send + 'static,
        F: FnMut(&GoalReport) + Send + 'static,
    {
        config.validate()?;
        let (sender, receiver) = mpsc::channel();
        let worker = Worker {
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            config,
            reasoner,
            environment,
            control: Arc::clone(&control),
            speech: speech.clone(),
            on_complete,
            receiver,
            inbox: Inbox::default(),
            page: None,
            goals_started: 0,
        };
        let handle = thread::Builder::new()
            .name("pilot-worker".to_string())
            .spawn(move || worker.run())
            .context("spawn worker thread")?;
        Ok(Self {
            sender,
            control,
            speech,
            worker: Some(handle),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| anyhow!("orchestrator worker has stopped"))
    }

    /// Queue a goal, replacing any queued goal that has not started yet.
    ///
    /// A running goal keeps running; call [`Orchestrator::stop`] first to supersede it.
    pub fn submit(&self, goal: &str) -> Result<()> {
        self.send(Command::StartGoal(goal.to_string()))
    }

    /// Add information to the running goal, or start `note` as a goal when idle.
    pub fn amend(&self, note: &str) -> Result<()> {
        self.send(Command::AmendGoal(note.to_string()))
    }

    /// Interrupt the running goal before its next step and silence narration.
    pub fn stop(&self) {
        self.control.request_stop();
        if let Some(speech) = &self.speech {
            speech.stop();
        }
        if self.send(Command::Stop).is_err() {
            debug!("stop after worker exit");
        }
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn mute(&self) {
        self.control.set_muted(true);
        if let Some(speech) = &self.speech {
            speech.mute();
        }
    }

    pub fn unmute(&self) {
        self.control.set_muted(false);
        if let Some(speech) = &self.speech {
            speech.unmute();
        }
    }

    /// Stop the running goal, let the worker exit, and wait for it.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.control.request_stop();
        if self.send(Command::Shutdown).is_err() {
            debug!("worker already exited");
        }
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker<R, E, F> {
    config: PilotConfig,
    prompts: PromptBuilder,
    reasoner: R,
    environment: E,
    control: Arc<ControlState>,
    speech: Option<Arc<dyn Speech>>,
    on_complete: F,
    receiver: Receiver<Command>,
    inbox: Inbox,
    /// Last page seen; carried into the next goal so the browser is not reset per goal.
    page: Option<BrowserObservation>,
    goals_started: u64,
}

impl<R, E, F> Worker<R, E, F>
where
    R: Reasoner,
    E: Environment,
    F: FnMut(&GoalReport),
{
    fn run(mut self) {
        info!("worker started");
        loop {
            if self.inbox.shutdown {
                break;
            }
            if let Some(goal) = self.inbox.pending_goal.take() {
                self.run_goal(goal);
                continue;
            }
            match self.receiver.recv_timeout(self.config.queue_poll()) {
                Ok(command) => self.inbox.accept(command, false),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("worker stopped");
    }

    #[instrument(skip_all, fields(goal = %goal))]
    fn run_goal(&mut self, goal: String) {
        self.control.begin_goal();
        self.goals_started += 1;
        let started_at = Utc::now();
        let started = Instant::now();
        let goal_id = goal_id(started_at, self.goals_started);
        info!(goal_id = %goal_id, "goal started");

        let (stop, state) = match self.current_page() {
            Ok(page) => {
                let mut state = TaskState::new(&goal, page);
                let stop = self.drive(&mut state);
                self.page = state.current_page().cloned();
                (stop, Some(state))
            }
            Err(err) => (
                GoalStop::EnvironmentFatal {
                    reason: format!("{err:#}"),
                },
                None,
            ),
        };
        self.control.finish_goal();

        let leftover = std::mem::take(&mut self.inbox.notes);
        if !leftover.is_empty() {
            info!(count = leftover.len(), "dropped amendments received after the goal ended");
        }

        let report = GoalReport {
            goal_id,
            goal,
            steps_executed: state.as_ref().map_or(0, TaskState::steps),
            stop,
        };
        info!(
            stop = report.stop.label(),
            steps = report.steps_executed,
            "goal finished"
        );
        if let (Some(dir), Some(state)) = (&self.config.trajectory_dir, &state) {
            let meta = TrajectoryMeta {
                goal_id: report.goal_id.clone(),
                goal: report.goal.clone(),
                success: report.success(),
                stop: report.stop.clone(),
                steps: state.steps(),
                consecutive_errors: state.consecutive_errors(),
                consecutive_no_change: state.consecutive_no_change(),
                intent: state.intent().cloned(),
                scratchpad: state.scratchpad().to_string(),
                started_at,
                ended_at: Utc::now(),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            if let Err(err) = write_trajectory(dir, &meta, state.history()) {
                warn!(err = %format_args!("{err:#}"), "failed to write trajectory log");
            }
        }
        (self.on_complete)(&report);
    }

    /// The page a new goal starts on; resets the environment only when none is known.
    fn current_page(&mut self) -> Result<BrowserObservation> {
        if let Some(page) = &self.page {
            return Ok(page.clone());
        }
        let raw = self.environment.reset().context("initial environment reset")?;
        Ok(to_observation(&raw))
    }

    fn drive(&mut self, state: &mut TaskState) -> GoalStop {
        let receiver = &self.receiver;
        let inbox = &mut self.inbox;
        let control = self.control.as_ref();
        let mut session = Session {
            reasoner: &mut self.reasoner,
            environment: &mut self.environment,
            prompts: &self.prompts,
            config: &self.config,
            control,
            speech: self.speech.as_deref(),
        };
        run_goal(
            state,
            &mut session,
            || drain_commands(receiver, inbox, control),
            |outcome| {
                debug!(
                    step = outcome.step,
                    code = %outcome.code,
                    result = ?outcome.result,
                    done = outcome.done,
                    "step finished"
                );
            },
        )
    }
}

/// Pull everything queued while a goal runs; returns the amendment notes.
fn drain_commands(receiver: &Receiver<Command>, inbox: &mut Inbox, control: &ControlState) -> Vec<String> {
    while let Ok(command) = receiver.try_recv() {
        inbox.accept(command, true);
    }
    if inbox.shutdown {
        control.request_stop();
    }
    std::mem::take(&mut inbox.notes)
}
