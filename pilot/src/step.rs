//! Orchestration for a single agent step.
//!
//! One step renders the prompt, asks the reasoner for a decision, validates and repairs
//! the action, executes it, and records the classified result on the [`TaskState`].

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::control::ControlState;
use crate::core::action::{Action, Repair, find_hedging_phrase, parse_action, validate_action};
use crate::core::change::Classification;
use crate::core::event::EventSource;
use crate::core::state::TaskState;
use crate::io::config::PilotConfig;
use crate::io::environment::Environment;
use crate::io::prompt::{PromptBuilder, PromptPair, StepPromptInputs};
use crate::io::reasoner::Reasoner;
use crate::io::speech::Speech;

/// Collaborators and settings a goal runs against. Owned by the worker thread.
pub struct Session<'a, R: Reasoner, E: Environment> {
    pub reasoner: &'a mut R,
    pub environment: &'a mut E,
    pub prompts: &'a PromptBuilder,
    pub config: &'a PilotConfig,
    pub control: &'a ControlState,
    pub speech: Option<&'a dyn Speech>,
}

impl<R: Reasoner, E: Environment> Session<'_, R, E> {
    /// Narrate without blocking. A missing speech collaborator is a no-op.
    pub fn narrate(&self, text: &str) {
        if let Some(speech) = self.speech
            && !text.trim().is_empty()
        {
            speech.speak(text, false);
        }
    }
}

/// How a step ended, from the task's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Success,
    NoEffect,
    Error,
    /// A final message was judged incomplete and never reached the environment.
    RejectedCompletion,
}

impl From<Classification> for StepResult {
    fn from(class: Classification) -> Self {
        match class {
            Classification::Success => StepResult::Success,
            Classification::NoEffect => StepResult::NoEffect,
            Classification::Error => StepResult::Error,
        }
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Step number within the goal (1-indexed).
    pub step: u32,
    pub explanation: String,
    /// Action code after repair.
    pub code: String,
    pub repairs: Vec<Repair>,
    pub result: StepResult,
    /// The goal is finished: an accepted final message, or the environment ended the episode.
    pub done: bool,
    /// Final message text, when the step sent one that was accepted.
    pub answer: Option<String>,
}

/// The environment failed while executing an action.
///
/// The failure is already recorded on the task state when this is returned; the caller
/// owns recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionExecutionError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for ActionExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executing `{}` failed: {}", self.code, self.message)
    }
}

impl std::error::Error for ActionExecutionError {}

/// Execute one step against the active task.
///
/// Errors other than [`ActionExecutionError`] come from prompt rendering or the reasoner
/// and leave the history without a new action.
#[instrument(skip_all, fields(step = state.steps() + 1))]
pub fn run_step<R: Reasoner, E: Environment>(
    state: &mut TaskState,
    session: &mut Session<'_, R, E>,
) -> Result<StepOutcome> {
    let prompt = step_prompt(state, session)?;
    let decision = session
        .reasoner
        .decide(&prompt)
        .context("request decision")?;

    let checked = validate_action(&decision.code);
    for repair in &checked.repairs {
        info!(
            original = %decision.code,
            repaired = %checked.code,
            repair = repair.describe(),
            "repaired action"
        );
    }

    state.record_action(&decision.explanation, &checked.code);
    state.append_scratchpad(&decision.scratchpad_note);
    let mut outcome = StepOutcome {
        step: state.steps(),
        explanation: decision.explanation.clone(),
        code: checked.code.clone(),
        repairs: checked.repairs,
        result: StepResult::Success,
        done: false,
        answer: None,
    };

    let final_message = match parse_action(&checked.code) {
        Action::SendMsgToUser { text } => Some(text),
        _ => None,
    };
    if let Some(text) = &final_message
        && let Some(phrase) = find_hedging_phrase(text)
    {
        warn!(phrase, "rejected premature completion");
        state.record_failure(&format!(
            "Final message rejected: it contains \"{phrase}\". Only call send_msg_to_user once \
             the goal is fully achieved, with the answer itself and no follow-up questions."
        ));
        outcome.result = StepResult::RejectedCompletion;
        return Ok(outcome);
    }

    let env_step = match session.environment.step(&checked.code) {
        Ok(env_step) => env_step,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(code = %checked.code, err = %message, "action execution failed");
            state.record_failure(&format!("Action execution failed: {message}"));
            return Err(ActionExecutionError {
                code: checked.code,
                message,
            }
            .into());
        }
    };

    let classified = state.record_observation(&env_step.observation, final_message.is_none());
    outcome.result = classified.class.into();
    if outcome.result == StepResult::NoEffect {
        warn!(code = %checked.code, "action had no visible effect");
    }

    if let Some(text) = final_message {
        state.record_message(EventSource::Agent, &decision.explanation, &text);
        outcome.answer = Some(text);
        outcome.done = true;
    }
    outcome.done |= env_step.done;
    Ok(outcome)
}

fn step_prompt<R: Reasoner, E: Environment>(
    state: &TaskState,
    session: &Session<'_, R, E>,
) -> Result<PromptPair> {
    let (page, history) = {
        let view = state.view();
        (
            view.render_page(),
            view.render_history(session.config.context_max_events),
        )
    };
    let recovery = state.is_stuck();
    if recovery {
        info!(
            consecutive_errors = state.consecutive_errors(),
            consecutive_no_change = state.consecutive_no_change(),
            "task is stuck, adding recovery directive"
        );
    }
    session.prompts.step(&StepPromptInputs {
        goal: state.goal(),
        intent: state.intent(),
        scratchpad: state.scratchpad(),
        page: &page,
        history: &history,
        recovery,
        consecutive_errors: state.consecutive_errors(),
        consecutive_no_change: state.consecutive_no_change(),
    })
}
