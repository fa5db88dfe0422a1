//! Goal execution: planning, then stepping until a terminal state.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::change::to_observation;
use crate::core::event::EventSource;
use crate::core::state::TaskState;
use crate::core::types::MAX_CONSECUTIVE_ERRORS;
use crate::io::config::IntentFailurePolicy;
use crate::io::environment::Environment;
use crate::io::prompt::IntentPromptInputs;
use crate::io::reasoner::Reasoner;
use crate::step::{ActionExecutionError, Session, StepOutcome, run_step};

/// Reason why a goal stopped. Exactly one per goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GoalStop {
    /// A final message was accepted or the environment ended the episode.
    Completed { answer: Option<String> },
    /// `stop()` was observed between steps.
    Interrupted,
    /// The step budget ran out without a terminal action.
    MaxStepsReached { max_steps: u32 },
    /// `consecutive_errors` went over the hard ceiling.
    ErrorBudgetExceeded { consecutive_errors: u32 },
    /// The environment failed and the recovery reset failed too.
    EnvironmentFatal { reason: String },
    /// Reasoner or prompt failure, or an intent failure under the `fail` policy.
    Fatal { reason: String },
}

impl GoalStop {
    pub fn is_success(&self) -> bool {
        matches!(self, GoalStop::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GoalStop::Completed { .. } => "completed",
            GoalStop::Interrupted => "interrupted",
            GoalStop::MaxStepsReached { .. } => "max_steps_reached",
            GoalStop::ErrorBudgetExceeded { .. } => "error_budget_exceeded",
            GoalStop::EnvironmentFatal { .. } => "environment_fatal",
            GoalStop::Fatal { .. } => "fatal",
        }
    }
}

/// Run a goal to completion on `state`.
///
/// `next_notes` is polled once per iteration for amendment notes; `on_step` sees every
/// step that produced an outcome. Never returns an error: every failure maps to a
/// [`GoalStop`].
#[instrument(skip_all, fields(goal = state.goal()))]
pub fn run_goal<R, E, N, S>(
    state: &mut TaskState,
    session: &mut Session<'_, R, E>,
    mut next_notes: N,
    mut on_step: S,
) -> GoalStop
where
    R: Reasoner,
    E: Environment,
    N: FnMut() -> Vec<String>,
    S: FnMut(&StepOutcome),
{
    if let Some(stop) = request_intent(state, session, None) {
        return stop;
    }

    loop {
        if session.control.stop_requested() {
            info!("goal interrupted before step");
            return GoalStop::Interrupted;
        }
        for note in next_notes() {
            if let Some(stop) = amend(state, session, &note) {
                return stop;
            }
        }

        let mut done = false;
        let mut answer = None;
        match run_step(state, session) {
            Ok(outcome) => {
                session.narrate(&outcome.explanation);
                on_step(&outcome);
                done = outcome.done;
                answer = outcome.answer;
            }
            Err(err) => {
                let Some(fault) = err.downcast_ref::<ActionExecutionError>() else {
                    let reason = format!("{err:#}");
                    warn!(err = %reason, "step failed");
                    return GoalStop::Fatal { reason };
                };
                if let Some(stop) = recover(state, session, fault) {
                    return stop;
                }
            }
        }

        if session.control.stop_requested() {
            info!(steps = state.steps(), "goal interrupted");
            return GoalStop::Interrupted;
        }
        if !done && state.steps() >= session.config.max_steps {
            warn!(max_steps = session.config.max_steps, "step budget exhausted");
            return GoalStop::MaxStepsReached {
                max_steps: session.config.max_steps,
            };
        }
        if state.consecutive_errors() > MAX_CONSECUTIVE_ERRORS {
            warn!(
                consecutive_errors = state.consecutive_errors(),
                "consecutive error ceiling exceeded"
            );
            return GoalStop::ErrorBudgetExceeded {
                consecutive_errors: state.consecutive_errors(),
            };
        }
        if done {
            if let Some(answer) = &answer {
                session.narrate(answer);
            }
            info!(steps = state.steps(), "goal completed");
            return GoalStop::Completed { answer };
        }
    }
}

/// One reset attempt after an environment fault.
fn recover<R: Reasoner, E: Environment>(
    state: &mut TaskState,
    session: &mut Session<'_, R, E>,
    fault: &ActionExecutionError,
) -> Option<GoalStop> {
    warn!(code = %fault.code, err = %fault.message, "recovering from action fault via reset");
    match session.environment.reset() {
        Ok(raw) => {
            state.record_page(to_observation(&raw));
            info!(url = %raw.url, "environment reset after fault");
            None
        }
        Err(err) => {
            let reason = format!("{fault}; reset failed: {err:#}");
            warn!(err = %reason, "recovery reset failed");
            Some(GoalStop::EnvironmentFatal { reason })
        }
    }
}

/// Fold a user amendment into the running goal and revise the intent.
fn amend<R: Reasoner, E: Environment>(
    state: &mut TaskState,
    session: &mut Session<'_, R, E>,
    note: &str,
) -> Option<GoalStop> {
    info!(note, "amending goal");
    state.append_scratchpad(&format!("User update: {note}"));
    state.record_message(EventSource::User, "", note);
    request_intent(state, session, Some(note))
}

/// Request (or revise) the intent, applying the configured failure policy.
///
/// Returns a stop only when the policy is `fail` and every attempt failed.
fn request_intent<R: Reasoner, E: Environment>(
    state: &mut TaskState,
    session: &mut Session<'_, R, E>,
    note: Option<&str>,
) -> Option<GoalStop> {
    let (page, history) = {
        let view = state.view();
        (
            view.render_page(),
            view.render_history(session.config.context_max_events),
        )
    };
    let prompt = session.prompts.intent(&IntentPromptInputs {
        goal: state.goal(),
        note,
        previous: state.intent(),
        scratchpad: state.scratchpad(),
        page: &page,
        history: &history,
    });

    let last_error = match prompt {
        Ok(prompt) => {
            let mut last_error = None;
            for attempt in 1..=session.config.intent.attempts {
                match session.reasoner.intent(&prompt) {
                    Ok(intent) => {
                        info!(
                            understanding = %intent.understanding,
                            revised = note.is_some(),
                            "intent ready"
                        );
                        state.set_intent(intent);
                        return None;
                    }
                    Err(err) => {
                        warn!(attempt, err = %format_args!("{err:#}"), "intent request failed");
                        last_error = Some(err);
                    }
                }
            }
            last_error
        }
        Err(err) => Some(err),
    };

    let reason = last_error.map_or_else(
        || "no intent attempts made".to_string(),
        |err| format!("{err:#}"),
    );
    match session.config.intent.on_failure {
        IntentFailurePolicy::Continue => {
            info!(reason = %reason, "continuing without a new intent");
            None
        }
        IntentFailurePolicy::Fail => Some(GoalStop::Fatal {
            reason: format!("intent request failed: {reason}"),
        }),
    }
}
