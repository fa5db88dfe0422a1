//! Read-through projection of the event log: prompt context and loop diagnostics.
//!
//! A [`View`] is synced against the history by generation (the history length it last
//! saw). Syncing only formats the events appended since then and re-runs loop detection.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::event::{BrowserObservation, Event, EventKind, EventSource};

/// Candidate loop periods, checked shortest first.
pub const LOOP_PATTERN_LENGTHS: [usize; 3] = [2, 3, 4];

/// Minimum number of actions before the single-action check runs.
const REPEAT_MIN_ACTIONS: usize = 5;
/// Trailing actions inspected by the single-action check.
const REPEAT_WINDOW: usize = 5;
/// Occurrences of one action inside the window that count as stuck.
const REPEAT_THRESHOLD: usize = 3;

/// Tree characters shown per observation inside the trajectory.
const TRAJECTORY_TREE_CHARS: usize = 1000;

/// A repeating suffix of the action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopInfo {
    pub pattern: Vec<String>,
    pub repetitions: usize,
}

/// One action dominating the most recent window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepeatedAction {
    pub code: String,
    pub occurrences: usize,
    pub window: usize,
}

#[derive(Debug, Clone, Default)]
pub struct View {
    generation: usize,
    actions: Vec<String>,
    blocks: Vec<String>,
    current: Option<BrowserObservation>,
    loop_info: Option<LoopInfo>,
    repeated: Option<RepeatedAction>,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of history events this view reflects.
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Bring the view up to date with `history`. No-op when nothing was appended.
    pub fn sync(&mut self, history: &[Event]) {
        if history.len() == self.generation {
            return;
        }
        for event in &history[self.generation..] {
            match &event.kind {
                EventKind::Action(action) => {
                    self.actions.push(action.code.clone());
                    let mut block = format!("[Step {}]\n", self.actions.len());
                    if !action.thought.is_empty() {
                        block.push_str(&format!("THOUGHT: {}\n", action.thought));
                    }
                    block.push_str(&format!("ACTION: {}", action.code));
                    self.blocks.push(block);
                }
                EventKind::Message(message) => {
                    let speaker = match event.source {
                        EventSource::User => "USER NOTE",
                        EventSource::Agent | EventSource::Environment => "AGENT MESSAGE",
                    };
                    self.blocks
                        .push(format!("[{speaker}]: {}\n---", message.content));
                }
                EventKind::Observation(observation) => {
                    self.blocks.push(render_observation(observation));
                    self.current = Some(observation.clone());
                }
                EventKind::Error(error) => {
                    self.blocks
                        .push(format!("OBSERVATION [FAIL]:\nERROR: {}\n---", error.content));
                }
            }
        }
        self.generation = history.len();
        self.loop_info = detect_loop(&self.actions);
        self.repeated = detect_repeated_action(&self.actions);
    }

    /// Every browser action code, in order.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Most recent browser observation.
    pub fn current(&self) -> Option<&BrowserObservation> {
        self.current.as_ref()
    }

    pub fn loop_info(&self) -> Option<&LoopInfo> {
        self.loop_info.as_ref()
    }

    pub fn repeated_action(&self) -> Option<&RepeatedAction> {
        self.repeated.as_ref()
    }

    /// Human-readable warning for the reasoning service, one line per detector that fired.
    pub fn loop_warning(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(info) = &self.loop_info {
            lines.push(format!(
                "SYSTEM ALERT: Loop detected. You performed {} {} times in a row. STOP and try a different strategy.",
                info.pattern.join(" -> "),
                info.repetitions
            ));
        }
        if let Some(repeated) = &self.repeated {
            lines.push(format!(
                "SYSTEM ALERT: You are repeating `{}` ({} of the last {} actions). It is not working. Do not do this again.",
                repeated.code, repeated.occurrences, repeated.window
            ));
        }
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    /// Prompt-ready context: current page, optional warning, and the recent trajectory.
    pub fn render_context(&self, max_events: usize) -> String {
        let page = self.render_page();
        let history = self.render_history(max_events);
        if history.is_empty() {
            page
        } else {
            format!("{page}\n\n{history}")
        }
    }

    /// The current page block of [`View::render_context`].
    pub fn render_page(&self) -> String {
        if self.generation == 0 {
            return "No previous actions. Initial state: unknown.".to_string();
        }
        let mut lines = vec!["## CURRENT BROWSER STATE".to_string()];
        match &self.current {
            Some(current) => {
                lines.push(format!("URL: {}", current.url));
                if !current.focused_element_bid.is_empty() {
                    lines.push(format!("Focused element bid: {}", current.focused_element_bid));
                }
                lines.push("Active accessibility tree:".to_string());
                lines.push(current.axtree_txt.clone());
            }
            None => lines.push("Browser not yet initialized.".to_string()),
        }
        lines.join("\n")
    }

    /// Loop warning and the last `max_events` trajectory blocks; empty before any event.
    pub fn render_history(&self, max_events: usize) -> String {
        if self.generation == 0 {
            return String::new();
        }
        let mut lines = Vec::new();
        if let Some(warning) = self.loop_warning() {
            lines.push(warning);
            lines.push(String::new());
        }
        lines.push("## EXECUTION HISTORY".to_string());
        let start = self.blocks.len().saturating_sub(max_events);
        lines.extend(self.blocks[start..].iter().cloned());
        lines.join("\n")
    }
}

fn render_observation(observation: &BrowserObservation) -> String {
    let status = if observation.last_action_success {
        "SUCCESS"
    } else {
        "FAIL"
    };
    let body = if observation.error.is_empty() {
        let tree: String = observation
            .axtree_txt
            .chars()
            .take(TRAJECTORY_TREE_CHARS)
            .collect();
        let ellipsis = if tree.len() < observation.axtree_txt.len() {
            "..."
        } else {
            ""
        };
        format!(
            "URL: {}\nFocused element bid: {}\nTree: {tree}{ellipsis}",
            observation.url, observation.focused_element_bid
        )
    } else {
        format!("ERROR: {}", observation.error)
    };
    format!("OBSERVATION [{status}]:\n{body}\n---")
}

/// Find the shortest period `k` whose last two windows of actions are identical.
///
/// The repetition count includes the final window and every contiguous equal window
/// before it.
pub fn detect_loop(actions: &[String]) -> Option<LoopInfo> {
    let n = actions.len();
    for k in LOOP_PATTERN_LENGTHS {
        if n < 2 * k {
            continue;
        }
        let pattern = &actions[n - k..];
        if &actions[n - 2 * k..n - k] != pattern {
            continue;
        }
        let mut repetitions = 1;
        let mut end = n - k;
        while end >= k && &actions[end - k..end] == pattern {
            repetitions += 1;
            end -= k;
        }
        return Some(LoopInfo {
            pattern: pattern.to_vec(),
            repetitions,
        });
    }
    None
}

/// Report the most frequent action in the trailing window when it dominates.
pub fn detect_repeated_action(actions: &[String]) -> Option<RepeatedAction> {
    if actions.len() < REPEAT_MIN_ACTIONS {
        return None;
    }
    let window = &actions[actions.len() - REPEAT_WINDOW..];
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for code in window {
        *counts.entry(code.as_str()).or_default() += 1;
    }
    // Ties go to the most recent action.
    let (code, occurrences) = window
        .iter()
        .rev()
        .map(|code| (code.as_str(), counts[code.as_str()]))
        .fold(None::<(&str, usize)>, |best, candidate| match best {
            Some(best) if best.1 >= candidate.1 => Some(best),
            _ => Some(candidate),
        })?;
    (occurrences >= REPEAT_THRESHOLD).then(|| RepeatedAction {
        code: code.to_string(),
        occurrences,
        window: REPEAT_WINDOW,
    })
}
