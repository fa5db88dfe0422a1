//! Mutable record of one goal's execution.
//!
//! Only the worker thread touches a [`TaskState`]; it is replaced, never reused, when a
//! new goal starts. The history is append-only.

use std::cell::{Ref, RefCell};

use crate::core::change::{Classified, Progress};
use crate::core::event::{BrowserObservation, Event, EventKind, EventSource};
use crate::core::types::{Intent, RawObservation};
use crate::core::view::View;

#[derive(Debug)]
pub struct TaskState {
    goal: String,
    history: Vec<Event>,
    intent: Option<Intent>,
    scratchpad: String,
    progress: Progress,
    steps: u32,
    view: RefCell<View>,
}

impl TaskState {
    /// Start a goal on the page the browser currently shows.
    pub fn new(goal: &str, page: BrowserObservation) -> Self {
        let mut state = Self {
            goal: goal.to_string(),
            history: Vec::new(),
            intent: None,
            scratchpad: String::new(),
            progress: Progress::default(),
            steps: 0,
            view: RefCell::new(View::new()),
        };
        state.record_page(page);
        state
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn history(&self) -> &[Event] {
        &self.history
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.intent.as_ref()
    }

    pub fn set_intent(&mut self, intent: Intent) {
        self.intent = Some(intent);
    }

    pub fn scratchpad(&self) -> &str {
        &self.scratchpad
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.progress.consecutive_errors
    }

    pub fn consecutive_no_change(&self) -> u32 {
        self.progress.consecutive_no_change
    }

    pub fn is_stuck(&self) -> bool {
        self.progress.is_stuck()
    }

    /// Number of actions taken so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Derived view, recomputed only if the history grew since the last read.
    pub fn view(&self) -> Ref<'_, View> {
        {
            let mut view = self.view.borrow_mut();
            if view.generation() != self.history.len() {
                view.sync(&self.history);
            }
        }
        self.view.borrow()
    }

    /// Most recent browser observation.
    pub fn current_page(&self) -> Option<&BrowserObservation> {
        self.history.iter().rev().find_map(|event| match &event.kind {
            EventKind::Observation(observation) => Some(observation),
            _ => None,
        })
    }

    /// Append a page that is not the result of an action (initial page, reset).
    pub fn record_page(&mut self, page: BrowserObservation) {
        self.progress.seed(&page.url, &page.axtree_txt);
        self.history.push(Event::observation(page));
    }

    pub fn record_action(&mut self, thought: &str, code: &str) {
        self.steps += 1;
        self.history.push(Event::action(thought, code));
    }

    /// Run the change detector on `raw` and append the classified observation.
    pub fn record_observation(&mut self, raw: &RawObservation, expect_change: bool) -> Classified {
        let classified = self.progress.classify(raw, expect_change);
        self.history
            .push(Event::observation(classified.observation.clone()));
        classified
    }

    /// Append an environment-sourced error that counts as a failed step.
    pub fn record_failure(&mut self, message: &str) {
        self.progress.record_failure();
        self.history.push(Event::error(message));
    }

    pub fn record_message(&mut self, source: EventSource, thought: &str, content: &str) {
        self.history.push(Event::message(source, thought, content));
    }

    /// Append a note to the scratchpad. Existing notes are never rewritten.
    pub fn append_scratchpad(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        if !self.scratchpad.is_empty() {
            self.scratchpad.push('\n');
        }
        self.scratchpad.push_str("- ");
        self.scratchpad.push_str(note);
    }
}
