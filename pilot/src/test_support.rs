//! Test-only collaborators and builders for pages, decisions, and scripted runs.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::core::change::to_observation;
use crate::core::event::BrowserObservation;
use crate::core::types::{Decision, EnvStep, Intent, RawObservation};
use crate::io::environment::Environment;
use crate::io::prompt::PromptPair;
use crate::io::reasoner::Reasoner;

/// Raw observation of a page with pre-flattened tree text and no error.
pub fn raw_page(url: &str, tree: &str) -> RawObservation {
    RawObservation {
        url: url.to_string(),
        axtree_txt: Some(tree.to_string()),
        ..RawObservation::default()
    }
}

/// Raw observation carrying a backend error for the last action.
pub fn raw_error(url: &str, tree: &str, error: &str) -> RawObservation {
    RawObservation {
        last_action_error: error.to_string(),
        ..raw_page(url, tree)
    }
}

/// Typed observation of a page, as recorded for an initial page or a reset.
pub fn page(url: &str, tree: &str) -> BrowserObservation {
    to_observation(&raw_page(url, tree))
}

/// Environment step landing on `url` with `tree`.
pub fn env_page(url: &str, tree: &str) -> EnvStep {
    EnvStep {
        observation: raw_page(url, tree),
        done: false,
    }
}

pub fn decision(code: &str) -> Decision {
    decision_with(&format!("run {code}"), code, "")
}

pub fn decision_with(explanation: &str, code: &str, scratchpad_note: &str) -> Decision {
    Decision {
        explanation: explanation.to_string(),
        code: code.to_string(),
        scratchpad_note: scratchpad_note.to_string(),
    }
}

pub fn intent(understanding: &str) -> Intent {
    Intent {
        understanding: understanding.to_string(),
        approach: "scripted approach".to_string(),
    }
}

/// Reasoner returning predetermined answers and recording every prompt it receives.
pub struct ScriptedReasoner {
    decisions: VecDeque<Result<Decision, String>>,
    intents: VecDeque<Result<Intent, String>>,
    prompts: Arc<Mutex<Vec<PromptPair>>>,
    gate: Option<Receiver<()>>,
}

impl ScriptedReasoner {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: decisions.into_iter().map(Ok).collect(),
            intents: VecDeque::new(),
            prompts: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Queue a decision failure after the decisions queued so far.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.decisions.push_back(Err(message.to_string()));
        self
    }

    /// Answers for intent requests, in order. Once exhausted, intents succeed.
    pub fn with_intents(mut self, intents: Vec<Result<Intent, String>>) -> Self {
        self.intents = intents.into();
        self
    }

    /// Block every decision until a token arrives on `gate`.
    pub fn with_gate(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Shared handle to the prompts seen so far.
    pub fn prompts(&self) -> Arc<Mutex<Vec<PromptPair>>> {
        Arc::clone(&self.prompts)
    }

    fn record(&self, prompt: &PromptPair) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
    }
}

impl Reasoner for ScriptedReasoner {
    fn decide(&mut self, prompt: &PromptPair) -> Result<Decision> {
        if let Some(gate) = &self.gate {
            gate.recv().map_err(|_| anyhow!("scripted gate closed"))?;
        }
        self.record(prompt);
        match self.decisions.pop_front() {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted reasoner exhausted")),
        }
    }

    fn intent(&mut self, prompt: &PromptPair) -> Result<Intent> {
        self.record(prompt);
        match self.intents.pop_front() {
            Some(Ok(intent)) => Ok(intent),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(intent("scripted understanding")),
        }
    }
}

/// Environment replaying scripted steps and recording executed action code.
pub struct ScriptedEnvironment {
    resets: VecDeque<Result<RawObservation, String>>,
    steps: VecDeque<Result<EnvStep, String>>,
    executed: Arc<Mutex<Vec<String>>>,
    reset_count: Arc<Mutex<u32>>,
}

impl ScriptedEnvironment {
    pub fn new(steps: Vec<EnvStep>) -> Self {
        Self {
            resets: VecDeque::new(),
            steps: steps.into_iter().map(Ok).collect(),
            executed: Arc::new(Mutex::new(Vec::new())),
            reset_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Queue a backend fault after the steps queued so far.
    pub fn then_fault(mut self, message: &str) -> Self {
        self.steps.push_back(Err(message.to_string()));
        self
    }

    pub fn then_step(mut self, step: EnvStep) -> Self {
        self.steps.push_back(Ok(step));
        self
    }

    /// Results for `reset()`, in order. Once exhausted, resets land on `about:blank`.
    pub fn with_resets(mut self, resets: Vec<Result<RawObservation, String>>) -> Self {
        self.resets = resets.into();
        self
    }

    pub fn executed(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.executed)
    }

    pub fn reset_count(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.reset_count)
    }
}

impl Environment for ScriptedEnvironment {
    fn reset(&mut self) -> Result<RawObservation> {
        if let Ok(mut count) = self.reset_count.lock() {
            *count += 1;
        }
        match self.resets.pop_front() {
            Some(Ok(observation)) => Ok(observation),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(raw_page("about:blank", "")),
        }
    }

    fn step(&mut self, code: &str) -> Result<EnvStep> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(code.to_string());
        }
        match self.steps.pop_front() {
            Some(Ok(step)) => Ok(step),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted environment exhausted")),
        }
    }
}
