//! Prompt builder for reasoning-service requests.
//!
//! User prompts are rendered from templates whose sections carry
//! `<!-- section:KEY required|droppable -->` markers. When a prompt exceeds the byte
//! budget, droppable sections go first, then the current page is shortened. The last
//! remaining section is truncated only if that is still not enough.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::Intent;

const STEP_SYSTEM_TEMPLATE: &str = include_str!("prompts/step_system.md");
const STEP_TEMPLATE: &str = include_str!("prompts/step.md");
const INTENT_SYSTEM_TEMPLATE: &str = include_str!("prompts/intent_system.md");
const INTENT_TEMPLATE: &str = include_str!("prompts/intent.md");

/// Drop order when over budget, first entry dropped first.
const DROP_ORDER: [&str; 3] = ["scratchpad", "previous", "intent"];

/// Section shortened before falling back to truncating the last section.
const SHRINK_FIRST: &str = "page";

/// Joins rendered sections.
const SECTION_SEPARATOR: &str = "\n\n";

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// System and user prompt for one reasoning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Inputs for a "next action" prompt.
#[derive(Debug, Clone)]
pub struct StepPromptInputs<'a> {
    pub goal: &'a str,
    pub intent: Option<&'a Intent>,
    pub scratchpad: &'a str,
    /// Current page block of the view.
    pub page: &'a str,
    /// Loop warning and recent trajectory; may be empty.
    pub history: &'a str,
    /// Set when the task is stuck; adds the recovery directive.
    pub recovery: bool,
    pub consecutive_errors: u32,
    pub consecutive_no_change: u32,
}

/// Inputs for an intent (re)generation prompt.
#[derive(Debug, Clone)]
pub struct IntentPromptInputs<'a> {
    pub goal: &'a str,
    /// Amendment from the user; absent for the initial plan.
    pub note: Option<&'a str>,
    pub previous: Option<&'a Intent>,
    pub scratchpad: &'a str,
    pub page: &'a str,
    pub history: &'a str,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("step_system", STEP_SYSTEM_TEMPLATE)
            .expect("step_system template should be valid");
        env.add_template("step", STEP_TEMPLATE)
            .expect("step template should be valid");
        env.add_template("intent_system", INTENT_SYSTEM_TEMPLATE)
            .expect("intent_system template should be valid");
        env.add_template("intent", INTENT_TEMPLATE)
            .expect("intent template should be valid");
        Self { env }
    }

    fn render_step(&self, input: &StepPromptInputs<'_>) -> Result<(String, String)> {
        let system = self.env.get_template("step_system")?.render(context! {
            goal => input.goal.trim(),
        })?;
        let user = self.env.get_template("step")?.render(context! {
            goal => input.goal.trim(),
            intent => input.intent,
            scratchpad => non_empty(input.scratchpad),
            recovery => input.recovery,
            consecutive_errors => input.consecutive_errors,
            consecutive_no_change => input.consecutive_no_change,
            page => input.page.trim(),
            history => non_empty(input.history),
        })?;
        Ok((system, user))
    }

    fn render_intent(&self, input: &IntentPromptInputs<'_>) -> Result<(String, String)> {
        let system = self.env.get_template("intent_system")?.render(context! {})?;
        let user = self.env.get_template("intent")?.render(context! {
            goal => input.goal.trim(),
            note => input.note.and_then(non_empty),
            previous => input.previous,
            scratchpad => non_empty(input.scratchpad),
            page => input.page.trim(),
            history => non_empty(input.history),
        })?;
        Ok((system, user))
    }
}

fn non_empty(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|s| !s.is_empty())
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content without its marker.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (key, required, _, content_start)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(_, _, next_start, _)| *next_start);
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * SECTION_SEPARATOR.len();
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    if let Some(page) = sections.iter_mut().find(|s| s.key == SHRINK_FIRST) {
        let allowed = page.content.len().saturating_sub(total - budget);
        shrink_section(page, allowed);
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    if let Some(last) = sections.last_mut() {
        let allowed = last.content.len().saturating_sub(total - budget);
        shrink_section(last, allowed);
    }
}

/// Cut `section` to at most `allowed` bytes, marking the cut when there is room.
fn shrink_section(section: &mut ParsedSection, allowed: usize) {
    let before_len = section.content.len();
    if before_len <= allowed {
        return;
    }
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut section.content, allowed - TRUNCATION_MARKER.len());
        section.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut section.content, allowed);
    }
    debug!(
        section = %section.key,
        before_len,
        after_len = section.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    let mut cut = max_bytes.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

/// Builds prompts within a byte budget on the user prompt.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Prompt for the next action.
    pub fn step(&self, input: &StepPromptInputs<'_>) -> Result<PromptPair> {
        let (system, user) = ENGINE.render_step(input)?;
        Ok(PromptPair {
            system,
            user: self.fit(&user),
        })
    }

    /// Prompt for the initial intent, or a revision when `input.note` is set.
    pub fn intent(&self, input: &IntentPromptInputs<'_>) -> Result<PromptPair> {
        let (system, user) = ENGINE.render_intent(input)?;
        Ok(PromptPair {
            system,
            user: self.fit(&user),
        })
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}
