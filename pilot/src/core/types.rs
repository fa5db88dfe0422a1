//! Shared deterministic types for the pilot core.
//!
//! These types define stable contracts between the core and its collaborators. They
//! must not depend on external state or I/O.

use serde::{Deserialize, Serialize};

use crate::core::axtree::AxNode;

/// `is_stuck()` fires once either counter reaches this many consecutive steps.
pub const STUCK_THRESHOLD: u32 = 3;

/// A goal is aborted once `consecutive_errors` exceeds this ceiling.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Number of tree-text characters that participate in the page fingerprint.
pub const FINGERPRINT_TREE_CHARS: usize = 5000;

/// Synthesized error for an action the environment accepted but that changed nothing.
pub const NO_EFFECT_ERROR: &str = "Action had no visible effect on the page";

/// Structured answer to a "next action" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub explanation: String,
    pub code: String,
    #[serde(default)]
    pub scratchpad_note: String,
}

/// The agent's restated goal and plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// What the user actually wants.
    pub understanding: String,
    /// High-level strategy, one or two sentences.
    pub approach: String,
}

/// Untyped observation as produced by the environment backend.
///
/// Only the fields the core reads are typed; anything else the backend sends is kept in
/// `extra` so that it survives into the trajectory log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    #[serde(default)]
    pub url: String,
    /// Accessibility tree object, flattened by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axtree_object: Option<AxNode>,
    /// Pre-flattened tree text, used only when `axtree_object` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axtree_txt: Option<String>,
    #[serde(default)]
    pub last_action_error: String,
    #[serde(default)]
    pub focused_element_bid: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawObservation {
    /// Flattened accessibility tree text for this observation.
    pub fn tree_text(&self) -> String {
        match (&self.axtree_object, &self.axtree_txt) {
            (Some(tree), _) => tree.flatten(),
            (None, Some(text)) => text.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStep {
    pub observation: RawObservation,
    /// The backend ended the episode on its own.
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_defaults_missing_scratchpad_note() {
        let decision: Decision =
            serde_json::from_str(r#"{"explanation":"why","code":"click('3')"}"#).expect("parse");
        assert_eq!(decision.scratchpad_note, "");
    }

    #[test]
    fn raw_observation_keeps_unknown_fields() {
        let raw: RawObservation = serde_json::from_str(
            r#"{"url":"https://a.test","last_action_error":"","focused_element_bid":"4","open_pages_urls":["https://a.test"]}"#,
        )
        .expect("parse");
        assert_eq!(raw.url, "https://a.test");
        assert!(raw.extra.contains_key("open_pages_urls"));
    }

    #[test]
    fn raw_observation_prefers_tree_object_over_text() {
        let raw = RawObservation {
            axtree_object: Some(AxNode::new("button", "Search").with_bid("12")),
            axtree_txt: Some("ignored".to_string()),
            ..RawObservation::default()
        };
        assert_eq!(raw.tree_text(), "[12] button 'Search'");
    }
}
