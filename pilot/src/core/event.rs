//! Append-only event records: what the agent did and what the environment showed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Agent,
    User,
    Environment,
}

/// A single action-language statement sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserAction {
    pub thought: String,
    pub code: String,
}

/// A message addressed to the user (or, when user-sourced, a note from the user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAction {
    pub thought: String,
    pub content: String,
}

/// Typed, classified browser observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserObservation {
    /// Short summary used when the full tree is too large to show.
    pub content: String,
    pub url: String,
    pub axtree_txt: String,
    /// Empty when the action succeeded.
    pub error: String,
    pub focused_element_bid: String,
    pub last_action_success: bool,
}

impl BrowserObservation {
    pub fn new(url: &str, axtree_txt: &str, error: &str, focused_element_bid: &str) -> Self {
        Self {
            content: summarize(url, error, axtree_txt),
            url: url.to_string(),
            axtree_txt: axtree_txt.to_string(),
            error: error.to_string(),
            focused_element_bid: focused_element_bid.to_string(),
            last_action_success: error.is_empty(),
        }
    }
}

/// Observation carrying only an error message (rejections, backend faults).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObservation {
    pub content: String,
}

/// Closed set of things that can happen during a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Action(BrowserAction),
    Message(MessageAction),
    Observation(BrowserObservation),
    Error(ErrorObservation),
}

/// Immutable, timestamped entry of the task history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(source: EventSource, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            kind,
        }
    }

    pub fn action(thought: &str, code: &str) -> Self {
        Self::new(
            EventSource::Agent,
            EventKind::Action(BrowserAction {
                thought: thought.to_string(),
                code: code.to_string(),
            }),
        )
    }

    pub fn message(source: EventSource, thought: &str, content: &str) -> Self {
        Self::new(
            source,
            EventKind::Message(MessageAction {
                thought: thought.to_string(),
                content: content.to_string(),
            }),
        )
    }

    pub fn observation(observation: BrowserObservation) -> Self {
        Self::new(EventSource::Environment, EventKind::Observation(observation))
    }

    pub fn error(content: &str) -> Self {
        Self::new(
            EventSource::Environment,
            EventKind::Error(ErrorObservation {
                content: content.to_string(),
            }),
        )
    }

    /// Action code, when this event is a browser action.
    pub fn action_code(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Action(action) => Some(&action.code),
            _ => None,
        }
    }
}

fn summarize(url: &str, error: &str, axtree_txt: &str) -> String {
    let tree: String = axtree_txt.chars().take(1000).collect();
    let ellipsis = if tree.len() < axtree_txt.len() { "..." } else { "" };
    format!("URL: {url}\nError: {error}\nTree: {tree}{ellipsis}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_success_follows_error() {
        assert!(BrowserObservation::new("u", "t", "", "").last_action_success);
        assert!(!BrowserObservation::new("u", "t", "boom", "").last_action_success);
    }

    #[test]
    fn events_serialize_with_type_tag_and_source() {
        let event = Event::action("search first", "click('12')");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "action");
        assert_eq!(json["source"], "agent");
        assert_eq!(json["code"], "click('12')");

        let parsed: Event = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed.action_code(), Some("click('12')"));
    }

    #[test]
    fn summary_truncates_long_trees() {
        let tree = "x".repeat(1500);
        let obs = BrowserObservation::new("https://a.test", &tree, "", "");
        assert!(obs.content.ends_with("..."));
        assert!(obs.content.len() < 1100);
    }
}
