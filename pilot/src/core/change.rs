//! Change detection: classify a raw observation against the previous page.
//!
//! The fingerprint is recomputed on every step, so a no-change verdict always compares
//! against the immediately preceding frame rather than the last successful one.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::event::BrowserObservation;
use crate::core::types::{FINGERPRINT_TREE_CHARS, NO_EFFECT_ERROR, RawObservation, STUCK_THRESHOLD};

/// How a step's observation was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The page changed and the backend reported no error.
    Success,
    /// The backend accepted the action but the page stayed the same.
    NoEffect,
    /// The backend reported an error for the action.
    Error,
}

/// A typed observation plus the verdict that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub observation: BrowserObservation,
    pub class: Classification,
}

/// Error and stagnation counters plus the last page identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub consecutive_errors: u32,
    pub consecutive_no_change: u32,
    pub last_page_hash: Option<String>,
    pub last_url: Option<String>,
}

impl Progress {
    pub fn is_stuck(&self) -> bool {
        self.consecutive_no_change >= STUCK_THRESHOLD || self.consecutive_errors >= STUCK_THRESHOLD
    }

    /// Remember a page without counting it as a step result (initial page, recovery reset).
    pub fn seed(&mut self, url: &str, tree_text: &str) {
        self.last_page_hash = Some(fingerprint(url, tree_text));
        self.last_url = Some(url.to_string());
    }

    /// Count a soft or hard failure that never reached the change detector.
    pub fn record_failure(&mut self) {
        self.consecutive_errors += 1;
    }

    /// Classify `raw` and update counters and page identity.
    ///
    /// With `expect_change == false` an unchanged page is still a success; used for
    /// actions that never alter the page, such as the final message to the user.
    pub fn classify(&mut self, raw: &RawObservation, expect_change: bool) -> Classified {
        let tree_text = raw.tree_text();
        let hash = fingerprint(&raw.url, &tree_text);
        let changed = self.last_page_hash.as_deref() != Some(hash.as_str())
            || self.last_url.as_deref() != Some(raw.url.as_str());

        let class = if !raw.last_action_error.is_empty() {
            self.consecutive_errors += 1;
            Classification::Error
        } else if !changed && expect_change {
            self.consecutive_no_change += 1;
            self.consecutive_errors += 1;
            Classification::NoEffect
        } else {
            self.consecutive_errors = 0;
            if changed {
                self.consecutive_no_change = 0;
            }
            Classification::Success
        };

        self.last_page_hash = Some(hash);
        self.last_url = Some(raw.url.clone());

        let error = match class {
            Classification::Error => raw.last_action_error.as_str(),
            Classification::NoEffect => NO_EFFECT_ERROR,
            Classification::Success => "",
        };
        Classified {
            observation: BrowserObservation::new(
                &raw.url,
                &tree_text,
                error,
                &raw.focused_element_bid,
            ),
            class,
        }
    }
}

/// Deterministic page identity over the URL and the first tree characters.
pub fn fingerprint(url: &str, tree_text: &str) -> String {
    let prefix: String = tree_text.chars().take(FINGERPRINT_TREE_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(prefix.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert a raw observation without classifying it (reset results).
pub fn to_observation(raw: &RawObservation) -> BrowserObservation {
    BrowserObservation::new(
        &raw.url,
        &raw.tree_text(),
        &raw.last_action_error,
        &raw.focused_element_bid,
    )
}
