//! Interaction-control core of an autonomous browser agent.
//!
//! A goal is pursued step by step: the pilot asks a reasoning service for the next
//! action, executes it in a browser environment, classifies what changed, and keeps a
//! compact trajectory the next prompt is built from. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (tree compaction, change detection, action
//!   validation, trajectory views). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (child processes, prompts, speech,
//!   trajectory logs). Behind traits so tests can script them.
//!
//! Orchestration modules ([`step`], [`looping`], [`orchestrator`]) coordinate core
//! logic with I/O; [`control`] holds the flags shared across threads.

pub mod control;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod orchestrator;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
