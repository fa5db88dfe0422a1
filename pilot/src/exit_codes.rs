//! Stable exit codes for pilot CLI commands.

/// Command succeeded; for `run`, every goal completed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, arguments, or other errors.
pub const INVALID: i32 = 1;
/// `pilot run` finished but at least one goal did not complete.
pub const GOAL_FAILED: i32 = 2;
/// `pilot check-action` rejected the code.
pub const ACTION_REJECTED: i32 = 3;
