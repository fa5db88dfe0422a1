//! Side-effecting collaborators: config files, child processes, prompts, speech, logs.

pub mod config;
pub mod environment;
pub mod process;
pub mod prompt;
pub mod reasoner;
pub mod speech;
pub mod trajectory_log;
