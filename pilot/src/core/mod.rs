//! Deterministic, pure logic shared by the pilot.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory data
//! structures and return deterministic outputs suitable for tests. Timestamps on
//! events are the only wall-clock input.

pub mod action;
pub mod axtree;
pub mod change;
pub mod event;
pub mod state;
pub mod types;
pub mod view;
