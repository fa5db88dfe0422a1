//! Flags shared between the command surface, the worker thread, and speech playback.
//!
//! All flags live behind one mutex and are only reachable through the methods below.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ControlFlags {
    stop_requested: bool,
    running: bool,
    muted: bool,
    /// Bumped whenever playback must stop; a playing utterance holds the value it started with.
    utterance: u64,
}

#[derive(Debug, Default)]
pub struct ControlState {
    flags: Mutex<ControlFlags>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assert the interruption flag. It stays set until the next goal starts.
    pub fn request_stop(&self) {
        self.lock().stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Clear a pending stop and mark a goal as running.
    pub fn begin_goal(&self) {
        let mut flags = self.lock();
        flags.stop_requested = false;
        flags.running = true;
    }

    pub fn finish_goal(&self) {
        self.lock().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    /// Claim a new utterance generation, invalidating any playback in progress.
    pub fn begin_utterance(&self) -> u64 {
        let mut flags = self.lock();
        flags.utterance += 1;
        flags.utterance
    }

    /// Stop playback in progress without starting a new utterance.
    pub fn cancel_utterance(&self) {
        self.lock().utterance += 1;
    }

    /// Whether an utterance started at `generation` may keep playing.
    pub fn utterance_is_current(&self, generation: u64) -> bool {
        let flags = self.lock();
        flags.utterance == generation && !flags.muted
    }
}
