//! Narration output.
//!
//! [`SpeechOutput`] plays one utterance at a time on a short-lived thread. Starting a new
//! utterance invalidates the previous one through the utterance generation in
//! [`ControlState`] and joins its thread; playback checks the generation between chunks.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::control::ControlState;

/// Speech collaborator as seen by the orchestrator. Optional; never affects control flow.
pub trait Speech: Send + Sync {
    fn speak(&self, text: &str, blocking: bool);
    fn stop(&self);
    fn mute(&self);
    fn unmute(&self);
}

/// Lazily produced audio (or text) chunks for one utterance.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Vec<u8>>> + Send>;

/// Synthesis and playback backend.
pub trait Voice: Send + Sync + 'static {
    fn stream(&self, text: &str) -> Result<ChunkStream>;
    fn play(&self, chunk: &[u8]) -> Result<()>;
}

pub struct SpeechOutput<V: Voice> {
    voice: Arc<V>,
    control: Arc<ControlState>,
    playback: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Voice> SpeechOutput<V> {
    pub fn new(voice: V, control: Arc<ControlState>) -> Self {
        Self {
            voice: Arc::new(voice),
            control,
            playback: Mutex::new(None),
        }
    }

    fn join_playback(&self) {
        let previous = self
            .playback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = previous
            && handle.join().is_err()
        {
            warn!("speech playback thread panicked");
        }
    }
}

fn play_utterance<V: Voice>(voice: &V, control: &ControlState, text: &str, generation: u64) {
    let chunks = match voice.stream(text) {
        Ok(chunks) => chunks,
        Err(err) => {
            warn!(err = %err, "speech synthesis failed");
            return;
        }
    };
    for chunk in chunks {
        if !control.utterance_is_current(generation) {
            debug!("speech interrupted");
            return;
        }
        let played = chunk.and_then(|chunk| voice.play(&chunk));
        if let Err(err) = played {
            warn!(err = %err, "speech playback failed");
            return;
        }
    }
}

impl<V: Voice> Speech for SpeechOutput<V> {
    fn speak(&self, text: &str, blocking: bool) {
        if self.control.is_muted() {
            debug!(text, "skipped speech (muted)");
            return;
        }
        let generation = self.control.begin_utterance();
        self.join_playback();

        if blocking {
            play_utterance(self.voice.as_ref(), &self.control, text, generation);
            return;
        }

        let voice = Arc::clone(&self.voice);
        let control = Arc::clone(&self.control);
        let text = text.to_string();
        let spawned = thread::Builder::new()
            .name("pilot-speech".to_string())
            .spawn(move || play_utterance(voice.as_ref(), &control, &text, generation));
        match spawned {
            Ok(handle) => {
                *self.playback.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => warn!(err = %err, "failed to start speech playback"),
        }
    }

    fn stop(&self) {
        self.control.cancel_utterance();
    }

    fn mute(&self) {
        self.control.set_muted(true);
        self.control.cancel_utterance();
    }

    fn unmute(&self) {
        self.control.set_muted(false);
    }
}

impl<V: Voice> Drop for SpeechOutput<V> {
    fn drop(&mut self) {
        self.control.cancel_utterance();
        self.join_playback();
    }
}

/// Voice that "speaks" by writing words to stdout.
#[derive(Debug, Default)]
pub struct ConsoleVoice;

impl Voice for ConsoleVoice {
    fn stream(&self, text: &str) -> Result<ChunkStream> {
        let mut chunks: Vec<Vec<u8>> = vec![b"[pilot] ".to_vec()];
        chunks.extend(text.split_inclusive(' ').map(|word| word.as_bytes().to_vec()));
        chunks.push(b"\n".to_vec());
        Ok(Box::new(chunks.into_iter().map(Ok)))
    }

    fn play(&self, chunk: &[u8]) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(chunk).context("write narration")?;
        stdout.flush().context("flush narration")
    }
}
