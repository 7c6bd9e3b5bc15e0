//! Voice channel capability: speak a line, listen for one answer.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: String },
    #[error("voice I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// One bidirectional audio channel: speaker out, microphone in.
///
/// Both calls block. `listen` returns `Ok(None)` when nothing intelligible was
/// heard before `timeout`.
pub trait VoiceChannel {
    fn speak(&mut self, text: &str) -> Result<(), VoiceError>;
    fn listen(&mut self, timeout: Duration) -> Result<Option<String>, VoiceError>;
}

/// Speak and only log a failure; announcements are never fatal.
pub fn say(voice: &mut dyn VoiceChannel, text: &str) {
    tracing::debug!(text, "speaking");
    if let Err(e) = voice.speak(text) {
        tracing::warn!(error = %e, text, "speech synthesis failed");
    }
}

/// Listen once. Errors and timeouts both count as no answer.
pub fn hear(voice: &mut dyn VoiceChannel, timeout: Duration) -> Option<String> {
    match voice.listen(timeout) {
        Ok(Some(text)) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                tracing::debug!(text, "heard");
                Some(text.to_string())
            }
        }
        Ok(None) => {
            tracing::debug!(?timeout, "no answer");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "listening failed");
            None
        }
    }
}
