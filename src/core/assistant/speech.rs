//! Local speech-to-text capability.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SessionResult;

/// Results streamed by a [`SpeechRecognizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Hypothesis so far; replaces the previous interim text
    Interim(String),
    /// Finalized utterance
    Final(String),
    /// Recognition failed
    Error(String),
    /// Recognition stopped without a final result
    Ended,
}

/// Captures one utterance from the user.
///
/// `start` begins capture and returns once recognition is running; results are
/// pushed to `events` until `stop` is called or the recognizer ends on its own.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self, events: mpsc::Sender<RecognitionEvent>) -> SessionResult<()>;

    async fn stop(&self);
}
