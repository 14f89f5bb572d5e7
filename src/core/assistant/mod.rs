//! Voice assistant surface.
//!
//! - [`VoiceSession`]: connection lifecycle, questions and listening.
//! - [`QueryOrchestrator`]: search-augmented instruction composition.
//! - [`SpeechRecognizer`]: local speech-to-text capability used by
//!   [`VoiceSession::listen`].

pub mod orchestrator;
pub mod session;
pub mod speech;

pub use orchestrator::{QueryOrchestrator, compose_context};
pub use session::{QUESTION_FAILED_MESSAGE, SessionDependencies, VoiceSession};
pub use speech::{RecognitionEvent, SpeechRecognizer};
