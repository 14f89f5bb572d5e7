//! Error taxonomy for voice sessions.
//!
//! Fatal initialization failures (`Credential`, `MediaAcquisition`, `Negotiation*`)
//! put the session into the Error state after every partially acquired resource
//! has been released. `Search` and `MessageParse` are recovered locally and never
//! reach the user; they exist so the lower layers can report them uniformly.

use thiserror::Error;

use crate::core::realtime::ConnectionState;
use crate::core::transport::TransportError;

/// Errors that can occur while establishing or driving a voice session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session broker was unreachable or returned an error field
    #[error("Credential error: {0}")]
    Credential(String),

    /// The microphone was denied or is not available
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// The offer/answer handshake failed at the transport level
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The realtime endpoint answered the offer with a non-success status
    #[error("Failed to connect: {status} {reason}")]
    NegotiationRejected { status: u16, reason: String },

    /// An instruction was sent while the event channel was not open
    #[error("Data channel is not open")]
    ChannelNotOpen,

    /// The context search broker failed
    #[error("Search failed: {0}")]
    Search(String),

    /// An inbound data-channel message could not be parsed
    #[error("Message parse error: {0}")]
    MessageParse(String),

    /// An outbound message could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error reported by the peer transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Another operation already owns the session
    #[error("Session busy: {0}")]
    Busy(String),

    /// The operation needs a ready session
    #[error("Session not ready (state: {0})")]
    NotReady(ConnectionState),

    /// Empty question text
    #[error("Question is empty")]
    EmptyQuestion,

    /// The speech recognizer reported a failure
    #[error("Speech recognition error: {0}")]
    SpeechRecognition(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The session was disconnected while the operation was in flight
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Whether this error must put the session into the Error state when it
    /// ends an `initialize()` attempt.
    pub fn is_fatal_to_initialize(&self) -> bool {
        !matches!(self, SessionError::Cancelled(_) | SessionError::Busy(_))
    }
}
