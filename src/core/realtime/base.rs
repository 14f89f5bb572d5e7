//! Session state and the events published to subscribers.
//!
//! The UI never receives callbacks. It subscribes to a broadcast of
//! [`SessionEvent`]s and drives the session through its async methods.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never initialized
    #[default]
    Idle,
    /// Requesting a credential from the session broker
    FetchingCredential,
    /// Acquiring media and exchanging descriptions with the realtime endpoint
    Negotiating,
    /// Handshake complete, waiting for the event channel to open
    ChannelOpening,
    /// Event channel open, ready for questions
    Ready,
    /// Capturing a spoken question
    Listening,
    /// A question is being answered
    Processing,
    /// A fatal failure occurred
    Error,
    /// All resources released
    Disconnected,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Error and Disconnected are reachable from anywhere. Ready is only reached
    /// through a full initialization or the end of a question, never from Error.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self == next {
            return true;
        }
        match next {
            Error | Disconnected => true,
            FetchingCredential => matches!(self, Idle | Error | Disconnected),
            Negotiating => self == FetchingCredential,
            ChannelOpening => self == Negotiating,
            Ready => matches!(self, ChannelOpening | Listening | Processing),
            Listening => self == Ready,
            Processing => matches!(self, Ready | Listening),
            Idle => false,
        }
    }

    /// Event channel is open and the session can take questions or is answering one.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Ready | ConnectionState::Listening | ConnectionState::Processing
        )
    }

    /// An `initialize()` call is between its first and last step.
    pub fn is_initializing(self) -> bool {
        matches!(
            self,
            ConnectionState::FetchingCredential
                | ConnectionState::Negotiating
                | ConnectionState::ChannelOpening
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::FetchingCredential => "fetching_credential",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::ChannelOpening => "channel_opening",
            ConnectionState::Ready => "ready",
            ConnectionState::Listening => "listening",
            ConnectionState::Processing => "processing",
            ConnectionState::Error => "error",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::FetchingCredential => write!(f, "FetchingCredential"),
            ConnectionState::Negotiating => write!(f, "Negotiating"),
            ConnectionState::ChannelOpening => write!(f, "ChannelOpening"),
            ConnectionState::Ready => write!(f, "Ready"),
            ConnectionState::Listening => write!(f, "Listening"),
            ConnectionState::Processing => write!(f, "Processing"),
            ConnectionState::Error => write!(f, "Error"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// =============================================================================
// Session Events
// =============================================================================

/// Streamed response text.
///
/// Partial content is a full-so-far re-send and replaces whatever was shown for
/// the same `sequence`. The final event closes the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamedText {
    /// Client-side sequence number of the instruction this text answers
    pub sequence: u64,
    pub content: String,
    pub is_final: bool,
}

/// Events published by a voice session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection state changed
    StatusChanged {
        state: ConnectionState,
        message: Option<String>,
    },
    /// Response text from the realtime service
    Text(StreamedText),
    /// Transcript of the user's speech while listening
    UserTranscript { text: String, is_final: bool },
    /// Remote audio is bound to the playback sink
    RemoteAudioConnected,
    /// The transport reported a data channel error
    ChannelError(String),
    /// A question could not be submitted; `message` is meant for the user
    QuestionFailed { question: String, message: String },
    /// The service failed the response to instruction `sequence`
    ResponseFailed { sequence: u64, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 9] = [
        Idle,
        FetchingCredential,
        Negotiating,
        ChannelOpening,
        Ready,
        Listening,
        Processing,
        Error,
        Disconnected,
    ];

    #[test]
    fn test_connection_state_display() {
        assert_eq!(Idle.to_string(), "Idle");
        assert_eq!(ChannelOpening.to_string(), "ChannelOpening");
        assert_eq!(Disconnected.to_string(), "Disconnected");
        assert_eq!(FetchingCredential.as_str(), "fetching_credential");
    }

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(ConnectionState::default(), Idle);
    }

    #[test]
    fn test_error_never_goes_straight_to_ready() {
        assert!(!Error.can_transition_to(Ready));
        assert!(!Error.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Listening));
        assert!(Error.can_transition_to(FetchingCredential));
    }

    #[test]
    fn test_error_and_disconnected_reachable_from_anywhere() {
        for state in ALL {
            assert!(state.can_transition_to(Error), "{state} -> Error");
            assert!(state.can_transition_to(Disconnected), "{state} -> Disconnected");
        }
    }

    #[test]
    fn test_initialization_path() {
        assert!(Idle.can_transition_to(FetchingCredential));
        assert!(FetchingCredential.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(ChannelOpening));
        assert!(ChannelOpening.can_transition_to(Ready));

        assert!(!Idle.can_transition_to(Ready));
        assert!(!FetchingCredential.can_transition_to(Ready));
        assert!(!Negotiating.can_transition_to(Ready));
    }

    #[test]
    fn test_question_path() {
        assert!(Ready.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Processing));
        assert!(Ready.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(!Processing.can_transition_to(Listening));
    }

    #[test]
    fn test_connected_and_initializing_groups() {
        let connected: Vec<_> = ALL.into_iter().filter(|s| s.is_connected()).collect();
        assert_eq!(connected, vec![Ready, Listening, Processing]);

        let initializing: Vec<_> = ALL.into_iter().filter(|s| s.is_initializing()).collect();
        assert_eq!(
            initializing,
            vec![FetchingCredential, Negotiating, ChannelOpening]
        );
    }
}
