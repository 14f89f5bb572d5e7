pub mod assistant;
pub mod broker;
pub mod realtime;
pub mod transport;

// Re-export commonly used types for convenience
pub use assistant::{
    QUESTION_FAILED_MESSAGE, QueryOrchestrator, RecognitionEvent, SessionDependencies,
    SpeechRecognizer, VoiceSession,
};

pub use broker::{ContextSearchClient, Credential, CredentialFetcher, SearchResult};

pub use realtime::{
    ConnectionState, EventChannel, Instruction, Modality, SessionEvent, StreamedText,
    TransportNegotiator,
};

pub use transport::{
    AudioSink, DataChannel, MediaDevices, MediaTrack, PeerTransport, RemoteTrack,
    TransportError, TransportFactory,
};
