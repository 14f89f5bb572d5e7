//! Capability traits for the peer media+data transport.
//!
//! The negotiator only talks to these traits. A WebRTC implementation lives in
//! [`super::webrtc`] (feature `webrtc`) and an in-process double in
//! [`super::memory`].

use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by transport capabilities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The user or platform refused access to the capture device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Creating or applying a session description failed
    #[error("Session description error: {0}")]
    Description(String),

    /// Data channel failure
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// The transport was already closed
    #[error("Transport closed")]
    Closed,

    /// Anything else reported by the underlying stack
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Session Descriptions
// =============================================================================

/// Which side of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// A raw SDP session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

// =============================================================================
// Media
// =============================================================================

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// A local capture track attached to the transport for outbound media.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stop capture. Calling it on a stopped track is a no-op.
    fn stop(&self);

    fn is_live(&self) -> bool;

    /// Lets a transport backend recover its concrete track type.
    fn as_any(&self) -> &dyn Any;
}

/// Provider of local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the microphone (audio only).
    async fn acquire_microphone(&self) -> TransportResult<Vec<Arc<dyn MediaTrack>>>;
}

/// An inbound track from the remote peer.
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// Encoded media payloads, when the backend exposes them.
    pub packets: Option<mpsc::Receiver<Bytes>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("has_packets", &self.packets.is_some())
            .finish()
    }
}

/// Playback sink that inbound audio is bound to.
pub trait AudioSink: Send + Sync {
    /// Bind a remote track, replacing any previous one.
    fn attach(&self, track: RemoteTrack);

    /// Unbind the current track. No-op when nothing is attached.
    fn detach(&self);

    fn is_attached(&self) -> bool;
}

// =============================================================================
// Data Channel
// =============================================================================

/// Lifecycle and payload events of a transport data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

/// A message-oriented sub-channel of the peer transport.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Transmit one framed text message.
    async fn send_text(&self, text: String) -> TransportResult<()>;

    /// Close the channel. Closing twice is a no-op.
    async fn close(&self) -> TransportResult<()>;
}

/// A freshly created data channel with its event stream.
pub struct DataChannelHandle {
    pub channel: Arc<dyn DataChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

// =============================================================================
// Peer Transport
// =============================================================================

/// Callback for inbound remote tracks.
pub type TrackCallback =
    Arc<dyn Fn(RemoteTrack) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A peer media+data transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach a local track for outbound media.
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> TransportResult<()>;

    /// Create an outbound data channel. Must happen before the offer so the
    /// channel is part of the negotiated description.
    async fn create_data_channel(&self, label: &str) -> TransportResult<DataChannelHandle>;

    async fn create_offer(&self) -> TransportResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription)
    -> TransportResult<()>;

    /// The committed local description, as it should be sent to the remote peer.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()>;

    /// Register the inbound track handler.
    fn on_track(&self, callback: TrackCallback);

    /// Close the transport. Closing twice is a no-op.
    async fn close(&self) -> TransportResult<()>;

    fn is_closed(&self) -> bool;
}

/// Constructs peer transports, one per negotiation.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> TransportResult<Arc<dyn PeerTransport>>;
}
