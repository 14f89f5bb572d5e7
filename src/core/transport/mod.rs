//! Peer transport abstraction.
//!
//! [`PeerTransport`] covers exactly what the offer/answer handshake needs:
//! attaching local tracks, creating the event data channel, producing and
//! committing descriptions, and reporting inbound tracks. Capture devices and
//! the playback sink are separate capabilities so they can be injected.
//!
//! # Backends
//!
//! - [`memory`]: in-process double used by tests.
//! - `webrtc` (feature `webrtc`): webrtc-rs peer connections.

pub mod base;
pub mod memory;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use base::{
    AudioSink, ChannelEvent, DataChannel, DataChannelHandle, MediaDevices, MediaTrack,
    PeerTransport, RemoteTrack, SdpKind, SessionDescription, TrackCallback, TrackKind,
    TransportError, TransportFactory, TransportResult,
};
pub use memory::{
    MemoryAudioSink, MemoryDataChannel, MemoryMediaDevices, MemoryTrack, MemoryTransport,
    MemoryTransportConfig, MemoryTransportFactory,
};
#[cfg(feature = "webrtc")]
pub use self::webrtc::{WebRtcMediaDevices, WebRtcMicrophoneTrack, WebRtcTransportFactory};
