//! In-process transport double.
//!
//! Implements every transport capability without networking so the negotiator
//! and the session can be exercised end to end. Every object records what was
//! done to it and exposes helpers to inject remote-side behaviour (channel open,
//! inbound messages, remote close, channel errors, device denial).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use super::base::{
    AudioSink, ChannelEvent, DataChannel, DataChannelHandle, MediaDevices, MediaTrack,
    PeerTransport, RemoteTrack, SessionDescription, TrackCallback, TrackKind, TransportError,
    TransportFactory, TransportResult,
};

const CHANNEL_EVENT_BUFFER: usize = 64;

// =============================================================================
// Factory
// =============================================================================

/// Behaviour knobs for transports created by [`MemoryTransportFactory`].
#[derive(Debug, Clone)]
pub struct MemoryTransportConfig {
    /// Open every data channel once the remote answer is applied.
    pub auto_open: bool,
    /// Deliver a remote audio track once the remote answer is applied.
    pub emit_remote_track: bool,
    /// Fail transport construction.
    pub fail_create: Option<TransportError>,
    /// Fail data channel creation.
    pub fail_data_channel: Option<TransportError>,
    /// Fail applying the remote answer.
    pub fail_remote_description: Option<TransportError>,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            auto_open: true,
            emit_remote_track: true,
            fail_create: None,
            fail_data_channel: None,
            fail_remote_description: None,
        }
    }
}

/// Factory that records every transport it hands out.
#[derive(Default)]
pub struct MemoryTransportFactory {
    config: MemoryTransportConfig,
    next_id: AtomicU64,
    created: Mutex<Vec<Arc<MemoryTransport>>>,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemoryTransportConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Every transport created so far, oldest first.
    pub fn transports(&self) -> Vec<Arc<MemoryTransport>> {
        self.created.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<MemoryTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn create(&self) -> TransportResult<Arc<dyn PeerTransport>> {
        if let Some(err) = &self.config.fail_create {
            return Err(err.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let transport = Arc::new(MemoryTransport::new(id, self.config.clone()));
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// A peer transport that completes its handshake locally.
pub struct MemoryTransport {
    id: u64,
    config: MemoryTransportConfig,
    closed: AtomicBool,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    channels: Mutex<Vec<Arc<MemoryDataChannel>>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    track_callback: Mutex<Option<TrackCallback>>,
    operations: Mutex<Vec<String>>,
}

impl MemoryTransport {
    fn new(id: u64, config: MemoryTransportConfig) -> Self {
        Self {
            id,
            config,
            closed: AtomicBool::new(false),
            tracks: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            track_callback: Mutex::new(None),
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Names of the operations performed on this transport, in call order.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    pub fn channels(&self) -> Vec<Arc<MemoryDataChannel>> {
        self.channels.lock().clone()
    }

    /// The first data channel, which is the event channel in practice.
    pub fn channel(&self) -> Option<Arc<MemoryDataChannel>> {
        self.channels.lock().first().cloned()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn has_track_handler(&self) -> bool {
        self.track_callback.lock().is_some()
    }

    /// Deliver an inbound remote track to the registered handler.
    pub async fn emit_remote_track(&self, track: RemoteTrack) {
        let callback = self.track_callback.lock().clone();
        if let Some(callback) = callback {
            callback(track).await;
        }
    }

    fn record(&self, operation: impl Into<String>) {
        self.operations.lock().push(operation.into());
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn render_offer(&self) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.id
        );
        for track in self.tracks.lock().iter() {
            sdp.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n");
            sdp.push_str(&format!("a=msid:- {}\r\n", track.id()));
        }
        for channel in self.channels.lock().iter() {
            sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
            sdp.push_str(&format!("a=mid:{}\r\n", channel.label()));
        }
        sdp
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> TransportResult<()> {
        self.ensure_open()?;
        self.record("add_track");
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> TransportResult<DataChannelHandle> {
        self.ensure_open()?;
        if let Some(err) = &self.config.fail_data_channel {
            return Err(err.clone());
        }
        self.record("create_data_channel");
        let (tx, rx) = mpsc::channel(CHANNEL_EVENT_BUFFER);
        let channel = Arc::new(MemoryDataChannel::new(label, tx));
        self.channels.lock().push(channel.clone());
        Ok(DataChannelHandle {
            channel,
            events: rx,
        })
    }

    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        self.ensure_open()?;
        self.record("create_offer");
        Ok(SessionDescription::offer(self.render_offer()))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        self.record("set_local_description");
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        if let Some(err) = &self.config.fail_remote_description {
            return Err(err.clone());
        }
        self.record("set_remote_description");
        *self.remote.lock() = Some(description);

        if self.config.auto_open {
            for channel in self.channels() {
                channel.open();
            }
        }
        if self.config.emit_remote_track {
            self.emit_remote_track(RemoteTrack {
                id: format!("remote-audio-{}", self.id),
                stream_id: format!("remote-stream-{}", self.id),
                kind: TrackKind::Audio,
                packets: None,
            })
            .await;
        }
        Ok(())
    }

    fn on_track(&self, callback: TrackCallback) {
        self.record("on_track");
        *self.track_callback.lock() = Some(callback);
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record("close");
        debug!(transport_id = self.id, "Memory transport closed");
        self.track_callback.lock().take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Data Channel
// =============================================================================

/// Data channel whose remote side is driven by the test.
pub struct MemoryDataChannel {
    label: String,
    events: mpsc::Sender<ChannelEvent>,
    sent: Mutex<Vec<String>>,
    open: AtomicBool,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryDataChannel {
    fn new(label: &str, events: mpsc::Sender<ChannelEvent>) -> Self {
        Self {
            label: label.to_string(),
            events,
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Signal the transport-level `open` event.
    pub fn open(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.open.store(true, Ordering::SeqCst);
        let _ = self.events.try_send(ChannelEvent::Open);
    }

    /// Deliver an inbound message from the remote peer.
    pub fn deliver(&self, raw: impl Into<String>) {
        let _ = self.events.try_send(ChannelEvent::Message(raw.into()));
    }

    /// Close the channel from the remote side.
    pub fn remote_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.try_send(ChannelEvent::Close);
        }
    }

    /// Raise a transport-level channel error.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events.try_send(ChannelEvent::Error(reason.into()));
    }

    /// Make every following `send_text` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Messages transmitted so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannel for MemoryDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::DataChannel(format!(
                "channel '{}' is not open",
                self.label
            )));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::DataChannel("send failed".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.try_send(ChannelEvent::Close);
        }
        Ok(())
    }
}

// =============================================================================
// Media
// =============================================================================

/// A capture track that only tracks its live flag.
pub struct MemoryTrack {
    id: String,
    kind: TrackKind,
    live: AtomicBool,
}

impl MemoryTrack {
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
            live: AtomicBool::new(true),
        }
    }
}

impl MediaTrack for MemoryTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Media devices that either grant a microphone track or refuse.
#[derive(Default)]
pub struct MemoryMediaDevices {
    denial: Option<TransportError>,
    issued: Mutex<Vec<Arc<MemoryTrack>>>,
}

impl MemoryMediaDevices {
    pub fn granted() -> Self {
        Self::default()
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            denial: Some(TransportError::PermissionDenied(reason.into())),
            ..Default::default()
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            denial: Some(TransportError::DeviceUnavailable(reason.into())),
            ..Default::default()
        }
    }

    /// Every track handed out so far.
    pub fn issued_tracks(&self) -> Vec<Arc<MemoryTrack>> {
        self.issued.lock().clone()
    }

    /// Number of issued tracks still capturing.
    pub fn live_tracks(&self) -> usize {
        self.issued.lock().iter().filter(|t| t.is_live()).count()
    }
}

#[async_trait]
impl MediaDevices for MemoryMediaDevices {
    async fn acquire_microphone(&self) -> TransportResult<Vec<Arc<dyn MediaTrack>>> {
        if let Some(err) = &self.denial {
            return Err(err.clone());
        }
        let mut issued = self.issued.lock();
        let track = Arc::new(MemoryTrack::audio(format!("mic-{}", issued.len() + 1)));
        issued.push(track.clone());
        Ok(vec![track as Arc<dyn MediaTrack>])
    }
}

/// Audio sink that remembers which track is bound.
#[derive(Default)]
pub struct MemoryAudioSink {
    attached: Mutex<Option<String>>,
    attach_count: AtomicUsize,
    detach_count: AtomicUsize,
}

impl MemoryAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached_track(&self) -> Option<String> {
        self.attached.lock().clone()
    }

    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::SeqCst)
    }

    /// Number of detach calls that actually unbound a track.
    pub fn detach_count(&self) -> usize {
        self.detach_count.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemoryAudioSink {
    fn attach(&self, track: RemoteTrack) {
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        *self.attached.lock() = Some(track.id);
    }

    fn detach(&self) {
        if self.attached.lock().take().is_some() {
            self.detach_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_attached(&self) -> bool {
        self.attached.lock().is_some()
    }
}
