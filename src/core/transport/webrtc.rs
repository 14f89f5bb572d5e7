//! Peer transport backed by webrtc-rs.
//!
//! Data channel callbacks are bridged onto the [`ChannelEvent`] stream and inbound
//! RTP payloads are forwarded to the [`AudioSink`](super::AudioSink) through
//! [`RemoteTrack::packets`]. The microphone track is an Opus sample track; feeding
//! it with captured audio is left to the capture collaborator via
//! [`WebRtcMicrophoneTrack::sample_track`].

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::base::{
    ChannelEvent, DataChannel, DataChannelHandle, MediaDevices, MediaTrack, PeerTransport,
    RemoteTrack, SdpKind, SessionDescription, TrackCallback, TrackKind, TransportError,
    TransportFactory, TransportResult,
};

const CHANNEL_EVENT_BUFFER: usize = 256;
const REMOTE_PACKET_BUFFER: usize = 512;
const RTCP_BUFFER_SIZE: usize = 1500;

const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_CHANNELS: u16 = 2;
const LOCAL_STREAM_ID: &str = "waav-session";

fn stack_error(context: &str, err: webrtc::Error) -> TransportError {
    TransportError::Other(format!("{context}: {err}"))
}

// =============================================================================
// Factory
// =============================================================================

/// Builds webrtc-rs peer connections with the default codecs and interceptors.
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ice_servers(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self) -> TransportResult<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| stack_error("Failed to register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| stack_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let connection = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| stack_error("Failed to create peer connection", e))?;

        debug!("Created WebRTC peer connection");
        Ok(Arc::new(WebRtcTransport {
            connection: Arc::new(connection),
            closed: AtomicBool::new(false),
        }))
    }
}

// =============================================================================
// Transport
// =============================================================================

pub struct WebRtcTransport {
    connection: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> TransportResult<()> {
        self.ensure_open()?;
        let microphone = track
            .as_any()
            .downcast_ref::<WebRtcMicrophoneTrack>()
            .ok_or_else(|| {
                TransportError::Other(format!(
                    "Track {} was not created by the WebRTC media devices",
                    track.id()
                ))
            })?;

        let local: Arc<dyn TrackLocal + Send + Sync> = microphone.sample_track();
        let sender = self
            .connection
            .add_track(local)
            .await
            .map_err(|e| stack_error("Failed to add track", e))?;

        // RTCP has to be drained for interceptors to work
        tokio::spawn(async move {
            let mut buffer = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buffer).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> TransportResult<DataChannelHandle> {
        self.ensure_open()?;
        let channel = self
            .connection
            .create_data_channel(label, None)
            .await
            .map_err(|e| TransportError::DataChannel(e.to_string()))?;

        let (tx, rx) = mpsc::channel(CHANNEL_EVENT_BUFFER);
        bridge_channel_events(&channel, tx);

        Ok(DataChannelHandle {
            channel: Arc::new(WebRtcDataChannel {
                label: label.to_string(),
                inner: channel,
            }),
            events: rx,
        })
    }

    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        self.ensure_open()?;
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        let local = to_rtc_description(description)?;

        // Trickle ICE is not available over a single HTTP exchange, so the
        // description is only reported once candidate gathering has finished.
        let mut gathering_complete = self.connection.gathering_complete_promise().await;
        self.connection
            .set_local_description(local)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        let _ = gathering_complete.recv().await;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.connection
            .local_description()
            .await
            .map(|description| match description.sdp_type {
                RTCSdpType::Answer => SessionDescription::answer(description.sdp),
                _ => SessionDescription::offer(description.sdp),
            })
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        let remote = to_rtc_description(description)?;
        self.connection
            .set_remote_description(remote)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))
    }

    fn on_track(&self, callback: TrackCallback) {
        self.connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let callback = callback.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    };
                    info!(track_id = %track.id(), kind = %kind, "Remote track received");

                    let (tx, rx) = mpsc::channel(REMOTE_PACKET_BUFFER);
                    let remote = RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                        kind,
                        packets: Some(rx),
                    };

                    tokio::spawn(async move {
                        while let Ok((packet, _)) = track.read_rtp().await {
                            if tx.send(packet.payload).await.is_err() {
                                break;
                            }
                        }
                        debug!("Remote track reader finished");
                    });

                    callback(remote).await;
                })
            },
        ));
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection
            .close()
            .await
            .map_err(|e| stack_error("Failed to close peer connection", e))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn to_rtc_description(description: SessionDescription) -> TransportResult<RTCSessionDescription> {
    let converted = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    converted.map_err(|e| TransportError::Description(e.to_string()))
}

fn bridge_channel_events(channel: &Arc<RTCDataChannel>, tx: mpsc::Sender<ChannelEvent>) {
    let open_tx = tx.clone();
    channel.on_open(Box::new(move || {
        let tx = open_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Open).await;
        })
    }));

    let message_tx = tx.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let tx = message_tx.clone();
        Box::pin(async move {
            if !message.is_string {
                warn!(len = message.data.len(), "Ignoring binary data channel message");
                return;
            }
            let text = String::from_utf8_lossy(&message.data).into_owned();
            let _ = tx.send(ChannelEvent::Message(text)).await;
        })
    }));

    let close_tx = tx.clone();
    channel.on_close(Box::new(move || {
        let tx = close_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Close).await;
        })
    }));

    channel.on_error(Box::new(move |err: webrtc::Error| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Error(err.to_string())).await;
        })
    }));
}

// =============================================================================
// Data Channel
// =============================================================================

pub struct WebRtcDataChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> TransportResult<()> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::DataChannel(e.to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::DataChannel(e.to_string()))
    }
}

// =============================================================================
// Media
// =============================================================================

/// Outbound Opus track standing in for the microphone.
pub struct WebRtcMicrophoneTrack {
    id: String,
    local: Arc<TrackLocalStaticSample>,
    live: AtomicBool,
}

impl WebRtcMicrophoneTrack {
    /// The sample track captured audio should be written to.
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.local)
    }
}

impl MediaTrack for WebRtcMicrophoneTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(track_id = %self.id, "Microphone track stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Media devices producing [`WebRtcMicrophoneTrack`]s.
#[derive(Debug, Clone, Default)]
pub struct WebRtcMediaDevices;

#[async_trait]
impl MediaDevices for WebRtcMediaDevices {
    async fn acquire_microphone(&self) -> TransportResult<Vec<Arc<dyn MediaTrack>>> {
        let id = format!("microphone-{}", uuid::Uuid::new_v4());
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                ..Default::default()
            },
            id.clone(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        Ok(vec![Arc::new(WebRtcMicrophoneTrack {
            id,
            local,
            live: AtomicBool::new(true),
        })])
    }
}
