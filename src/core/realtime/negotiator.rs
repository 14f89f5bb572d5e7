//! Offer/answer negotiation with the realtime endpoint.
//!
//! Everything acquired along the way is recorded in [`SessionResources`] as soon
//! as it exists, so a failure (or a timeout dropping the future) at any step
//! leaves the caller holding exactly what has to be released.

use http::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use url::Url;

use super::base::SessionEvent;
use super::channel::EventChannel;
use super::config::{Modality, SDP_CONTENT_TYPE};
use crate::config::SessionConfig;
use crate::core::broker::{Credential, build_http_client};
use crate::core::transport::{
    AudioSink, ChannelEvent, MediaDevices, MediaTrack, PeerTransport, RemoteTrack,
    SessionDescription, TrackCallback, TrackKind, TransportFactory,
};
use crate::errors::{SessionError, SessionResult};
use crate::utils::url_validation::validate_credentialed_url;

// =============================================================================
// Session Resources
// =============================================================================

/// Resources owned by one session: media tracks, transport and event channel.
#[derive(Default)]
pub struct SessionResources {
    pub transport: Option<Arc<dyn PeerTransport>>,
    pub tracks: Vec<Arc<dyn MediaTrack>>,
    pub channel: Option<Arc<EventChannel>>,
    /// Event stream of `channel`, until a pump takes it over
    pub channel_events: Option<mpsc::Receiver<ChannelEvent>>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.transport.is_none()
            && self.tracks.is_empty()
            && self.channel.is_none()
            && self.channel_events.is_none()
    }

    /// Stop tracks, close the channel, close the transport, detach the sink.
    ///
    /// Each step is skipped when its resource is absent, so this can run any
    /// number of times.
    pub async fn release(&mut self, sink: &dyn AudioSink) {
        let tracks = self.tracks.len();
        for track in self.tracks.drain(..) {
            track.stop();
        }

        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.channel_events = None;

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Failed to close peer transport");
            }
        }

        sink.detach();
        debug!(tracks, "Session resources released");
    }
}

// =============================================================================
// Negotiator
// =============================================================================

/// Builds the peer transport and completes the handshake.
pub struct TransportNegotiator {
    http: Client,
    endpoint: Url,
    channel_label: String,
    modalities: Vec<Modality>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaDevices>,
    sink: Arc<dyn AudioSink>,
}

impl TransportNegotiator {
    pub fn new(
        config: &SessionConfig,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaDevices>,
        sink: Arc<dyn AudioSink>,
    ) -> SessionResult<Self> {
        let mut endpoint = validate_credentialed_url(&config.realtime_url)
            .map_err(|e| SessionError::InvalidConfiguration(format!("realtime_url: {e}")))?;
        endpoint
            .query_pairs_mut()
            .append_pair("model", &config.model);

        Ok(Self {
            http: build_http_client(config.handshake_timeout())?,
            endpoint,
            channel_label: config.data_channel_label.clone(),
            modalities: config.modalities.clone(),
            transports,
            media,
            sink,
        })
    }

    /// SDP exchange URL including the `model` query parameter.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Negotiate a transport using `credential`.
    ///
    /// On success `resources` holds the transport, the local tracks and the
    /// event channel (still Closed until the transport reports it open) and the
    /// channel is returned. On failure `resources` holds whatever was acquired
    /// before the failing step.
    pub async fn negotiate(
        &self,
        credential: Credential,
        resources: &mut SessionResources,
        events: &broadcast::Sender<SessionEvent>,
    ) -> SessionResult<Arc<EventChannel>> {
        let transport = self
            .transports
            .create()
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to create transport: {e}")))?;
        resources.transport = Some(transport.clone());

        // Registered before the offer so a track arriving with the answer is not missed
        transport.on_track(self.track_handler(events.clone()));

        let tracks = self
            .media
            .acquire_microphone()
            .await
            .map_err(|e| SessionError::MediaAcquisition(e.to_string()))?;
        for track in tracks {
            resources.tracks.push(track.clone());
            transport.add_track(track).await.map_err(|e| {
                SessionError::Negotiation(format!("Failed to attach local track: {e}"))
            })?;
        }

        let handle = transport
            .create_data_channel(&self.channel_label)
            .await
            .map_err(|e| {
                SessionError::Negotiation(format!("Failed to create data channel: {e}"))
            })?;
        let channel = Arc::new(EventChannel::new(handle.channel, self.modalities.clone()));
        resources.channel = Some(channel.clone());
        resources.channel_events = Some(handle.events);

        let offer = transport
            .create_offer()
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to create offer: {e}")))?;
        transport.set_local_description(offer).await.map_err(|e| {
            SessionError::Negotiation(format!("Failed to set local description: {e}"))
        })?;
        let local = transport.local_description().await.ok_or_else(|| {
            SessionError::Negotiation("Local description missing after commit".to_string())
        })?;

        let answer = self.exchange(&credential, local.sdp).await?;
        drop(credential);

        transport
            .set_remote_description(SessionDescription::answer(answer))
            .await
            .map_err(|e| {
                SessionError::Negotiation(format!("Failed to set remote description: {e}"))
            })?;

        info!(label = %channel.label(), "Transport negotiated");
        Ok(channel)
    }

    /// POST the offer and return the answer SDP.
    async fn exchange(&self, credential: &Credential, offer: String) -> SessionResult<String> {
        debug!(endpoint = %self.endpoint, len = offer.len(), "Sending offer");

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer)
            .send()
            .await
            .map_err(|e| SessionError::Negotiation(format!("SDP exchange failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Realtime endpoint rejected the offer");
            return Err(SessionError::NegotiationRejected {
                status: status.as_u16(),
                reason,
            });
        }

        let answer = response
            .text()
            .await
            .map_err(|e| SessionError::Negotiation(format!("Failed to read answer: {e}")))?;
        if answer.trim().is_empty() {
            return Err(SessionError::Negotiation(
                "Realtime endpoint returned an empty answer".to_string(),
            ));
        }
        Ok(answer)
    }

    fn track_handler(&self, events: broadcast::Sender<SessionEvent>) -> TrackCallback {
        let sink = self.sink.clone();
        Arc::new(move |track: RemoteTrack| {
            let sink = sink.clone();
            let events = events.clone();
            Box::pin(async move {
                if track.kind != TrackKind::Audio {
                    debug!(track_id = %track.id, kind = %track.kind, "Ignoring non-audio remote track");
                    return;
                }
                info!(track_id = %track.id, "Remote audio connected");
                sink.attach(track);
                let _ = events.send(SessionEvent::RemoteAudioConnected);
            })
        })
    }
}
