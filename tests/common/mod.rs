//! Shared harness for session integration tests
//!
//! Builds a [`VoiceSession`] on top of the in-memory transport with a wiremock
//! server playing both the local broker (`/session`, `/search`) and the
//! realtime endpoint (`/v1/realtime`).

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_session::core::transport::{
    MemoryAudioSink, MemoryDataChannel, MemoryMediaDevices, MemoryTransportConfig,
    MemoryTransportFactory, PeerTransport,
};
use waav_session::{
    ConnectionState, RecognitionEvent, SessionConfig, SessionDependencies, SessionError,
    SessionEvent, SessionResult, SpeechRecognizer, StreamedText, VoiceSession,
};

pub const ANSWER_SDP: &str = "v=0\r\no=- 42 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

// =============================================================================
// Broker / Realtime Mocks
// =============================================================================

pub async fn mount_session_ok(server: &MockServer) {
    mount_session(
        server,
        ResponseTemplate::new(200).set_body_json(json!({
            "client_secret": {"value": "ek_test_secret", "expires_at": 1_700_000_000}
        })),
    )
    .await;
}

pub async fn mount_session(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mount_answer(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mount_search(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Broker and realtime endpoint that let a session connect.
pub async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    mount_session_ok(&server).await;
    mount_answer(&server, ResponseTemplate::new(201).set_body_string(ANSWER_SDP)).await;
    mount_search(&server, json!({"results": []})).await;
    server
}

// =============================================================================
// Session Harness
// =============================================================================

pub struct Harness {
    pub session: VoiceSession,
    pub factory: Arc<MemoryTransportFactory>,
    pub devices: Arc<MemoryMediaDevices>,
    pub sink: Arc<MemoryAudioSink>,
    pub server: MockServer,
}

pub struct HarnessBuilder {
    server: MockServer,
    devices: MemoryMediaDevices,
    transport: MemoryTransportConfig,
    handshake_timeout_seconds: u64,
}

impl HarnessBuilder {
    pub fn new(server: MockServer) -> Self {
        Self {
            server,
            devices: MemoryMediaDevices::granted(),
            transport: MemoryTransportConfig::default(),
            handshake_timeout_seconds: 5,
        }
    }

    pub fn devices(mut self, devices: MemoryMediaDevices) -> Self {
        self.devices = devices;
        self
    }

    pub fn transport(mut self, config: MemoryTransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn handshake_timeout(mut self, seconds: u64) -> Self {
        self.handshake_timeout_seconds = seconds;
        self
    }

    pub fn build(self) -> Harness {
        let config = SessionConfig {
            broker_url: self.server.uri(),
            realtime_url: format!("{}/v1/realtime", self.server.uri()),
            handshake_timeout_seconds: self.handshake_timeout_seconds,
            search_timeout_seconds: 2,
            ..SessionConfig::default()
        };

        let factory = Arc::new(MemoryTransportFactory::with_config(self.transport));
        let devices = Arc::new(self.devices);
        let sink = Arc::new(MemoryAudioSink::new());
        let session = VoiceSession::new(
            &config,
            SessionDependencies {
                transports: factory.clone(),
                media: devices.clone(),
                sink: sink.clone(),
            },
        )
        .expect("session should build");

        Harness {
            session,
            factory,
            devices,
            sink,
            server: self.server,
        }
    }
}

impl Harness {
    pub async fn healthy() -> Self {
        HarnessBuilder::new(healthy_server().await).build()
    }

    /// Remote side of the event channel of the latest transport.
    pub fn remote_channel(&self) -> Arc<MemoryDataChannel> {
        self.factory
            .last()
            .and_then(|t| t.channel())
            .expect("a data channel should exist")
    }

    /// Instructions transmitted on the latest event channel.
    pub fn sent_instructions(&self) -> Vec<String> {
        self.remote_channel()
            .sent()
            .iter()
            .map(|raw| {
                let value: Value = serde_json::from_str(raw).expect("sent JSON");
                assert_eq!(value["type"], "response.create");
                value["response"]["instructions"]
                    .as_str()
                    .expect("instructions")
                    .to_string()
            })
            .collect()
    }

    /// No live tracks, no open transport, no open channel, no sink binding.
    pub fn assert_fully_released(&self) {
        assert_eq!(self.devices.live_tracks(), 0, "media tracks left running");
        for transport in self.factory.transports() {
            assert!(transport.is_closed(), "transport {} left open", transport.id());
            for channel in transport.channels() {
                assert!(!channel.is_open(), "channel left open on transport {}", transport.id());
            }
        }
        assert!(self.sink.attached_track().is_none(), "audio sink still attached");
    }
}

// =============================================================================
// Event Helpers
// =============================================================================

/// Wait for the next event matching `pred`, skipping others.
pub async fn next_matching<F>(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut pred: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

pub async fn next_text(events: &mut broadcast::Receiver<SessionEvent>) -> StreamedText {
    match next_matching(events, |e| matches!(e, SessionEvent::Text(_))).await {
        SessionEvent::Text(text) => text,
        _ => unreachable!(),
    }
}

/// Wait until the session publishes `state`; returns the attached message.
pub async fn wait_for_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    state: ConnectionState,
) -> Option<String> {
    match next_matching(
        events,
        |e| matches!(e, SessionEvent::StatusChanged { state: s, .. } if *s == state),
    )
    .await
    {
        SessionEvent::StatusChanged { message, .. } => message,
        _ => unreachable!(),
    }
}

/// States published so far, without waiting.
pub fn drain_states(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StatusChanged { state, .. } = event {
            states.push(state);
        }
    }
    states
}

pub fn partial(content: &str) -> String {
    json!({"type": "text.partial", "text": {"content": content}}).to_string()
}

pub fn final_text(content: &str) -> String {
    json!({"type": "text.final", "text": {"content": content}}).to_string()
}

// =============================================================================
// Speech Recognizer Double
// =============================================================================

/// Plays back a fixed list of recognition events.
#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<Vec<RecognitionEvent>>,
    fail_start: Option<String>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ScriptedRecognizer {
    pub fn new(script: Vec<RecognitionEvent>) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    pub fn failing_start(reason: &str) -> Self {
        Self {
            fail_start: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn start(&self, events: mpsc::Sender<RecognitionEvent>) -> SessionResult<()> {
        if let Some(reason) = &self.fail_start {
            return Err(SessionError::SpeechRecognition(reason.clone()));
        }
        self.started.store(true, Ordering::SeqCst);
        let script = std::mem::take(&mut *self.script.lock());
        tokio::spawn(async move {
            for event in script {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
