//! Voice session lifecycle.
//!
//! [`VoiceSession`] owns one connection at a time: the media tracks, the peer
//! transport, the event channel and the audio sink binding. Every connection
//! attempt runs under an epoch number; `disconnect()` bumps the epoch so any
//! work still in flight for the old connection is discarded instead of
//! touching the new state.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::orchestrator::QueryOrchestrator;
use super::speech::{RecognitionEvent, SpeechRecognizer};
use crate::config::SessionConfig;
use crate::core::broker::CredentialFetcher;
use crate::core::realtime::{
    ChannelSignal, ConnectionState, EventChannel, SessionEvent, SessionResources,
    TransportNegotiator,
};
use crate::core::transport::{AudioSink, ChannelEvent, MediaDevices, TransportFactory};
use crate::errors::{SessionError, SessionResult};

/// Message shown to the user when a question could not be submitted.
pub const QUESTION_FAILED_MESSAGE: &str =
    "I'm sorry, there was an error processing your question. Please try again.";

const EVENT_BUFFER: usize = 256;
const RECOGNITION_BUFFER: usize = 32;

/// Platform capabilities a session is built on.
#[derive(Clone)]
pub struct SessionDependencies {
    pub transports: Arc<dyn TransportFactory>,
    pub media: Arc<dyn MediaDevices>,
    pub sink: Arc<dyn AudioSink>,
}

/// A real-time voice assistant session.
///
/// Cloning is cheap; clones drive the same session. State changes and
/// streamed text are published as [`SessionEvent`]s, see [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    credentials: CredentialFetcher,
    negotiator: TransportNegotiator,
    orchestrator: QueryOrchestrator,
    sink: Arc<dyn AudioSink>,
    handshake_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<ConnectionState>,
    initializing: AtomicBool,
    /// Bumped under the state lock whenever a connection attempt starts or the
    /// session is torn down
    epoch: AtomicU64,
    resources: AsyncMutex<SessionResources>,
    /// Cancelled when the current connection is torn down
    lifetime: Mutex<Option<CancellationToken>>,
}

/// Clears the `initializing` flag even if `initialize()` is dropped mid-way.
struct InitializingGuard<'a>(&'a AtomicBool);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl VoiceSession {
    pub fn new(config: &SessionConfig, deps: SessionDependencies) -> SessionResult<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let inner = SessionInner {
            id: Uuid::new_v4().to_string(),
            credentials: CredentialFetcher::new(config)?,
            negotiator: TransportNegotiator::new(
                config,
                deps.transports,
                deps.media,
                deps.sink.clone(),
            )?,
            orchestrator: QueryOrchestrator::new(config)?,
            sink: deps.sink,
            handshake_timeout: config.handshake_timeout(),
            events,
            state: Mutex::new(ConnectionState::Idle),
            initializing: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            resources: AsyncMutex::new(SessionResources::default()),
            lifetime: Mutex::new(None),
        };
        debug!(session_id = %inner.id, "Voice session created");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to state changes, streamed text and transcripts.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Connect the session.
    ///
    /// Returns `true` once the session is Ready (or already was). On failure
    /// everything acquired is released, the state is Error and `false` is
    /// returned. A call made while another `initialize()` is running is
    /// rejected with `false` and does not disturb the running attempt.
    pub async fn initialize(&self) -> bool {
        match self.try_initialize().await {
            Ok(()) => true,
            Err(e) => {
                debug!(session_id = %self.inner.id, error = %e, "initialize() failed");
                false
            }
        }
    }

    /// [`initialize`](Self::initialize) reporting why it failed.
    pub async fn try_initialize(&self) -> SessionResult<()> {
        let inner = &self.inner;
        if inner.initializing.swap(true, Ordering::SeqCst) {
            warn!(session_id = %inner.id, "Initialization already in progress");
            return Err(SessionError::Busy(
                "initialization already in progress".to_string(),
            ));
        }
        let _guard = InitializingGuard(&inner.initializing);

        if inner.state().is_connected() {
            debug!(session_id = %inner.id, "Session already connected");
            return Ok(());
        }

        let epoch = self.begin_attempt().await?;
        info!(session_id = %inner.id, epoch, "Initializing voice session");

        match self.establish(epoch).await {
            Ok(()) => {
                info!(session_id = %inner.id, epoch, "Voice session ready");
                Ok(())
            }
            Err(e) => {
                self.fail_attempt(epoch, &e).await;
                Err(e)
            }
        }
    }

    /// Release leftovers of a previous connection and enter FetchingCredential.
    async fn begin_attempt(&self) -> SessionResult<u64> {
        let inner = &self.inner;
        let mut resources = inner.resources.lock().await;
        inner.cancel_lifetime();
        if !resources.is_empty() {
            debug!(session_id = %inner.id, "Releasing resources of the previous connection");
            resources.release(inner.sink.as_ref()).await;
        }

        let mut state = inner.state.lock();
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if !inner.apply(&mut state, ConnectionState::FetchingCredential, None) {
            return Err(SessionError::NotReady(*state));
        }
        Ok(epoch)
    }

    async fn establish(&self, epoch: u64) -> SessionResult<()> {
        let inner = &self.inner;
        let mut acquired = SessionResources::default();

        let negotiated = tokio::time::timeout(inner.handshake_timeout, async {
            let credential = inner.credentials.fetch().await?;
            inner.advance(epoch, ConnectionState::Negotiating, None)?;
            inner
                .negotiator
                .negotiate(credential, &mut acquired, &inner.events)
                .await
        })
        .await;

        let channel = match negotiated {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                acquired.release(inner.sink.as_ref()).await;
                return Err(e);
            }
            Err(_) => {
                acquired.release(inner.sink.as_ref()).await;
                return Err(SessionError::Timeout(format!(
                    "handshake did not complete within {:?}",
                    inner.handshake_timeout
                )));
            }
        };

        {
            let mut resources = inner.resources.lock().await;
            if !inner.is_current(epoch) {
                drop(resources);
                acquired.release(inner.sink.as_ref()).await;
                return Err(SessionError::Cancelled(
                    "session was disconnected during initialization".to_string(),
                ));
            }

            let Some(events) = acquired.channel_events.take() else {
                drop(resources);
                acquired.release(inner.sink.as_ref()).await;
                return Err(SessionError::Negotiation(
                    "event channel has no event stream".to_string(),
                ));
            };
            *resources = acquired;

            let token = CancellationToken::new();
            *inner.lifetime.lock() = Some(token.clone());
            tokio::spawn(run_event_pump(
                Arc::downgrade(&self.inner),
                channel.clone(),
                events,
                epoch,
                token,
            ));
            inner.advance(epoch, ConnectionState::ChannelOpening, None)?;
        }

        channel.wait_open(inner.handshake_timeout).await?;
        inner.advance(epoch, ConnectionState::Ready, None)
    }

    async fn fail_attempt(&self, epoch: u64, err: &SessionError) {
        let inner = &self.inner;
        let mut resources = inner.resources.lock().await;
        if !inner.is_current(epoch) || !err.is_fatal_to_initialize() {
            debug!(session_id = %inner.id, error = %err, "Discarding superseded initialization");
            return;
        }

        inner.cancel_lifetime();
        resources.release(inner.sink.as_ref()).await;
        error!(session_id = %inner.id, error = %err, "Voice session initialization failed");
        let _ = inner.advance(epoch, ConnectionState::Error, Some(err.to_string()));
    }

    /// Tear the session down. Safe to call any number of times, on a session
    /// that never connected, or while `initialize()` is running. Always ends
    /// in Disconnected.
    pub async fn disconnect(&self) {
        info!(session_id = %self.inner.id, "Disconnecting voice session");
        self.inner.teardown(None, None).await;
    }

    /// Ask a question.
    ///
    /// Accepted from Ready or Listening; the session stays in Processing until
    /// the final text of the answer arrives, or the service fails the response
    /// ([`SessionEvent::ResponseFailed`]). If the instruction cannot be sent
    /// a [`SessionEvent::QuestionFailed`] is published and the session moves
    /// to Error. Returns the sequence number the answer text will carry.
    pub async fn submit_question(&self, question: &str) -> SessionResult<u64> {
        let inner = &self.inner;
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let channel = inner.resources.lock().await.channel.clone();
        let (epoch, channel) = {
            let mut state = inner.state.lock();
            match *state {
                ConnectionState::Ready | ConnectionState::Listening => {}
                ConnectionState::Processing => {
                    return Err(SessionError::Busy(
                        "a question is already being processed".to_string(),
                    ));
                }
                other => return Err(SessionError::NotReady(other)),
            }
            let Some(channel) = channel else {
                return Err(SessionError::NotReady(*state));
            };
            inner.apply(&mut state, ConnectionState::Processing, None);
            (inner.epoch.load(Ordering::SeqCst), channel)
        };

        info!(session_id = %inner.id, len = question.len(), "Processing question");
        match inner.orchestrator.submit(&channel, question).await {
            Ok(sequence) => Ok(sequence),
            Err(e) => {
                if inner.is_current(epoch) {
                    error!(session_id = %inner.id, error = %e, "Failed to submit question");
                    inner.publish(SessionEvent::QuestionFailed {
                        question: question.to_string(),
                        message: QUESTION_FAILED_MESSAGE.to_string(),
                    });
                    let _ = inner.advance(epoch, ConnectionState::Error, Some(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Capture one utterance with `recognizer` and submit it as a question.
    ///
    /// Transcripts are published while listening. Returns `Ok(None)` when the
    /// user said nothing. A recognizer failure returns the session to Ready.
    pub async fn listen(&self, recognizer: &dyn SpeechRecognizer) -> SessionResult<Option<u64>> {
        let inner = &self.inner;
        let (epoch, lifetime) = {
            let mut state = inner.state.lock();
            match *state {
                ConnectionState::Ready => {}
                ConnectionState::Listening | ConnectionState::Processing => {
                    return Err(SessionError::Busy(format!("session is {}", *state)));
                }
                other => return Err(SessionError::NotReady(other)),
            }
            inner.apply(&mut state, ConnectionState::Listening, None);
            let lifetime = inner.lifetime.lock().clone().unwrap_or_default();
            (inner.epoch.load(Ordering::SeqCst), lifetime)
        };

        let (tx, mut rx) = mpsc::channel(RECOGNITION_BUFFER);
        if let Err(e) = recognizer.start(tx).await {
            let e = match e {
                SessionError::SpeechRecognition(_) => e,
                other => SessionError::SpeechRecognition(other.to_string()),
            };
            warn!(session_id = %inner.id, error = %e, "Speech recognizer failed to start");
            inner.advance_from(
                epoch,
                ConnectionState::Listening,
                ConnectionState::Ready,
                Some(e.to_string()),
            );
            return Err(e);
        }

        let outcome = loop {
            let event = tokio::select! {
                _ = lifetime.cancelled() => {
                    break Err(SessionError::Cancelled(
                        "session disconnected while listening".to_string(),
                    ));
                }
                event = rx.recv() => event,
            };
            match event {
                Some(RecognitionEvent::Interim(text)) => {
                    inner.publish(SessionEvent::UserTranscript {
                        text,
                        is_final: false,
                    });
                }
                Some(RecognitionEvent::Final(text)) => {
                    inner.publish(SessionEvent::UserTranscript {
                        text: text.clone(),
                        is_final: true,
                    });
                    break Ok(text);
                }
                Some(RecognitionEvent::Error(reason)) => {
                    break Err(SessionError::SpeechRecognition(reason));
                }
                Some(RecognitionEvent::Ended) | None => break Ok(String::new()),
            }
        };
        recognizer.stop().await;

        match outcome {
            Ok(utterance) if utterance.trim().is_empty() => {
                debug!(session_id = %inner.id, "No speech captured");
                inner.advance_from(epoch, ConnectionState::Listening, ConnectionState::Ready, None);
                Ok(None)
            }
            Ok(utterance) => self.submit_question(&utterance).await.map(Some),
            Err(e @ SessionError::SpeechRecognition(_)) => {
                warn!(session_id = %inner.id, error = %e, "Speech recognition failed");
                inner.advance_from(
                    epoch,
                    ConnectionState::Listening,
                    ConnectionState::Ready,
                    Some(e.to_string()),
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl SessionInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn cancel_lifetime(&self) {
        if let Some(token) = self.lifetime.lock().take() {
            token.cancel();
        }
    }

    /// Apply a transition with the state lock held. Publishes only when the
    /// state or message changes something.
    fn apply(
        &self,
        state: &mut ConnectionState,
        next: ConnectionState,
        message: Option<String>,
    ) -> bool {
        if *state == next && message.is_none() {
            return true;
        }
        if !state.can_transition_to(next) {
            warn!(session_id = %self.id, from = %state, to = %next, "Rejected state transition");
            return false;
        }
        debug!(session_id = %self.id, from = %state, to = %next, "State transition");
        *state = next;
        self.publish(SessionEvent::StatusChanged {
            state: next,
            message,
        });
        true
    }

    /// Transition unless the session was torn down since `epoch` started.
    fn advance(
        &self,
        epoch: u64,
        next: ConnectionState,
        message: Option<String>,
    ) -> SessionResult<()> {
        let mut state = self.state.lock();
        if !self.is_current(epoch) {
            return Err(SessionError::Cancelled(
                "session was disconnected".to_string(),
            ));
        }
        if self.apply(&mut state, next, message) {
            Ok(())
        } else {
            Err(SessionError::NotReady(*state))
        }
    }

    /// `from` -> `next`, only if the session is still in `from` within `epoch`.
    fn advance_from(
        &self,
        epoch: u64,
        from: ConnectionState,
        next: ConnectionState,
        message: Option<String>,
    ) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(epoch) || *state != from {
            return false;
        }
        self.apply(&mut state, next, message)
    }

    /// Release everything and end in Disconnected.
    ///
    /// With `expected` set, does nothing unless that epoch is still current.
    async fn teardown(&self, expected: Option<u64>, message: Option<String>) {
        let mut resources = self.resources.lock().await;
        {
            let _state = self.state.lock();
            let current = self.epoch.load(Ordering::SeqCst);
            if expected.is_some_and(|e| e != current) {
                return;
            }
            self.epoch.store(current + 1, Ordering::SeqCst);
        }

        self.cancel_lifetime();
        resources.release(self.sink.as_ref()).await;
        // Still holding `resources` so a new initialize() cannot slip in first
        self.set_state(ConnectionState::Disconnected, message);
    }

    fn set_state(&self, next: ConnectionState, message: Option<String>) -> bool {
        let mut state = self.state.lock();
        self.apply(&mut state, next, message)
    }
}

/// Drive the event channel of one connection until it closes or the
/// connection is torn down.
async fn run_event_pump(
    session: Weak<SessionInner>,
    channel: Arc<EventChannel>,
    mut events: mpsc::Receiver<ChannelEvent>,
    epoch: u64,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => event.unwrap_or(ChannelEvent::Close),
        };

        let signal = channel.handle_transport_event(event);
        let Some(inner) = session.upgrade() else {
            break;
        };

        match signal {
            ChannelSignal::Text(text) => {
                if !inner.is_current(epoch) {
                    continue;
                }
                // Ready must be visible by the time the final text is seen
                if text.is_final {
                    inner.advance_from(
                        epoch,
                        ConnectionState::Processing,
                        ConnectionState::Ready,
                        None,
                    );
                }
                inner.publish(SessionEvent::Text(text));
            }
            ChannelSignal::ResponseFailed { sequence, reason } => {
                if !inner.is_current(epoch) {
                    continue;
                }
                warn!(session_id = %inner.id, sequence, error = %reason, "Response failed");
                inner.advance_from(
                    epoch,
                    ConnectionState::Processing,
                    ConnectionState::Ready,
                    Some(format!("Response failed: {reason}")),
                );
                inner.publish(SessionEvent::ResponseFailed { sequence, reason });
            }
            ChannelSignal::Closed => {
                let state = inner.state();
                if inner.is_current(epoch)
                    && (state.is_connected() || state == ConnectionState::Error)
                {
                    info!(session_id = %inner.id, "Data channel closed, tearing down session");
                    inner
                        .teardown(Some(epoch), Some("Data channel closed".to_string()))
                        .await;
                }
                break;
            }
            ChannelSignal::Error(reason) => {
                if inner.is_current(epoch) {
                    inner.publish(SessionEvent::ChannelError(reason.clone()));
                    let _ = inner.advance(
                        epoch,
                        ConnectionState::Error,
                        Some(format!("Data channel error: {reason}")),
                    );
                }
            }
            ChannelSignal::Opened | ChannelSignal::Ignored => {}
        }
    }
    debug!(epoch, "Event pump stopped");
}
