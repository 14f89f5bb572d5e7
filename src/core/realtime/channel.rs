//! Event channel over the transport's data channel.
//!
//! Tracks the Closed → Open → Closing → Closed lifecycle, frames instructions
//! as `response.create` events, and turns inbound `text.partial`/`text.final`
//! messages into [`StreamedText`]. A service `error` event fails the response
//! in flight.
//!
//! The wire protocol does not say which instruction a text event answers. Each
//! `send` arms a `(sequence, partial buffer)` slot and inbound text is attributed
//! to the armed slot. A final event clears the slot, so text arriving after it
//! (or before any instruction) is dropped instead of leaking into the next answer.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::base::StreamedText;
use super::config::Modality;
use super::messages::{ClientEvent, Instruction, ServerEvent};
use crate::core::transport::{ChannelEvent, DataChannel};
use crate::errors::{SessionError, SessionResult};

/// Lifecycle state of the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Closed,
    Open,
    Closing,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Closed => write!(f, "Closed"),
            ChannelState::Open => write!(f, "Open"),
            ChannelState::Closing => write!(f, "Closing"),
        }
    }
}

/// What a transport channel event meant for the owner of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Opened,
    Closed,
    /// Transport-level error; the channel state is left untouched
    Error(String),
    Text(StreamedText),
    /// The service rejected the in-flight response; no final text will follow
    ResponseFailed { sequence: u64, reason: String },
    /// Nothing to act on (malformed, unknown, or unattributable message)
    Ignored,
}

#[derive(Debug)]
struct PendingResponse {
    sequence: u64,
    partial: String,
}

pub struct EventChannel {
    channel: Arc<dyn DataChannel>,
    modalities: Vec<Modality>,
    state: watch::Sender<ChannelState>,
    /// Set once the channel can never (re)open: closed locally or by the remote
    terminated: AtomicBool,
    released: AtomicBool,
    pending: Mutex<Option<PendingResponse>>,
    sequence: AtomicU64,
}

impl EventChannel {
    pub fn new(channel: Arc<dyn DataChannel>, modalities: Vec<Modality>) -> Self {
        let (state, _) = watch::channel(ChannelState::Closed);
        Self {
            channel,
            modalities,
            state,
            terminated: AtomicBool::new(false),
            released: AtomicBool::new(false),
            pending: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        self.channel.label()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Sequence number of the response currently being streamed, if any.
    pub fn pending_sequence(&self) -> Option<u64> {
        self.pending.lock().as_ref().map(|p| p.sequence)
    }

    /// Latest partial text of the in-flight response.
    pub fn pending_partial(&self) -> Option<String> {
        self.pending.lock().as_ref().map(|p| p.partial.clone())
    }

    /// Apply a transport channel event.
    pub fn handle_transport_event(&self, event: ChannelEvent) -> ChannelSignal {
        match event {
            ChannelEvent::Open => {
                if self.terminated.load(Ordering::SeqCst) {
                    debug!(label = %self.label(), "Ignoring open event on a terminated channel");
                    return ChannelSignal::Ignored;
                }
                self.state.send_replace(ChannelState::Open);
                debug!(label = %self.label(), "Event channel open");
                ChannelSignal::Opened
            }
            ChannelEvent::Close => {
                self.terminated.store(true, Ordering::SeqCst);
                self.pending.lock().take();
                self.state.send_replace(ChannelState::Closed);
                debug!(label = %self.label(), "Event channel closed");
                ChannelSignal::Closed
            }
            ChannelEvent::Error(reason) => {
                warn!(label = %self.label(), error = %reason, "Event channel error");
                ChannelSignal::Error(reason)
            }
            ChannelEvent::Message(raw) => self.on_message(&raw),
        }
    }

    /// Parse and dispatch one inbound message.
    ///
    /// Malformed messages, unhandled kinds and text that cannot be attributed
    /// to a response come back as [`ChannelSignal::Ignored`].
    pub fn on_message(&self, raw: &str) -> ChannelSignal {
        let event = match ServerEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                let err = SessionError::MessageParse(e.to_string());
                warn!(error = %err, len = raw.len(), "Dropping malformed data channel message");
                return ChannelSignal::Ignored;
            }
        };

        match event {
            ServerEvent::TextPartial { text } => {
                let mut pending = self.pending.lock();
                let Some(slot) = pending.as_mut() else {
                    debug!("Dropping partial text with no response in flight");
                    return ChannelSignal::Ignored;
                };
                slot.partial.clone_from(&text.content);
                trace!(sequence = slot.sequence, len = text.content.len(), "Partial text");
                ChannelSignal::Text(StreamedText {
                    sequence: slot.sequence,
                    content: text.content,
                    is_final: false,
                })
            }
            ServerEvent::TextFinal { text } => {
                let Some(slot) = self.pending.lock().take() else {
                    debug!("Dropping final text with no response in flight");
                    return ChannelSignal::Ignored;
                };
                debug!(sequence = slot.sequence, "Response complete");
                ChannelSignal::Text(StreamedText {
                    sequence: slot.sequence,
                    content: text.content,
                    is_final: true,
                })
            }
            ServerEvent::Error { error } => {
                warn!(
                    error_type = ?error.error_type,
                    code = ?error.code,
                    message = ?error.message,
                    "Realtime service reported an error"
                );
                match self.pending.lock().take() {
                    Some(slot) => ChannelSignal::ResponseFailed {
                        sequence: slot.sequence,
                        reason: error
                            .message
                            .or(error.code)
                            .or(error.error_type)
                            .unwrap_or_else(|| "unknown error".to_string()),
                    },
                    None => ChannelSignal::Ignored,
                }
            }
            ServerEvent::Unknown => {
                trace!("Ignoring unhandled server event");
                ChannelSignal::Ignored
            }
        }
    }

    /// Frame and transmit an instruction as a single `response.create` event.
    ///
    /// Fails with [`SessionError::ChannelNotOpen`] unless the channel is open;
    /// nothing is transmitted in that case. Returns the sequence number the
    /// response text will carry.
    pub async fn send(&self, instruction: &Instruction) -> SessionResult<u64> {
        if !self.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }

        let payload = ClientEvent::response_create(instruction, &self.modalities)
            .to_json()
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        // The slot is armed before transmitting so text arriving right after
        // the send is attributed correctly.
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let superseded = self.pending.lock().replace(PendingResponse {
            sequence,
            partial: String::new(),
        });
        if let Some(previous) = superseded {
            warn!(
                previous = previous.sequence,
                sequence, "Superseding a response that never finished"
            );
        }

        if let Err(e) = self.channel.send_text(payload).await {
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(|p| p.sequence == sequence) {
                pending.take();
            }
            return Err(e.into());
        }

        debug!(sequence, label = %self.label(), "Instruction sent");
        Ok(sequence)
    }

    /// Wait until the channel opens.
    ///
    /// Fails early if the channel is closed before it ever opens.
    pub async fn wait_open(&self, timeout: Duration) -> SessionResult<()> {
        let mut state = self.state.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            state.wait_for(|s| *s == ChannelState::Open || self.terminated.load(Ordering::SeqCst)),
        )
        .await;

        match waited {
            Err(_) => Err(SessionError::Timeout(format!(
                "data channel '{}' did not open within {:?}",
                self.label(),
                timeout
            ))),
            Ok(Err(_)) => Err(SessionError::Negotiation(
                "event channel state was dropped".to_string(),
            )),
            Ok(Ok(_)) if self.is_open() => Ok(()),
            Ok(Ok(_)) => Err(SessionError::Negotiation(format!(
                "data channel '{}' closed before opening",
                self.label()
            ))),
        }
    }

    /// Close the channel. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.terminated.store(true, Ordering::SeqCst);
        self.state.send_replace(ChannelState::Closing);
        self.pending.lock().take();
        if let Err(e) = self.channel.close().await {
            warn!(label = %self.label(), error = %e, "Failed to close data channel");
        }
        self.state.send_replace(ChannelState::Closed);
        debug!(label = %self.label(), "Event channel closed locally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{
        MemoryDataChannel, MemoryTransportFactory, PeerTransport, SessionDescription,
        TransportFactory,
    };
    use tokio::sync::mpsc;

    struct Harness {
        channel: EventChannel,
        remote: Arc<MemoryDataChannel>,
        _events: mpsc::Receiver<ChannelEvent>,
    }

    async fn harness() -> Harness {
        let factory = MemoryTransportFactory::new();
        let transport = factory.create().await.unwrap();
        let handle = transport.create_data_channel("oai-events").await.unwrap();
        transport
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        let remote = factory.last().unwrap().channel().unwrap();
        Harness {
            channel: EventChannel::new(handle.channel, Modality::defaults()),
            remote,
            _events: handle.events,
        }
    }

    fn instruction() -> Instruction {
        Instruction::new("What is the weather?", "fallback", "Answer briefly.")
    }

    fn partial(content: &str) -> String {
        format!(r#"{{"type":"text.partial","text":{{"content":"{content}"}}}}"#)
    }

    fn final_text(content: &str) -> String {
        format!(r#"{{"type":"text.final","text":{{"content":"{content}"}}}}"#)
    }

    fn text(signal: ChannelSignal) -> StreamedText {
        match signal {
            ChannelSignal::Text(text) => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_before_open_fails_without_transmitting() {
        let h = harness().await;
        assert_eq!(h.channel.state(), ChannelState::Closed);

        let result = h.channel.send(&instruction()).await;
        assert!(matches!(result, Err(SessionError::ChannelNotOpen)));
        assert!(h.remote.sent().is_empty());
        assert!(h.channel.pending_sequence().is_none());
    }

    #[tokio::test]
    async fn test_send_frames_response_create() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);

        let sequence = h.channel.send(&instruction()).await.unwrap();
        assert_eq!(sequence, 1);

        let sent = h.remote.sent();
        assert_eq!(sent.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(value["type"], "response.create");
        assert_eq!(value["response"]["instructions"], instruction().text());
    }

    #[tokio::test]
    async fn test_partial_then_final_ordering() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        let sequence = h.channel.send(&instruction()).await.unwrap();

        let p1 = text(h.channel.on_message(&partial("Sun")));
        let p2 = text(h.channel.on_message(&partial("Sunny")));
        let f = text(h.channel.on_message(&final_text("Sunny today")));

        assert_eq!((p1.content.as_str(), p1.is_final), ("Sun", false));
        assert_eq!((p2.content.as_str(), p2.is_final), ("Sunny", false));
        assert_eq!((f.content.as_str(), f.is_final), ("Sunny today", true));
        assert!([p1.sequence, p2.sequence, f.sequence]
            .iter()
            .all(|s| *s == sequence));

        // Nothing after the final event until the next instruction
        assert_eq!(h.channel.on_message(&partial("late")), ChannelSignal::Ignored);
        assert_eq!(h.channel.on_message(&final_text("late")), ChannelSignal::Ignored);
    }

    #[tokio::test]
    async fn test_partial_replaces_buffer() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        h.channel.send(&instruction()).await.unwrap();

        h.channel.on_message(&partial("It is"));
        h.channel.on_message(&partial("It is raining"));
        assert_eq!(h.channel.pending_partial().as_deref(), Some("It is raining"));
    }

    #[tokio::test]
    async fn test_malformed_message_changes_nothing() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        h.channel.send(&instruction()).await.unwrap();

        let signal = h
            .channel
            .handle_transport_event(ChannelEvent::Message("{not json".to_string()));
        assert_eq!(signal, ChannelSignal::Ignored);
        assert_eq!(h.channel.state(), ChannelState::Open);
        assert_eq!(h.channel.pending_sequence(), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        h.channel.send(&instruction()).await.unwrap();

        assert_eq!(
            h.channel
                .on_message(r#"{"type":"response.done","response":{}}"#),
            ChannelSignal::Ignored
        );
        assert_eq!(h.channel.pending_sequence(), Some(1));
    }

    #[tokio::test]
    async fn test_error_event_fails_pending_response() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        let sequence = h.channel.send(&instruction()).await.unwrap();
        h.channel.on_message(&partial("Half"));

        let signal = h.channel.on_message(
            r#"{"type":"error","error":{"type":"server_error","message":"response failed"}}"#,
        );
        assert_eq!(
            signal,
            ChannelSignal::ResponseFailed {
                sequence,
                reason: "response failed".to_string(),
            }
        );
        assert!(h.channel.pending_sequence().is_none());

        // The failed response cannot be completed afterwards
        assert_eq!(h.channel.on_message(&final_text("late")), ChannelSignal::Ignored);
    }

    #[tokio::test]
    async fn test_error_event_without_pending_response_is_ignored() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);

        assert_eq!(
            h.channel
                .on_message(r#"{"type":"error","error":{"message":"boom"}}"#),
            ChannelSignal::Ignored
        );
        assert_eq!(h.channel.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn test_text_without_instruction_is_dropped() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        assert_eq!(h.channel.on_message(&partial("stray")), ChannelSignal::Ignored);
        assert_eq!(h.channel.on_message(&final_text("stray")), ChannelSignal::Ignored);
    }

    #[tokio::test]
    async fn test_failed_send_disarms_slot() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        h.remote.set_fail_sends(true);

        let result = h.channel.send(&instruction()).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(h.channel.pending_sequence().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_change_state() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);

        let signal = h
            .channel
            .handle_transport_event(ChannelEvent::Error("sctp failure".to_string()));
        assert_eq!(signal, ChannelSignal::Error("sctp failure".to_string()));
        assert_eq!(h.channel.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn test_remote_close_clears_pending_response() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);
        h.channel.send(&instruction()).await.unwrap();

        assert_eq!(
            h.channel.handle_transport_event(ChannelEvent::Close),
            ChannelSignal::Closed
        );
        assert_eq!(h.channel.state(), ChannelState::Closed);
        assert!(h.channel.pending_sequence().is_none());

        // A late open must not resurrect the channel
        assert_eq!(
            h.channel.handle_transport_event(ChannelEvent::Open),
            ChannelSignal::Ignored
        );
        assert!(!h.channel.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = harness().await;
        h.channel.handle_transport_event(ChannelEvent::Open);

        h.channel.close().await;
        h.channel.close().await;
        assert_eq!(h.channel.state(), ChannelState::Closed);
        assert!(h.remote.is_closed());
        assert!(matches!(
            h.channel.send(&instruction()).await,
            Err(SessionError::ChannelNotOpen)
        ));
    }

    #[tokio::test]
    async fn test_wait_open() {
        let h = harness().await;
        let channel = Arc::new(h.channel);

        let opener = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            opener.handle_transport_event(ChannelEvent::Open);
        });

        channel.wait_open(Duration::from_secs(2)).await.unwrap();
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_wait_open_fails_when_closed_first() {
        let h = harness().await;
        let channel = Arc::new(h.channel);

        let closer = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close().await;
        });

        let result = channel.wait_open(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SessionError::Negotiation(_))));
    }

    #[tokio::test]
    async fn test_wait_open_times_out() {
        let h = harness().await;
        let result = h.channel.wait_open(Duration::from_millis(30)).await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }
}
