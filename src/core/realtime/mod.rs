//! Realtime session protocol.
//!
//! This module covers the connection to the realtime inference service:
//!
//! - [`TransportNegotiator`]: builds the peer transport and runs the SDP
//!   offer/answer exchange authenticated with an ephemeral credential.
//! - [`EventChannel`]: the data channel state machine, `response.create`
//!   framing and `text.partial`/`text.final` dispatch.
//! - [`ConnectionState`] and [`SessionEvent`]: what a session publishes.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_session::core::realtime::{EventChannel, Instruction, Modality};
//!
//! let channel = EventChannel::new(data_channel, Modality::defaults());
//! channel.wait_open(Duration::from_secs(10)).await?;
//!
//! let sequence = channel
//!     .send(&Instruction::new("Who won?", context, directive))
//!     .await?;
//! ```

pub mod base;
pub mod channel;
pub mod config;
pub mod messages;
pub mod negotiator;

pub use base::{ConnectionState, SessionEvent, StreamedText};
pub use channel::{ChannelSignal, ChannelState, EventChannel};
pub use config::{
    DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, Modality,
    SDP_CONTENT_TYPE, parse_modalities,
};
pub use messages::{ApiError, ClientEvent, Instruction, ResponseConfig, ServerEvent, TextContent};
pub use negotiator::{SessionResources, TransportNegotiator};
