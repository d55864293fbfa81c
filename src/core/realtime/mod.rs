//! Realtime protocol client.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz, base64-encoded on the wire
//! in both directions.
//!
//! # Architecture
//!
//! - [`catalog`]: endpoint constants, models and voices
//! - [`messages`]: client and server event types
//! - [`transport`]: WebSocket connection and the [`TransportHandler`] seam
//! - [`router`]: inbound dispatch, turn signals and audio reassembly

pub mod catalog;
pub mod messages;
pub mod router;
pub mod transport;

pub use catalog::{
    Modality, PCM16_FORMAT, REALTIME_PROTOCOL_VERSION, REALTIME_SAMPLE_RATE, REALTIME_URL,
    RealtimeModel, RealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ConversationItem, EventKind, InputAudioTranscription, ResponseInfo,
    ServerEvent, SessionConfig, SessionInfo, TurnDetection,
};
pub use router::{
    ConversationEvent, DEFAULT_FLUSH_THRESHOLD_BYTES, EventRouter, RouterStats, TranscriptRole,
};
pub use transport::{
    ConnectOptions, OUTBOUND_CHANNEL_CAPACITY, OutboundSender, TransportHandler, TransportSession,
};
