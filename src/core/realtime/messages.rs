//! Realtime protocol message types.
//!
//! Every message is a JSON object carrying a `type` discriminator, sent as a
//! WebSocket text frame.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Negotiate session options (once per connection)
//! - input_audio_buffer.append - Append a captured audio frame
//! - response.create - Ask the assistant to speak
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / input_audio_buffer.speech_stopped
//! - conversation.item.created
//! - conversation.item.input_audio_transcription.completed
//! - response.audio.delta / response.audio.done
//! - response.audio_transcript.done
//! - response.done
//! - error
//!
//! Any other `type` decodes to [`ServerEvent::Unhandled`] so newer protocol
//! revisions never break the client.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::catalog::{Modality, PCM16_FORMAT, RealtimeVoice};
use crate::errors::{ClientError, ClientResult};

// =============================================================================
// Session Configuration
// =============================================================================

/// Options negotiated once per connection through `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    /// Response modalities
    pub modalities: Vec<Modality>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    pub voice: RealtimeVoice,

    /// Input audio format
    pub input_audio_format: String,

    /// Output audio format
    pub output_audio_format: String,

    /// Server-side turn detection. `None` serializes as `null`, which turns
    /// server VAD off rather than leaving the server default in place.
    pub turn_detection: Option<TurnDetection>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl SessionConfig {
    /// Session options with the fixed PCM16 audio format on both directions.
    pub fn pcm16(voice: RealtimeVoice) -> Self {
        Self {
            modalities: vec![Modality::Audio, Modality::Text],
            instructions: None,
            voice,
            input_audio_format: PCM16_FORMAT.to_string(),
            output_audio_format: PCM16_FORMAT.to_string(),
            turn_detection: Some(TurnDetection::default()),
            input_audio_transcription: None,
            temperature: None,
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0-1.0)
        threshold: f32,
        /// Audio kept before detected speech, in ms
        prefix_padding_ms: u32,
        /// Silence that ends a turn, in ms
        silence_duration_ms: u32,
    },
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 600,
        }
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Ask the assistant to produce a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Create an audio append event from a raw PCM frame.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ResponseCreate => "response.create",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the realtime service.
///
/// Only `type` and the payload-bearing fields are required; bookkeeping ids
/// are optional so that minimal envelopes still decode.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error reported by the service
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Session updated (acknowledges `session.update`)
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Server VAD detected the start of speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        audio_start_ms: Option<u64>,
        item_id: Option<String>,
    },

    /// Server VAD detected the end of speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        audio_end_ms: Option<u64>,
        item_id: Option<String>,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: ConversationItem,
    },

    /// Transcript of the user's audio
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        item_id: Option<String>,
        transcript: String,
    },

    /// Transcript of the assistant's audio
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        response_id: Option<String>,
        item_id: Option<String>,
        transcript: String,
    },

    /// Audio data chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        response_id: Option<String>,
        item_id: Option<String>,
        /// Base64-encoded PCM16 fragment
        delta: String,
    },

    /// Audio for the current response is complete
    #[serde(rename = "response.audio.done")]
    AudioDone {
        response_id: Option<String>,
        item_id: Option<String>,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    /// Any event type this client does not act on
    #[serde(other)]
    Unhandled,
}

/// Envelope used to recover the `type` of an unhandled event for logging.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
}

impl ServerEvent {
    /// Decode one inbound text message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProtocolDecode`] for malformed JSON, a missing
    /// `type`, or a known type with missing payload fields.
    pub fn parse(raw: &str) -> ClientResult<Self> {
        serde_json::from_str(raw).map_err(ClientError::from)
    }

    /// Extract the raw `type` string of a message, if it has one.
    pub fn peek_type(raw: &str) -> Option<String> {
        serde_json::from_str::<EventEnvelope>(raw)
            .ok()
            .map(|e| e.event_type)
    }

    /// Decode base64 audio from an AudioDelta payload.
    pub fn decode_audio_delta(delta: &str) -> ClientResult<Vec<u8>> {
        BASE64_STANDARD.decode(delta).map_err(ClientError::from)
    }

    /// The kind of event, as dispatched by the router.
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Error { .. } => EventKind::Error,
            ServerEvent::SessionCreated { .. } => EventKind::SessionCreated,
            ServerEvent::SessionUpdated { .. } => EventKind::SessionUpdated,
            ServerEvent::SpeechStarted { .. } => EventKind::SpeechStarted,
            ServerEvent::SpeechStopped { .. } => EventKind::SpeechStopped,
            ServerEvent::ConversationItemCreated { .. } => EventKind::ConversationItemCreated,
            ServerEvent::InputTranscriptionCompleted { .. }
            | ServerEvent::AudioTranscriptDone { .. } => EventKind::Transcript,
            ServerEvent::AudioDelta { .. } => EventKind::AudioDelta,
            ServerEvent::AudioDone { .. } => EventKind::AudioDone,
            ServerEvent::ResponseDone { .. } => EventKind::ResponseDone,
            ServerEvent::Unhandled => EventKind::Unhandled,
        }
    }
}

/// Kinds of inbound events the router dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AudioDelta,
    AudioDone,
    SpeechStarted,
    SpeechStopped,
    ResponseDone,
    ConversationItemCreated,
    SessionCreated,
    SessionUpdated,
    Transcript,
    Error,
    Unhandled,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information echoed by the service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    pub id: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Conversation item summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationItem {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

/// Response summary carried by `response.done`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    pub id: Option<String>,
    pub status: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
