pub mod audio;
pub mod realtime;
pub mod session;
pub mod turn;

// Re-export commonly used types for convenience
pub use audio::{AudioFormat, AudioSink, AudioSource, CaptureDevice, PlaybackDevice};

pub use realtime::{
    ClientEvent, ConnectOptions, ConversationEvent, EventKind, EventRouter, OutboundSender,
    RealtimeModel, RealtimeVoice, ServerEvent, SessionConfig, TranscriptRole, TransportHandler,
    TransportSession,
};

pub use session::{Session, SessionSettings, SessionSummary, VoiceSession};

pub use turn::{GateWait, TurnController, TurnGate, TurnState};
