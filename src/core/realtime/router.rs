//! Inbound event dispatch.
//!
//! The router decodes every inbound text message, drives the turn state and
//! reassembles streamed audio before handing it to playback. It runs on the
//! transport's receive flow only, so the pending audio buffer is never shared.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::{ApiError, EventKind, ServerEvent};
use crate::core::audio::{AudioSink, PlaybackStats};
use crate::core::turn::{TurnController, TurnGate, TurnState};

/// Default playback batch size: 100 ms of 24 kHz mono PCM16.
pub const DEFAULT_FLUSH_THRESHOLD_BYTES: usize = 4800;

/// Speaker of a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Conversation-level notifications for an observer.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// The service assigned a session id
    SessionCreated { session_id: Option<String> },
    /// A conversation item was added
    ItemCreated {
        item_id: Option<String>,
        role: Option<String>,
    },
    /// Completed transcript for one side of the conversation
    Transcript { role: TranscriptRole, text: String },
    /// A response finished
    ResponseDone {
        response_id: Option<String>,
        status: Option<String>,
    },
    /// The service reported an error
    ServerError(ApiError),
}

/// Inbound traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub messages: u64,
    pub decode_errors: u64,
    pub unhandled: u64,
    pub audio_bytes_received: u64,
    pub flushes: u64,
    pub responses_completed: u64,
}

/// Decodes inbound messages and dispatches them.
pub struct EventRouter {
    turn: TurnController,
    sink: AudioSink,
    pending: BytesMut,
    flush_threshold: usize,
    observer: Option<mpsc::UnboundedSender<ConversationEvent>>,
    remote_session_id: Option<String>,
    stats: RouterStats,
}

impl EventRouter {
    /// Create a router that plays reassembled audio through `sink`.
    ///
    /// A `flush_threshold` of 0 forwards every fragment as it arrives.
    pub fn new(turn: TurnController, sink: AudioSink, flush_threshold: usize) -> Self {
        Self {
            turn,
            sink,
            pending: BytesMut::with_capacity(flush_threshold.max(1)),
            flush_threshold,
            observer: None,
            remote_session_id: None,
            stats: RouterStats::default(),
        }
    }

    /// Forward conversation events to `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<ConversationEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Reader handle on the turn state.
    pub fn gate(&self) -> Arc<TurnGate> {
        self.turn.gate()
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.state()
    }

    /// The session is configured and capture may begin.
    pub fn mark_ready(&self) {
        self.turn.mark_ready();
    }

    /// Return the turn state to idle after a failure or stop.
    pub fn reset(&self) {
        self.turn.reset();
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn playback_stats(&self) -> Arc<PlaybackStats> {
        self.sink.stats()
    }

    /// Whether playback gave up after repeated device failures.
    pub fn playback_failed(&self) -> bool {
        self.sink.has_failed()
    }

    /// Session id reported by the service, once known.
    pub fn remote_session_id(&self) -> Option<&str> {
        self.remote_session_id.as_deref()
    }

    /// Bytes waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle one inbound text message.
    ///
    /// Returns the kind of event dispatched, or `None` if the message could
    /// not be decoded. Decode failures are logged and the message dropped.
    pub fn handle(&mut self, raw: &str) -> Option<EventKind> {
        self.stats.messages += 1;

        let event = match ServerEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("discarding inbound message: {e}");
                return None;
            }
        };
        let kind = event.kind();

        match event {
            ServerEvent::AudioDelta { delta, .. } => {
                let bytes = match ServerEvent::decode_audio_delta(&delta) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        warn!("discarding audio delta: {e}");
                        return None;
                    }
                };
                self.stats.audio_bytes_received += bytes.len() as u64;
                self.pending.extend_from_slice(&bytes);
                if self.pending.len() >= self.flush_threshold {
                    self.flush();
                }
            }
            ServerEvent::AudioDone { .. } => {
                self.flush();
            }
            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                debug!(?audio_start_ms, "remote speech started");
                self.turn.speech_started();
            }
            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                debug!(?audio_end_ms, "remote speech stopped");
                self.turn.speech_stopped();
            }
            ServerEvent::ResponseDone { response } => {
                self.flush();
                self.turn.response_done();
                self.stats.responses_completed += 1;
                debug!(
                    response_id = ?response.id,
                    status = ?response.status,
                    "response done"
                );
                self.notify(ConversationEvent::ResponseDone {
                    response_id: response.id,
                    status: response.status,
                });
            }
            ServerEvent::ConversationItemCreated { item } => {
                debug!(item_id = ?item.id, role = ?item.role, "conversation item created");
                self.notify(ConversationEvent::ItemCreated {
                    item_id: item.id,
                    role: item.role,
                });
            }
            ServerEvent::SessionCreated { session } => {
                info!(
                    "realtime session created: {}",
                    session.id.as_deref().unwrap_or("<unknown>")
                );
                self.remote_session_id = session.id.clone();
                self.notify(ConversationEvent::SessionCreated {
                    session_id: session.id,
                });
            }
            ServerEvent::SessionUpdated { .. } => {
                debug!("session configuration acknowledged");
            }
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                self.notify(ConversationEvent::Transcript {
                    role: TranscriptRole::User,
                    text: transcript,
                });
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.notify(ConversationEvent::Transcript {
                    role: TranscriptRole::Assistant,
                    text: transcript,
                });
            }
            ServerEvent::Error { error } => {
                error!(
                    "realtime service error ({}): {}",
                    error.error_type, error.message
                );
                self.notify(ConversationEvent::ServerError(error));
            }
            ServerEvent::Unhandled => {
                self.stats.unhandled += 1;
                debug!(
                    "ignoring event type {}",
                    ServerEvent::peek_type(raw).as_deref().unwrap_or("<none>")
                );
            }
        }

        Some(kind)
    }

    /// Hand everything pending to playback.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let buffer = self.pending.split().freeze();
        let len = buffer.len();
        match self.sink.write(buffer) {
            Ok(()) => {
                self.stats.flushes += 1;
                debug!(bytes = len, "flushed audio to playback");
            }
            Err(e) => warn!("dropping {len} bytes of audio: {e}"),
        }
    }

    /// Flush what is pending and release playback.
    pub async fn shutdown(&mut self, drain: bool) {
        self.flush();
        self.sink.shutdown(drain).await;
    }

    fn notify(&self, event: ConversationEvent) {
        if let Some(observer) = &self.observer {
            // The observer going away never affects the session
            let _ = observer.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{AudioFormat, PlaybackDevice};
    use crate::errors::ClientResult;
    use base64::prelude::*;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Recording(Arc<Mutex<Vec<Vec<u8>>>>);

    impl PlaybackDevice for Recording {
        fn open(&mut self, _format: &AudioFormat) -> ClientResult<()> {
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> ClientResult<()> {
            self.0.lock().push(bytes.to_vec());
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn router(threshold: usize) -> (EventRouter, Arc<Mutex<Vec<Vec<u8>>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = AudioSink::spawn(
            Box::new(Recording(Arc::clone(&writes))),
            AudioFormat::default(),
            CancellationToken::new(),
        )
        .unwrap();
        (EventRouter::new(TurnController::new(), sink, threshold), writes)
    }

    fn delta(bytes: &[u8]) -> String {
        serde_json::json!({
            "type": "response.audio.delta",
            "delta": BASE64_STANDARD.encode(bytes),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_scenario_speech_then_response() {
        let (mut router, writes) = router(DEFAULT_FLUSH_THRESHOLD_BYTES);
        router.mark_ready();
        assert_eq!(router.turn_state(), TurnState::Listening);

        assert_eq!(
            router.handle(r#"{"type":"input_audio_buffer.speech_started"}"#),
            Some(EventKind::SpeechStarted)
        );
        assert_eq!(router.turn_state(), TurnState::Blocked);

        assert_eq!(
            router.handle(r#"{"type":"response.done"}"#),
            Some(EventKind::ResponseDone)
        );
        assert_eq!(router.turn_state(), TurnState::Listening);

        router.shutdown(true).await;
        assert!(writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_fragments_flush_on_audio_done() {
        let (mut router, writes) = router(DEFAULT_FLUSH_THRESHOLD_BYTES);
        router.mark_ready();

        router.handle(&delta(&[0x01, 0x02, 0x03, 0x04]));
        router.handle(&delta(&[0x05, 0x06, 0x07, 0x08]));
        assert_eq!(router.pending_len(), 8);

        assert_eq!(
            router.handle(r#"{"type":"response.audio.done"}"#),
            Some(EventKind::AudioDone)
        );
        assert_eq!(router.pending_len(), 0);
        router.shutdown(true).await;

        let writes = writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_threshold_flushes_preserve_every_byte_in_order() {
        let (mut router, writes) = router(10);
        let mut expected = Vec::new();
        for i in 0..37u8 {
            let fragment = vec![i; (i as usize % 5) + 1];
            expected.extend_from_slice(&fragment);
            router.handle(&delta(&fragment));
        }
        router.handle(r#"{"type":"response.audio.done"}"#);
        router.shutdown(true).await;

        let writes = writes.lock();
        assert!(writes.len() > 1);
        assert_eq!(writes.concat(), expected);
    }

    #[tokio::test]
    async fn test_zero_threshold_flushes_every_fragment() {
        let (mut router, writes) = router(0);
        router.handle(&delta(&[1, 2]));
        router.handle(&delta(&[3, 4]));
        router.shutdown(true).await;
        assert_eq!(*writes.lock(), vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn test_response_done_flushes_without_audio_done() {
        let (mut router, writes) = router(DEFAULT_FLUSH_THRESHOLD_BYTES);
        router.handle(&delta(&[9, 9]));
        router.handle(r#"{"type":"response.done"}"#);
        assert_eq!(router.pending_len(), 0);
        router.shutdown(true).await;
        assert_eq!(*writes.lock(), vec![vec![9, 9]]);
    }

    #[tokio::test]
    async fn test_unknown_types_are_inert() {
        let (mut router, _) = router(DEFAULT_FLUSH_THRESHOLD_BYTES);
        router.mark_ready();
        router.handle(r#"{"type":"input_audio_buffer.speech_started"}"#);

        assert_eq!(
            router.handle(r#"{"type":"rate_limits.updated"}"#),
            Some(EventKind::Unhandled)
        );
        assert_eq!(router.turn_state(), TurnState::Blocked);
        assert_eq!(router.stats().unhandled, 1);
        router.shutdown(false).await;
    }

    #[tokio::test]
    async fn test_malformed_messages_are_discarded() {
        let (mut router, writes) = router(0);
        router.mark_ready();

        assert_eq!(router.handle("{not json"), None);
        assert_eq!(router.handle(r#"{"delta":"AAAA"}"#), None);
        assert_eq!(
            router.handle(r#"{"type":"response.audio.delta","delta":"@@@"}"#),
            None
        );
        assert_eq!(router.stats().decode_errors, 3);
        assert_eq!(router.turn_state(), TurnState::Listening);

        // The session keeps going
        router.handle(&delta(&[7]));
        router.shutdown(true).await;
        assert_eq!(*writes.lock(), vec![vec![7]]);
    }

    #[tokio::test]
    async fn test_observer_receives_conversation_events() {
        let (router, _) = router(DEFAULT_FLUSH_THRESHOLD_BYTES);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut router = router.with_observer(tx);

        router.handle(r#"{"type":"session.created","session":{"id":"sess_1"}}"#);
        router.handle(
            r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"i1","transcript":"hello"}"#,
        );
        router.handle(r#"{"type":"response.audio_transcript.done","transcript":"hi there"}"#);
        router.handle(r#"{"type":"error","error":{"type":"server_error","message":"boom"}}"#);
        router.handle(r#"{"type":"response.done","response":{"id":"r1","status":"completed"}}"#);
        router.shutdown(false).await;

        assert_eq!(router.remote_session_id(), Some("sess_1"));
        match rx.recv().await.unwrap() {
            ConversationEvent::SessionCreated { session_id } => {
                assert_eq!(session_id.as_deref(), Some("sess_1"))
            }
            other => panic!("Expected SessionCreated, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ConversationEvent::Transcript { role, text } => {
                assert_eq!(role, TranscriptRole::User);
                assert_eq!(text, "hello");
            }
            other => panic!("Expected user transcript, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ConversationEvent::Transcript { role, .. } => {
                assert_eq!(role, TranscriptRole::Assistant)
            }
            other => panic!("Expected assistant transcript, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ConversationEvent::ServerError(error) => assert_eq!(error.message, "boom"),
            other => panic!("Expected ServerError, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ConversationEvent::ResponseDone { status, .. } => {
                assert_eq!(status.as_deref(), Some("completed"))
            }
            other => panic!("Expected ResponseDone, got {other:?}"),
        }
        assert_eq!(router.stats().responses_completed, 1);
    }
}
