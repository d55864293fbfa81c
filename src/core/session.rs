//! Session orchestration.
//!
//! A [`VoiceSession`] wires the three flows of a conversation together for
//! exactly one connection:
//!
//! - the capture worker reads frames and forwards them while the turn gate is
//!   open
//! - the transport task dispatches inbound messages to the [`EventRouter`]
//! - the playback worker renders reassembled audio
//!
//! They share nothing but the turn gate and the outbound channel. Teardown
//! always runs in the same order: stop the gate, join the capture worker
//! (capture device released), flush and shut down playback (playback device
//! released), then close the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::audio::{AudioFormat, AudioSink, AudioSource, CaptureDevice, PlaybackDevice};
use crate::core::realtime::{
    ClientEvent, ConnectOptions, ConversationEvent, DEFAULT_FLUSH_THRESHOLD_BYTES, EventRouter,
    OutboundSender, SessionConfig, TransportHandler, TransportSession,
};
use crate::core::turn::{GateWait, TurnController, TurnGate};
use crate::errors::{ClientError, ClientResult};

/// Consecutive capture failures tolerated before the session ends.
pub const MAX_CAPTURE_FAILURES: u32 = 3;

/// Pause between capture restart attempts.
const CAPTURE_RESTART_DELAY: Duration = Duration::from_millis(200);

/// Per-connection state.
///
/// Built fresh for every connection attempt and never shared.
#[derive(Debug, Clone)]
pub struct Session {
    /// Local identifier
    pub id: Uuid,
    /// Options sent in `session.update`
    pub config: SessionConfig,
    /// Id assigned by the service in `session.created`
    pub remote_id: Option<String>,
    /// When the socket opened
    pub opened_at: Option<SystemTime>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            remote_id: None,
            opened_at: None,
        }
    }
}

/// Knobs that shape a session beyond the negotiated options.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Negotiated options
    pub config: SessionConfig,
    /// Ask the assistant to speak first
    pub greeting: bool,
    /// Playback batch size in bytes; 0 plays every fragment as it arrives
    pub flush_threshold_bytes: usize,
    /// Capture and playback format
    pub format: AudioFormat,
}

impl SessionSettings {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            greeting: true,
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD_BYTES,
            format: AudioFormat::default(),
        }
    }
}

/// What happened during a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub remote_session_id: Option<String>,
    pub duration: Duration,
    /// Frames read from the capture device
    pub frames_captured: u64,
    /// Frames sent to the service
    pub frames_forwarded: u64,
    /// Frames dropped because the remote party had the floor
    pub frames_suppressed: u64,
    /// Bytes rendered by the playback device
    pub bytes_played: u64,
    pub responses_completed: u64,
}

#[derive(Debug, Default)]
struct CaptureStats {
    captured: AtomicU64,
    forwarded: AtomicU64,
    suppressed: AtomicU64,
}

/// One voice conversation over one connection.
pub struct VoiceSession {
    settings: SessionSettings,
    capture: Box<dyn CaptureDevice>,
    playback: Box<dyn PlaybackDevice>,
    observer: Option<mpsc::UnboundedSender<ConversationEvent>>,
}

impl VoiceSession {
    pub fn new(
        settings: SessionSettings,
        capture: Box<dyn CaptureDevice>,
        playback: Box<dyn PlaybackDevice>,
    ) -> Self {
        Self {
            settings,
            capture,
            playback,
            observer: None,
        }
    }

    /// Receive transcripts and other conversation events.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<ConversationEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Connect, converse until the server closes the connection or `cancel`
    /// fires, and tear everything down.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Connection`] if the handshake fails; no device is
    ///   opened in that case
    /// - [`ClientError::Transport`] if the connection breaks
    /// - [`ClientError::Device`] if capture or playback keeps failing
    pub async fn run(
        self,
        options: &ConnectOptions,
        cancel: CancellationToken,
    ) -> ClientResult<SessionSummary> {
        let transport = TransportSession::connect(options).await?;

        // Device failures end this session only, never the caller's token
        let stop = cancel.child_token();

        let session = Session::new(self.settings.config.clone());
        info!(session_id = %session.id, "starting voice session");

        let sink = AudioSink::spawn(self.playback, self.settings.format, stop.clone())?;
        let mut router = EventRouter::new(
            TurnController::new(),
            sink,
            self.settings.flush_threshold_bytes,
        );
        if let Some(observer) = self.observer {
            router = router.with_observer(observer);
        }

        let mut handler = SessionHandler {
            session,
            greeting: self.settings.greeting,
            router,
            source: Some(AudioSource::new(self.capture, self.settings.format)),
            capture: None,
            capture_stats: Arc::new(CaptureStats::default()),
            capture_failure: None,
            stop: stop.clone(),
            interrupt: cancel,
            started: Instant::now(),
        };

        let outcome = transport.run(&mut handler, stop).await;
        handler.finish(outcome)
    }
}

/// Connection-scoped state driven by the transport.
struct SessionHandler {
    session: Session,
    greeting: bool,
    router: EventRouter,
    source: Option<AudioSource>,
    capture: Option<JoinHandle<ClientResult<()>>>,
    capture_stats: Arc<CaptureStats>,
    capture_failure: Option<ClientError>,
    /// Session-scoped; cancelled by the caller or by a failing device
    stop: CancellationToken,
    /// The caller's token
    interrupt: CancellationToken,
    started: Instant,
}

impl SessionHandler {
    fn start_capture(&mut self, outbound: OutboundSender) {
        let Some(source) = self.source.take() else {
            return;
        };
        let gate = self.router.gate();
        let stats = Arc::clone(&self.capture_stats);
        let stop = self.stop.clone();

        self.capture = Some(tokio::task::spawn_blocking(move || {
            let mut source = source;
            let result = capture_loop(&mut source, &gate, &outbound, &stats);
            source.stop();
            if let Err(e) = &result {
                error!("capture stopped: {e}");
                stop.cancel();
            }
            result
        }));
    }

    fn summary(&self) -> SessionSummary {
        let playback = self.router.playback_stats();
        let router = self.router.stats();
        SessionSummary {
            session_id: self.session.id,
            remote_session_id: self.session.remote_id.clone(),
            duration: self.started.elapsed(),
            frames_captured: self.capture_stats.captured.load(Ordering::Relaxed),
            frames_forwarded: self.capture_stats.forwarded.load(Ordering::Relaxed),
            frames_suppressed: self.capture_stats.suppressed.load(Ordering::Relaxed),
            bytes_played: playback.bytes_played.load(Ordering::Relaxed),
            responses_completed: router.responses_completed,
        }
    }

    fn finish(mut self, outcome: ClientResult<()>) -> ClientResult<SessionSummary> {
        self.session.remote_id = self.router.remote_session_id().map(str::to_owned);
        let summary = self.summary();
        info!(
            session_id = %summary.session_id,
            frames_forwarded = summary.frames_forwarded,
            frames_suppressed = summary.frames_suppressed,
            bytes_played = summary.bytes_played,
            responses = summary.responses_completed,
            "voice session ended after {:.1}s",
            summary.duration.as_secs_f64()
        );

        outcome?;
        if let Some(e) = self.capture_failure.take() {
            return Err(e);
        }
        if self.router.playback_failed() {
            return Err(ClientError::Device(
                "playback device failed repeatedly".to_string(),
            ));
        }
        Ok(summary)
    }
}

#[async_trait]
impl TransportHandler for SessionHandler {
    async fn on_open(&mut self, outbound: OutboundSender) -> ClientResult<()> {
        self.session.opened_at = Some(SystemTime::now());

        outbound
            .send(ClientEvent::SessionUpdate {
                session: self.session.config.clone(),
            })
            .await?;
        debug!(session_id = %self.session.id, "session.update sent");

        if self.greeting {
            outbound.send(ClientEvent::ResponseCreate).await?;
            debug!("greeting requested");
        }

        self.router.mark_ready();
        self.start_capture(outbound);
        Ok(())
    }

    fn on_message(&mut self, text: &str) {
        self.router.handle(text);
    }

    fn on_error(&mut self, _error: &ClientError) {
        self.router.reset();
    }

    async fn on_teardown(&mut self) {
        let gate = self.router.gate();
        gate.stop();

        if let Some(capture) = self.capture.take() {
            match capture.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.capture_failure = Some(e),
                Err(e) => error!("capture worker panicked: {e}"),
            }
        }
        self.router.reset();

        let drain = !self.stop.is_cancelled();
        if self.interrupt.is_cancelled() {
            info!("session interrupted, discarding queued audio");
        } else if self.stop.is_cancelled() {
            warn!("session ended by a device failure");
        }
        self.router.shutdown(drain).await;
        debug!("session resources released");
    }
}

/// Forward frames while the gate is open. Returns when the gate stops, or
/// with the error that ended capture.
///
/// The device is closed whenever the remote party takes the floor, so audio
/// it would otherwise buffer during that turn is never read back.
fn capture_loop(
    source: &mut AudioSource,
    gate: &TurnGate,
    outbound: &OutboundSender,
    stats: &CaptureStats,
) -> ClientResult<()> {
    let mut failures = 0u32;
    let mut seen_blocks = gate.blocks();

    loop {
        let blocks = gate.blocks();
        if blocks != seen_blocks || !gate.is_listening() {
            if source.is_started() {
                debug!("remote turn, releasing capture device");
                source.stop();
            }
            seen_blocks = blocks;
        }

        if gate.wait_listening() == GateWait::Stopped {
            return Ok(());
        }

        if !source.is_started()
            && let Err(e) = source.start()
        {
            failures += 1;
            if failures >= MAX_CAPTURE_FAILURES {
                return Err(e);
            }
            warn!("capture start failed ({failures}/{MAX_CAPTURE_FAILURES}): {e}");
            std::thread::sleep(CAPTURE_RESTART_DELAY);
            continue;
        }

        let Some(frame) = source.next_frame() else {
            if gate.is_stopped() {
                return Ok(());
            }
            let e = source
                .take_error()
                .unwrap_or_else(|| ClientError::Device("capture ended".to_string()));
            failures += 1;
            if failures >= MAX_CAPTURE_FAILURES {
                return Err(e);
            }
            warn!("capture failed ({failures}/{MAX_CAPTURE_FAILURES}), restarting: {e}");
            std::thread::sleep(CAPTURE_RESTART_DELAY);
            continue;
        };
        failures = 0;
        stats.captured.fetch_add(1, Ordering::Relaxed);

        // The turn may have changed while the read was blocked
        if !gate.is_listening() || gate.blocks() != seen_blocks {
            stats.suppressed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if let Err(e) = outbound.blocking_send(ClientEvent::audio_append(&frame)) {
            if gate.is_stopped() {
                return Ok(());
            }
            return Err(e);
        }
        stats.forwarded.fetch_add(1, Ordering::Relaxed);
    }
}
