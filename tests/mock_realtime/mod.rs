//! Mock realtime service and fake audio devices
//!
//! - `server`: a single-connection WebSocket server speaking the realtime
//!   envelope format, driven step by step by the test
//! - `devices`: capture/playback fakes that record what the session did to
//!   them

// Allow dead code in test infrastructure - not every test uses every helper
#![allow(dead_code)]

pub mod devices;
pub mod server;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use waav_talk::{
    ClientResult, ConnectOptions, RealtimeModel, RealtimeVoice, SessionConfig, SessionSettings,
    SessionSummary, VoiceSession,
};

pub use devices::{DeviceProbe, FakeMic, FakeSpeaker};
pub use server::{Handshake, MockRealtimeServer};

/// Generous upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(3);

/// Session settings used by the integration tests.
pub fn test_settings(greeting: bool) -> SessionSettings {
    let mut settings = SessionSettings::new(SessionConfig::pcm16(RealtimeVoice::Alloy));
    settings.greeting = greeting;
    settings
}

pub fn connect_options(server: &MockRealtimeServer) -> ConnectOptions {
    ConnectOptions::new("sk-test", RealtimeModel::Gpt4oMiniRealtimePreview)
        .with_url(server.url.clone())
}

/// Run a voice session against `server` in the background.
pub fn spawn_session(
    server: &MockRealtimeServer,
    settings: SessionSettings,
    mic: FakeMic,
    speaker: FakeSpeaker,
) -> (JoinHandle<ClientResult<SessionSummary>>, CancellationToken) {
    let options = connect_options(server);
    let cancel = CancellationToken::new();
    let session = VoiceSession::new(settings, Box::new(mic), Box::new(speaker));
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { session.run(&options, cancel).await }
    });
    (handle, cancel)
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
