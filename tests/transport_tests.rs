//! Transport tests against a local mock of the realtime service

mod mock_realtime;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mock_realtime::server::{session_created, speech_started, speech_stopped};
use mock_realtime::{MockRealtimeServer, WAIT, connect_options, eventually};
use waav_talk::{
    ClientError, ClientEvent, ClientResult, OutboundSender, TransportHandler, TransportSession,
};

/// Records every callback and keeps the outbound handle past teardown.
#[derive(Default)]
struct RetainingHandler {
    outbound: Option<OutboundSender>,
    messages: Arc<Mutex<Vec<String>>>,
    errors: Vec<String>,
    teardowns: usize,
    opened: Arc<Notify>,
}

#[async_trait]
impl TransportHandler for RetainingHandler {
    async fn on_open(&mut self, outbound: OutboundSender) -> ClientResult<()> {
        outbound.send(ClientEvent::ResponseCreate).await?;
        self.outbound = Some(outbound);
        self.opened.notify_one();
        Ok(())
    }

    fn on_message(&mut self, text: &str) {
        self.messages.lock().push(text.to_string());
    }

    fn on_error(&mut self, error: &ClientError) {
        self.errors.push(error.to_string());
    }

    async fn on_teardown(&mut self) {
        self.teardowns += 1;
    }
}

async fn run_transport(
    server: &MockRealtimeServer,
    handler: RetainingHandler,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<(ClientResult<()>, RetainingHandler)> {
    let transport = TransportSession::connect(&connect_options(server))
        .await
        .expect("mock server accepts the connection");
    tokio::spawn(async move {
        let mut handler = handler;
        let result = transport.run(&mut handler, cancel).await;
        (result, handler)
    })
}

#[tokio::test]
async fn test_send_after_close_is_an_error() {
    let server = MockRealtimeServer::start().await;
    let handle = run_transport(&server, RetainingHandler::default(), CancellationToken::new()).await;

    assert!(server.wait_for("response.create", 1, WAIT).await);
    server.close();

    let (result, handler) = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(handler.teardowns, 1);
    assert!(handler.errors.is_empty());

    let outbound = handler.outbound.expect("outbound handle retained");
    assert!(!outbound.is_open());
    match outbound.send(ClientEvent::audio_append(&[0, 0, 0, 0])).await {
        Err(ClientError::Transport(msg)) => assert!(msg.contains("input_audio_buffer.append")),
        other => panic!("Expected Transport error, got {other:?}"),
    }

    let blocking = tokio::task::spawn_blocking(move || {
        outbound.blocking_send(ClientEvent::ResponseCreate)
    })
    .await
    .unwrap();
    assert!(matches!(blocking, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn test_messages_delivered_in_order() {
    let server = MockRealtimeServer::start().await;
    let handler = RetainingHandler::default();
    let messages = Arc::clone(&handler.messages);
    let cancel = CancellationToken::new();
    let handle = run_transport(&server, handler, cancel.clone()).await;

    server.send(session_created("sess_order"));
    server.send(speech_started());
    server.send(speech_stopped());
    assert!(eventually(WAIT, || messages.lock().len() == 3).await);

    let types: Vec<String> = messages
        .lock()
        .iter()
        .map(|m| {
            let value: serde_json::Value = serde_json::from_str(m).unwrap();
            value["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        types,
        [
            "session.created",
            "input_audio_buffer.speech_started",
            "input_audio_buffer.speech_stopped"
        ]
    );

    cancel.cancel();
    let (result, handler) = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(handler.teardowns, 1);
}

#[tokio::test]
async fn test_ping_is_answered() {
    let server = MockRealtimeServer::start().await;
    let handler = RetainingHandler::default();
    let opened = Arc::clone(&handler.opened);
    let cancel = CancellationToken::new();
    let handle = run_transport(&server, handler, cancel.clone()).await;

    opened.notified().await;
    server.ping();
    assert!(eventually(WAIT, || server.pongs() >= 1).await);

    cancel.cancel();
    let (result, _) = handle.await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_abrupt_disconnect_reports_error_then_tears_down() {
    let server = MockRealtimeServer::start().await;
    let handle = run_transport(&server, RetainingHandler::default(), CancellationToken::new()).await;

    assert!(server.wait_for("response.create", 1, WAIT).await);
    server.drop_connection();

    let (result, handler) = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::Transport(_))));
    assert_eq!(handler.errors.len(), 1);
    assert_eq!(handler.teardowns, 1);
    assert!(!handler.outbound.unwrap().is_open());
}

#[tokio::test]
async fn test_cancel_before_any_traffic() {
    let server = MockRealtimeServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let handle = run_transport(&server, RetainingHandler::default(), cancel).await;

    let (result, handler) = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(handler.teardowns, 1);
    assert!(server.finished(WAIT).await);
}
