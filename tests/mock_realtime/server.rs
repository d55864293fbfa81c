//! WebSocket mock of the realtime service
//!
//! Accepts exactly one connection. The test drives the server side by
//! queueing actions; everything the client sends is recorded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// What the client sent during the handshake.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub uri: String,
    pub authorization: Option<String>,
    pub protocol_version: Option<String>,
}

enum Action {
    Send(Value),
    SendRaw(String),
    Ping,
    Close,
    /// Drop the TCP connection without a close frame
    Drop,
}

pub struct MockRealtimeServer {
    pub url: String,
    handshake: Arc<Mutex<Option<Handshake>>>,
    received: Arc<Mutex<Vec<Value>>>,
    pongs: Arc<AtomicU64>,
    actions: mpsc::UnboundedSender<Action>,
    task: JoinHandle<()>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");

        let handshake = Arc::new(Mutex::new(None));
        let received = Arc::new(Mutex::new(Vec::new()));
        let pongs = Arc::new(AtomicU64::new(0));
        let (actions, actions_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(serve(
            listener,
            Arc::clone(&handshake),
            Arc::clone(&received),
            Arc::clone(&pongs),
            actions_rx,
        ));

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            handshake,
            received,
            pongs,
            actions,
            task,
        }
    }

    pub fn send(&self, event: Value) {
        let _ = self.actions.send(Action::Send(event));
    }

    /// Send a text frame verbatim, valid JSON or not.
    pub fn send_raw(&self, text: &str) {
        let _ = self.actions.send(Action::SendRaw(text.to_string()));
    }

    pub fn ping(&self) {
        let _ = self.actions.send(Action::Ping);
    }

    /// Close the connection with a close frame.
    pub fn close(&self) {
        let _ = self.actions.send(Action::Close);
    }

    /// Drop the connection without a close frame.
    pub fn drop_connection(&self) {
        let _ = self.actions.send(Action::Drop);
    }

    pub fn handshake(&self) -> Option<Handshake> {
        self.handshake.lock().clone()
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Event types received so far, in order.
    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_owned))
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|event| event["type"] == event_type)
            .count()
    }

    pub fn pongs(&self) -> u64 {
        self.pongs.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` events of `event_type` have arrived.
    pub async fn wait_for(&self, event_type: &str, n: usize, timeout: Duration) -> bool {
        super::eventually(timeout, || self.count(event_type) >= n).await
    }

    /// Wait for the connection to end on the server side.
    pub async fn finished(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.task).await.is_ok()
    }
}

async fn serve(
    listener: TcpListener,
    handshake: Arc<Mutex<Option<Handshake>>>,
    received: Arc<Mutex<Vec<Value>>>,
    pongs: Arc<AtomicU64>,
    mut actions: mpsc::UnboundedReceiver<Action>,
) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };

    let record = Arc::clone(&handshake);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        *record.lock() = Some(Handshake {
            uri: request.uri().to_string(),
            authorization: header("authorization"),
            protocol_version: header("openai-beta"),
        });
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let mut closing = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            received.lock().push(value);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pongs.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }

            action = actions.recv(), if !closing => {
                match action {
                    Some(Action::Send(event)) => {
                        if write.send(Message::Text(event.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Action::SendRaw(text)) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Action::Ping) => {
                        let _ = write.send(Message::Ping(b"keepalive".to_vec().into())).await;
                    }
                    Some(Action::Close) => {
                        let _ = write.send(Message::Close(None)).await;
                        closing = true;
                    }
                    Some(Action::Drop) => return,
                    None => closing = true,
                }
            }
        }
    }
}

// Server event builders

pub fn session_created(id: &str) -> Value {
    json!({
        "type": "session.created",
        "event_id": "evt_created",
        "session": { "id": id, "object": "realtime.session" }
    })
}

pub fn session_updated() -> Value {
    json!({ "type": "session.updated", "event_id": "evt_updated", "session": {} })
}

pub fn speech_started() -> Value {
    json!({
        "type": "input_audio_buffer.speech_started",
        "event_id": "evt_speech_started",
        "audio_start_ms": 100,
        "item_id": "item_user"
    })
}

pub fn speech_stopped() -> Value {
    json!({
        "type": "input_audio_buffer.speech_stopped",
        "event_id": "evt_speech_stopped",
        "audio_end_ms": 900,
        "item_id": "item_user"
    })
}

pub fn audio_delta(pcm: &[u8]) -> Value {
    json!({
        "type": "response.audio.delta",
        "event_id": "evt_delta",
        "response_id": "resp_1",
        "item_id": "item_assistant",
        "output_index": 0,
        "content_index": 0,
        "delta": BASE64.encode(pcm)
    })
}

pub fn audio_done() -> Value {
    json!({
        "type": "response.audio.done",
        "event_id": "evt_audio_done",
        "response_id": "resp_1",
        "item_id": "item_assistant",
        "output_index": 0,
        "content_index": 0
    })
}

pub fn response_done() -> Value {
    json!({
        "type": "response.done",
        "event_id": "evt_response_done",
        "response": { "id": "resp_1", "object": "realtime.response", "status": "completed" }
    })
}

pub fn error(message: &str) -> Value {
    json!({
        "type": "error",
        "event_id": "evt_error",
        "error": { "type": "invalid_request_error", "message": message }
    })
}
