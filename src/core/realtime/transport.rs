//! WebSocket transport for the realtime service.
//!
//! [`TransportSession::connect`] performs the handshake and
//! [`TransportSession::run`] drives the socket until the server closes it,
//! the connection breaks, or the session is cancelled. Everything the session
//! does in between goes through a [`TransportHandler`]:
//!
//! - `on_open` receives the [`OutboundSender`] once the socket is live
//! - `on_message` is called for every inbound text frame, in arrival order
//! - `on_error` is called once if the connection fails
//! - `on_teardown` always runs before the socket is closed
//!
//! Outbound events are funnelled through a bounded channel into the single
//! task that owns the socket, so senders on any thread (including the
//! blocking capture worker) never touch the socket directly.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use zeroize::Zeroize;

use super::catalog::{REALTIME_PROTOCOL_VERSION, REALTIME_URL, RealtimeModel};
use super::messages::ClientEvent;
use crate::errors::{ClientError, ClientResult};

/// Channel capacity for outbound events.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Header carrying the protocol version.
const PROTOCOL_VERSION_HEADER: &str = "OpenAI-Beta";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectOptions {
    /// WebSocket endpoint, without the model query parameter
    pub url: String,
    /// Bearer token
    pub api_key: String,
    /// Model, sent as `?model=`
    pub model: RealtimeModel,
}

impl ConnectOptions {
    /// Options for the default endpoint.
    pub fn new(api_key: impl Into<String>, model: RealtimeModel) -> Self {
        Self {
            url: REALTIME_URL.to_string(),
            api_key: api_key.into(),
            model,
        }
    }

    /// Point at a different endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Endpoint URL including the model parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] if the URL does not parse.
    pub fn endpoint(&self) -> ClientResult<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| {
            ClientError::InvalidConfiguration(format!("invalid endpoint '{}': {e}", self.url))
        })?;
        url.query_pairs_mut()
            .append_pair("model", self.model.as_str());
        Ok(url)
    }

    /// Build the handshake request with the auth and version headers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] for a bad URL or a key
    /// that is not a valid header value.
    pub fn handshake_request(&self) -> ClientResult<Request> {
        let url = self.endpoint()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidConfiguration(e.to_string()))?;

        let mut bearer = http::HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| {
                ClientError::InvalidConfiguration("API key is not a valid header value".into())
            })?;
        bearer.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, bearer);
        headers.insert(
            PROTOCOL_VERSION_HEADER,
            http::HeaderValue::from_static(REALTIME_PROTOCOL_VERSION),
        );
        Ok(request)
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

impl Drop for ConnectOptions {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// Cloneable handle for sending events while the connection is open.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<ClientEvent>,
    open: Arc<AtomicBool>,
}

impl OutboundSender {
    pub(crate) fn new(tx: mpsc::Sender<ClientEvent>, open: Arc<AtomicBool>) -> Self {
        Self { tx, open }
    }

    /// Whether events sent now will reach the socket.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// Queue an event for the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the connection is not open.
    pub async fn send(&self, event: ClientEvent) -> ClientResult<()> {
        self.check_open(&event)?;
        self.tx.send(event).await.map_err(|e| {
            ClientError::Transport(format!("connection closed, dropped {}", e.0.event_type()))
        })
    }

    /// Blocking variant of [`send`](Self::send) for worker threads.
    ///
    /// Must not be called from an async context.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the connection is not open.
    pub fn blocking_send(&self, event: ClientEvent) -> ClientResult<()> {
        self.check_open(&event)?;
        self.tx.blocking_send(event).map_err(|e| {
            ClientError::Transport(format!("connection closed, dropped {}", e.0.event_type()))
        })
    }

    fn check_open(&self, event: &ClientEvent) -> ClientResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Transport(format!(
                "connection is not open, cannot send {}",
                event.event_type()
            )))
        }
    }
}

/// Session-side hooks invoked by [`TransportSession::run`].
#[async_trait]
pub trait TransportHandler: Send {
    /// The socket is live. Returning an error ends the session.
    async fn on_open(&mut self, outbound: OutboundSender) -> ClientResult<()>;

    /// One inbound text message. Must not block.
    fn on_message(&mut self, text: &str);

    /// The connection failed. Called at most once, before `on_teardown`.
    fn on_error(&mut self, error: &ClientError);

    /// Release everything that depends on the connection. Always called.
    async fn on_teardown(&mut self);
}

/// An established realtime connection.
pub struct TransportSession {
    ws: WsStream,
}

impl TransportSession {
    /// Perform the WebSocket handshake. No retry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the connection or handshake
    /// fails, or [`ClientError::InvalidConfiguration`] for bad options.
    pub async fn connect(options: &ConnectOptions) -> ClientResult<Self> {
        let request = options.handshake_request()?;
        info!(
            "connecting to realtime endpoint {} (model {})",
            options.url, options.model
        );

        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        debug!(status = %response.status(), "websocket handshake complete");
        info!("connected to realtime endpoint");
        Ok(Self { ws })
    }

    /// Drive the connection until it closes or `cancel` fires.
    ///
    /// A server close or cancellation is a normal end; a socket error or an
    /// `on_open` failure is returned after teardown.
    pub async fn run<H>(self, handler: &mut H, cancel: CancellationToken) -> ClientResult<()>
    where
        H: TransportHandler + ?Sized,
    {
        let (mut ws_sink, mut ws_stream) = self.ws.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(OUTBOUND_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        let mut result = handler
            .on_open(OutboundSender::new(tx, Arc::clone(&open)))
            .await;

        if result.is_ok() {
            result = loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        info!("session cancelled");
                        break Ok(());
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => handler.on_message(&text),
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    break Err(ClientError::Transport(format!("failed to send pong: {e}")));
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "websocket closed by server");
                                break Ok(());
                            }
                            Some(Ok(Message::Binary(data))) => {
                                debug!(len = data.len(), "ignoring binary frame");
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break Err(ClientError::Transport(e.to_string())),
                            None => break Err(ClientError::Transport(
                                "connection ended without a close frame".to_string(),
                            )),
                        }
                    }

                    // Handle outgoing messages
                    Some(event) = rx.recv() => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("failed to serialize {}: {e}", event.event_type());
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            break Err(ClientError::Transport(format!("failed to send: {e}")));
                        }
                    }
                }
            };
        }

        // Senders fail fast from here on, including any blocked in a send
        open.store(false, Ordering::SeqCst);
        rx.close();
        while rx.try_recv().is_ok() {}

        if let Err(e) = &result {
            error!("realtime session failed: {e}");
            handler.on_error(e);
        }
        handler.on_teardown().await;

        if let Err(e) = ws_sink.close().await {
            debug!("websocket close: {e}");
        }
        if result.is_ok() {
            info!("realtime session closed");
        } else {
            warn!("realtime session ended with an error");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_headers() {
        let options = ConnectOptions::new("sk-test", RealtimeModel::Gpt4oRealtimePreview);
        let request = options.handshake_request().unwrap();

        assert_eq!(
            request.uri().to_string(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(request.headers()["authorization"], "Bearer sk-test");
        assert!(request.headers()["authorization"].is_sensitive());
        assert_eq!(request.headers()["openai-beta"], "realtime=v1");
    }

    #[test]
    fn test_invalid_endpoint() {
        let options = ConnectOptions::new("sk-test", RealtimeModel::default()).with_url("not a url");
        assert!(matches!(
            options.handshake_request(),
            Err(ClientError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let options = ConnectOptions::new("sk-secret", RealtimeModel::default());
        let debug = format!("{options:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_send_on_closed_connection_fails() {
        let (tx, rx) = mpsc::channel(1);
        let open = Arc::new(AtomicBool::new(true));
        let sender = OutboundSender::new(tx, Arc::clone(&open));

        drop(rx);
        match sender.send(ClientEvent::ResponseCreate).await {
            Err(ClientError::Transport(msg)) => assert!(msg.contains("response.create")),
            other => panic!("Expected Transport error, got {other:?}"),
        }

        open.store(false, Ordering::SeqCst);
        assert!(!sender.is_open());
        assert!(matches!(
            sender.send(ClientEvent::audio_append(&[0, 0])).await,
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let options = ConnectOptions::new("sk-test", RealtimeModel::default())
            .with_url(format!("ws://{addr}/v1/realtime"));
        match TransportSession::connect(&options).await {
            Err(ClientError::Connection(_)) => {}
            Err(other) => panic!("Expected Connection error, got {other}"),
            Ok(_) => panic!("Expected Connection error"),
        }
    }
}
