//! HTTP and WebSocket endpoint
//!
//! Serves the client page on `/` and `/index.html`, upgrades the configured
//! path to a WebSocket and answers everything else with 404. The endpoint
//! does not interpret messages: every connection, frame and disconnect is
//! forwarded as a [`ServerEvent`] to the fan-out loop, which owns all
//! per-peer state.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::TcpListener;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::StreamerConfig;
use crate::error::{ServerError, SignalingError};
use crate::signaling::protocol::SignalMessage;
use crate::signaling::PeerId;

const INDEX_TEMPLATE: &str = include_str!("../../static/index.html");
const WS_PATH_PLACEHOLDER: &str = "{{WS_PATH}}";

/// A frame received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
}

/// A command for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Sending half of one client connection
#[derive(Debug)]
pub struct SignalingChannel {
    peer: PeerId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SignalingChannel {
    pub fn new(peer: PeerId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { peer, tx }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Encode and queue a message for the client
    pub fn send(&self, message: &SignalMessage) -> Result<(), SignalingError> {
        let text = message.encode()?;
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| SignalingError::ChannelClosed)
    }

    /// Ask the writer to send a close frame and stop
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What the endpoint reports to the fan-out loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        peer: PeerId,
        channel: SignalingChannel,
    },
    Message {
        peer: PeerId,
        frame: Inbound,
    },
    Closed {
        peer: PeerId,
    },
}

struct ServerState {
    events: mpsc::UnboundedSender<ServerEvent>,
    page: String,
}

/// Render the built-in client page for a given WebSocket path
pub fn index_page(ws_path: &str) -> String {
    INDEX_TEMPLATE.replace(WS_PATH_PLACEHOLDER, ws_path)
}

/// Build the router for the signaling endpoint
pub fn router(config: &StreamerConfig, events: mpsc::UnboundedSender<ServerEvent>) -> Router {
    let state = Arc::new(ServerState {
        events,
        page: index_page(&config.path),
    });

    let pages = match &config.static_page {
        Some(path) => Router::new()
            .route_service("/", ServeFile::new(path))
            .route_service("/index.html", ServeFile::new(path)),
        None => Router::new()
            .route("/", get(index))
            .route("/index.html", get(index))
            .with_state(state.clone()),
    };

    Router::new()
        .route(&config.path, get(ws_upgrade))
        .with_state(state)
        .merge(pages)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
}

/// Bind the listening socket. Done on the caller's thread so that a bind
/// failure is reported by `Streamer::start`.
pub fn bind(config: &StreamerConfig) -> Result<TcpListener, ServerError> {
    let address = config.listen_address();
    let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
        address: address.clone(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| ServerError::Bind { address, source })?;
    Ok(listener)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Signaling endpoint listening on {}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Runtime)
}

async fn index(State(state): State<Arc<ServerState>>) -> Html<String> {
    Html(state.page.clone())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let peer = PeerId::new();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let connected = ServerEvent::Connected {
        peer,
        channel: SignalingChannel::new(peer, out_tx),
    };
    if state.events.send(connected).is_err() {
        warn!("Rejecting peer {}: streamer is shutting down", peer);
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    info!("Peer {} connected", peer);

    let mut writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            msg = stream.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => Inbound::Text(text),
                    Some(Ok(Message::Binary(data))) => Inbound::Binary(data),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Peer {} socket error: {}", peer, e);
                        break;
                    }
                };
                if state.events.send(ServerEvent::Message { peer, frame }).is_err() {
                    break;
                }
            }
            _ = &mut writer => break,
        }
    }

    info!("Peer {} disconnected", peer);
    let _ = state.events.send(ServerEvent::Closed { peer });
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::SessionDescription;

    #[test]
    fn test_index_page_uses_ws_path() {
        let page = index_page("/signal");
        assert!(page.contains("/signal"));
        assert!(!page.contains(WS_PATH_PLACEHOLDER));
    }

    #[test]
    fn test_channel_send_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(PeerId::new(), tx);

        channel
            .send(&SignalMessage::from(SessionDescription::offer("v=0")))
            .unwrap();
        channel.close();

        match rx.try_recv().unwrap() {
            Outbound::Text(text) => assert!(text.contains("\"offer\"")),
            other => panic!("expected text, got {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_channel_send_after_writer_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(PeerId::new(), tx);
        drop(rx);

        let result = channel.send(&SignalMessage::from(SessionDescription::offer("v=0")));
        assert!(matches!(result, Err(SignalingError::ChannelClosed)));
        assert!(channel.is_closed());
    }

    #[test]
    fn test_bind_reports_address_in_use() {
        let mut config = StreamerConfig::default();
        config.bind_address = "127.0.0.1".to_string();
        config.port = 0;
        let first = bind(&config).unwrap();

        config.port = first.local_addr().unwrap().port();
        match bind(&config) {
            Err(ServerError::Bind { address, .. }) => assert!(address.ends_with(&config.port.to_string())),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }
}
