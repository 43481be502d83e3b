//! WebSocket transport for signaling clients
//!
//! Runs an axum HTTP server that upgrades connections to WebSocket. Each
//! socket task owns its connection end to end: it mints the connection
//! handle, pushes accepted/frame/closed events onto the ingress queue in
//! that order, and drains the connection's outbound buffer back into the
//! socket. The dispatcher thread never touches a socket; its sends go
//! through the bounded per-connection channel and cannot block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::ws::{Message as WsMsg, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use beacon_core::conn::{ConnHandle, OutboundSink};
use beacon_core::ingress::{IngressEvent, IngressQueue};
use beacon_core::stats::ServerStats;
use beacon_protocol::Envelope;

/// Maximum inbound frame size; signaling envelopes are small
const MAX_WS_MESSAGE_SIZE: usize = 64 * 1024;

/// Outbound frames buffered per connection before sends start failing
const OUTBOUND_BUFFER: usize = 256;

/// Shared state for WebSocket handlers
pub struct WsState {
    /// Queue into the dispatcher
    pub ingress: Arc<IngressQueue>,
    /// Shared counters
    pub stats: Arc<ServerStats>,
}

/// Source of transport-unique connection tokens
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Create the axum Router
///
/// Routes:
/// - `GET /ws` - WebSocket upgrade handler
/// - `GET /health` - Health check (200 OK)
///
/// CORS is permissive: the server relays opaque payloads between peers
/// that already share a room identifier, so origin checking adds
/// nothing.
pub fn ws_router(state: Arc<WsState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Frames travelling from the dispatcher to one socket
enum OutboundFrame {
    Text(String),
    Close,
}

/// Outbound side of one connection: a bounded queue drained by the
/// socket task. `try_send` keeps the dispatcher non-blocking; a full
/// buffer fails the send, which the core counts against the client.
struct WsSink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundSink for WsSink {
    fn send_text(&self, frame: &str) -> bool {
        self.tx
            .try_send(OutboundFrame::Text(frame.to_owned()))
            .is_ok()
    }

    // Close shares the outbound buffer. Both callers (accept refusal,
    // idle reaping) act on connections with an empty buffer, so the
    // request fits.
    fn close(&self) {
        let _ = self.tx.try_send(OutboundFrame::Close);
    }
}

/// Handle one WebSocket client connection
///
/// 1. Mint a handle and announce `Accepted` (an overflowing ingress
///    queue refuses the connection outright)
/// 2. Pump outbound frames and parse inbound ones concurrently
/// 3. Announce `Closed` when either direction ends
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER);
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    let handle = ConnHandle::new(token, Arc::new(WsSink { tx }));

    if state.ingress.push(IngressEvent::Accepted(handle.clone())).is_err() {
        state.stats.record_error();
        warn!(token, "ingress full, refusing connection");
        return;
    }
    debug!(token, "connection accepted");

    // Outbound: drain the connection buffer into the socket
    let outbound = async {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if ws_sink.send(WsMsg::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = ws_sink.send(WsMsg::Close(None)).await;
                    break;
                }
            }
        }
    };

    // Inbound: parse text frames into envelopes and push to ingress
    let ingress = Arc::clone(&state.ingress);
    let stats = Arc::clone(&state.stats);
    let inbound_handle = handle.clone();
    let inbound = async move {
        while let Some(message) = ws_stream.next().await {
            match message {
                Ok(WsMsg::Text(text)) => {
                    let envelope = match Envelope::parse(text.as_str()) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            stats.record_error();
                            debug!(token, error = %err, "dropping malformed frame");
                            continue;
                        }
                    };
                    let event = IngressEvent::Frame(inbound_handle.clone(), envelope);
                    if ingress.push(event).is_err() {
                        stats.record_error();
                        debug!(token, "ingress full, dropping frame");
                    } else {
                        stats.record_frame();
                    }
                }
                // This is a text protocol; binary frames are malformed
                Ok(WsMsg::Binary(_)) => {
                    stats.record_error();
                }
                Ok(WsMsg::Ping(_)) | Ok(WsMsg::Pong(_)) => continue,
                Ok(WsMsg::Close(_)) | Err(_) => break,
            }
        }
    };

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }

    debug!(token, "connection closed");
    if state.ingress.push(IngressEvent::Closed(handle)).is_err() {
        // The reaper collects the orphaned session by idle timeout
        state.stats.record_error();
        warn!(token, "ingress full, close deferred to reaper");
    }
}
