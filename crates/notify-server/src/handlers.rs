//! HTTP and websocket handlers for the Notify server.
//!
//! This module wires the hub, the bus and a running Notify instance together,
//! and drives each websocket connection.

use crate::bus::LocalBus;
use crate::config::Config;
use crate::hub::RoomHub;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use notify_core::{Notification, Notify, NotifyHandle, Payload};
use notify_protocol::{codec, codes, Frame, PROTOCOL_VERSION};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Connected clients and their rooms.
    pub hub: Arc<RoomHub>,
    /// The backend Notify subscribes through.
    pub bus: Arc<LocalBus>,
    /// The running Notify event loop.
    pub notify: NotifyHandle,
    /// Server configuration.
    pub config: Config,
    next_client: AtomicU64,
}

impl AppState {
    /// Build the hub and bus, install Notify on them and start its event loop.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if Notify cannot be assembled.
    pub fn new(config: Config) -> Result<Self> {
        let hub = Arc::new(RoomHub::new(config.limits.max_rooms_per_client));
        let bus = Arc::new(LocalBus::new(Duration::from_millis(
            config.backend.ack_delay_ms,
        )));

        let notify = Notify::builder()
            .membership(hub.clone())
            .backend(bus.clone())
            .config(config.notify.clone())
            .build()
            .context("Failed to assemble Notify")?;

        Ok(Self {
            hub,
            bus,
            notify: notify.spawn(),
            config,
            next_client: AtomicU64::new(1),
        })
    }

    fn next_client_id(&self) -> String {
        format!("client_{}", self.next_client.fetch_add(1, Ordering::Relaxed))
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/subscriptions", get(subscriptions_handler))
        .route("/rooms", get(rooms_handler))
        .route("/clients", get(clients_handler))
        .route("/publish/:room", post(publish_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config)?);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Notify server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.notify.queries().get_stats())
}

async fn subscriptions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.notify.queries().get_subscriptions())
}

async fn rooms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.notify.queries().get_rooms())
}

async fn clients_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.notify.queries().get_clients())
}

/// Publish a JSON message on a room through the bus.
async fn publish_handler(
    Path(room): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    if body.len() > state.config.limits.max_message_size {
        metrics::record_error("too_large");
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "error": "message too large" })),
        );
    }

    let text = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            metrics::record_error("validation");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "body is not UTF-8" })),
            );
        }
    };

    if let Err(e) = Notification::parse(&room, Payload::Text(text.clone())) {
        debug!(room = %room, error = %e, "Publish rejected");
        metrics::record_error("validation");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        );
    }

    let published = state.bus.publish(&room, text);
    if published {
        metrics::record_published();
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({ "room": room, "published": published })),
    )
}

/// Encoding used for outbound frames on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireFormat {
    #[default]
    Binary,
    Json,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(default)]
    format: WireFormat,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, params.format))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, format: WireFormat) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let client_id = state.next_client_id();
    let mut outbound = state.hub.connect(client_id.clone());

    debug!(client = %client_id, ?format, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = Frame::connected(&client_id, PROTOCOL_VERSION, heartbeat);
    if let Err(e) = send_frame(&mut sender, &connected, format).await {
        error!(client = %client_id, error = %e, "Failed to send Connected frame");
        state.hub.disconnect(&client_id);
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Notifications fanned out to this client
            Some(frame) = outbound.recv() => {
                if send_frame(&mut sender, &frame, format).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                let replies = match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        let replies = decode_binary(&mut read_buffer, &client_id, &state);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                        replies
                    }
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_frame(text.len(), "inbound");
                        match codec::from_json(&text) {
                            Ok(frame) => handle_frame(frame, &client_id, &state).into_iter().collect(),
                            Err(e) => {
                                metrics::record_error("decode");
                                vec![Frame::error(0, codes::INVALID_FRAME, e.to_string())]
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(client = %client_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(client = %client_id, "WebSocket stream ended");
                        break;
                    }
                };

                let mut closed = false;
                for reply in &replies {
                    if send_frame(&mut sender, reply, format).await.is_err() {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break;
                }
            }
        }
    }

    let rooms = state.hub.disconnect(&client_id);
    debug!(client = %client_id, rooms = rooms.len(), "WebSocket disconnected");
}

/// Decode every complete binary frame in the buffer and handle it.
fn decode_binary(buf: &mut BytesMut, client_id: &str, state: &AppState) -> Vec<Frame> {
    let mut replies = Vec::new();
    loop {
        match codec::decode_from(buf) {
            Ok(Some(frame)) => replies.extend(handle_frame(frame, client_id, state)),
            Ok(None) => break,
            Err(e) => {
                warn!(client = %client_id, error = %e, "Undecodable frame, buffer discarded");
                metrics::record_error("decode");
                buf.clear();
                replies.push(Frame::error(0, codes::INVALID_FRAME, e.to_string()));
                break;
            }
        }
    }
    replies
}

/// Handle a decoded client frame, returning the reply if there is one.
fn handle_frame(frame: Frame, client_id: &str, state: &AppState) -> Option<Frame> {
    let frame_type = frame.frame_type();
    if !frame_type.is_client_frame() {
        warn!(client = %client_id, ?frame_type, "Unexpected frame type");
        metrics::record_error("unexpected_frame");
        return Some(Frame::error(
            0,
            codes::UNEXPECTED_FRAME,
            format!("{:?} frames are server-to-client only", frame_type),
        ));
    }

    match frame {
        Frame::Subscribe { id, room } => {
            debug!(client = %client_id, room = %room, "Subscribe request");
            Some(match state.hub.join(&room, client_id) {
                Ok(()) => Frame::ack(id),
                Err(e) => {
                    debug!(client = %client_id, room = %room, error = %e, "Subscribe refused");
                    metrics::record_error("subscribe");
                    Frame::error(id, e.code(), e.to_string())
                }
            })
        }

        Frame::Unsubscribe { id, room } => {
            debug!(client = %client_id, room = %room, "Unsubscribe request");
            Some(match state.hub.leave(&room, client_id) {
                Ok(()) => Frame::ack(id),
                Err(e) => {
                    metrics::record_error("unsubscribe");
                    Frame::error(id, e.code(), e.to_string())
                }
            })
        }

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        // Pong
        _ => None,
    }
}

/// Send a frame in the connection's wire format.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Binary => Message::Binary(codec::encode(frame)?.to_vec()),
        WireFormat::Json => Message::Text(codec::to_json(frame)?),
    };
    let bytes = match &message {
        Message::Binary(data) => data.len(),
        Message::Text(text) => text.len(),
        _ => 0,
    };
    metrics::record_frame(bytes, "outbound");
    sender.send(message).await?;
    Ok(())
}
