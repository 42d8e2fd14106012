//! Connection handlers for the relay server.
//!
//! This module handles the subscriber connection lifecycle and control
//! message processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use plenum_core::{DeviceDirectory, Outbound, Registry};
use plenum_protocol::{ClientMessage, ServerMessage};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection registry.
    pub registry: Arc<Registry>,
    /// Device→room directory.
    pub directory: Arc<DeviceDirectory>,
    /// Server configuration.
    pub config: Config,
    /// Server start time, for uptime reporting.
    pub started: Instant,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, registry: Arc<Registry>, directory: Arc<DeviceDirectory>) -> Self {
        Self {
            registry,
            directory,
            config,
            started: Instant::now(),
        }
    }
}

/// Run the HTTP/WebSocket server until shutdown is signalled.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state.clone());

    let addr = state.config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Plenum relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.registry.clone()))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then direct every subscriber connection to close.
///
/// The close directives must go out while the runtime is still serving:
/// the connection tasks turn them into close frames, the upgraded
/// connections end, and only then does the graceful shutdown resolve.
async fn shutdown_signal(registry: Arc<Registry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install shutdown handler");
    }
    info!("Shutdown signal received, closing subscriber connections");
    registry.shutdown();
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.registry.stats())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a subscriber connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Register with an empty interest set; the channel is this
    // connection's delivery path from the fan-out engine.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let client_id = state.registry.register(outbound_tx);

    debug!(client = %client_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Welcome acknowledgement carrying the assigned id.
    let welcome = ServerMessage::system_status(json!({
        "message": "Connected to Plenum telemetry relay",
        "clientId": client_id,
    }))
    .with_client_id(&client_id);

    if !send_message(&mut sender, &welcome).await {
        state.registry.remove(&client_id);
        return;
    }

    loop {
        tokio::select! {
            // Directives from the fan-out engine.
            directive = outbound_rx.recv() => {
                match directive {
                    Some(Outbound::Frame(frame)) => {
                        metrics::record_message(frame.len(), "outbound");
                        if sender.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Ping) => {
                        if sender.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            // Inbound from the subscriber.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        handle_control(&text, &client_id, &state);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Probe response: flip the liveness flag back on.
                        state.registry.mark_alive(&client_id);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // The subscriber protocol is text-only JSON.
                        debug!(client = %client_id, "Ignoring binary frame");
                    }
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
                }
            }
        }
    }

    state.registry.remove(&client_id);
    debug!(client = %client_id, "WebSocket disconnected");
}

/// Dispatch one client control message.
///
/// Unknown message kinds are logged and ignored: no acknowledgement, no
/// error to the client, no disconnect.
fn handle_control(text: &str, client_id: &str, state: &AppState) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(client = %client_id, error = %e, "Ignoring unknown control message");
            return;
        }
    };

    match message {
        ClientMessage::SubscribeRoom { room_id } => {
            match state.registry.subscribe_room(client_id, &room_id) {
                Ok(()) => {
                    let ack = ServerMessage::system_status(json!({
                        "message": format!("Subscribed to room {room_id}"),
                    }))
                    .with_client_id(client_id);
                    state.registry.send_to(client_id, &ack);
                }
                Err(e) => warn!(client = %client_id, error = %e, "Subscribe failed"),
            }
        }

        ClientMessage::UnsubscribeRoom { room_id } => {
            match state.registry.unsubscribe_room(client_id, &room_id) {
                Ok(()) => {
                    let ack = ServerMessage::system_status(json!({
                        "message": format!("Unsubscribed from room {room_id}"),
                    }))
                    .with_client_id(client_id);
                    state.registry.send_to(client_id, &ack);
                }
                Err(e) => warn!(client = %client_id, error = %e, "Unsubscribe failed"),
            }
        }

        // Status goes to every connection, not just the requester.
        ClientMessage::GetStatus => {
            broadcast_system_status(state);
        }
    }
}

/// Broadcast the current system status to all connections.
fn broadcast_system_status(state: &AppState) {
    let message = ServerMessage::system_status(json!({
        "connectedClients": state.registry.client_count(),
        "knownDevices": state.directory.len(),
        "uptime": state.started.elapsed().as_secs(),
    }));
    let recipients = state.registry.broadcast_all(&message);
    metrics::record_broadcast("global");
    debug!(recipients, "System status broadcast");
}

/// Send a message directly on a socket sink (pre-registration path).
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => {
            metrics::record_message(json.len(), "outbound");
            sender.send(Message::Text(json)).await.is_ok()
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize message");
            false
        }
    }
}
