//! HTTP route handlers for the TaskSync server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /ws` - WebSocket endpoint for viewers
//! - `GET /api/health` - Connection count and session counters
//! - `GET /api/tasks` - The current task
//! - `GET /api/logs?limit=N` - Log entries read fresh from the log file
//! - `GET /api/files` - Workspace file tree
//!
//! # Architecture
//!
//! All routes share the [`Pipeline`] through [`AppState`]. WebSocket
//! connections get one writer task draining the viewer's outbound queue and a
//! reader loop that decodes [`ClientMessage`]s and hands them to the pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasksync_server::config::Config;
//! use tasksync_server::pipeline::Pipeline;
//! use tasksync_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let pipeline = Arc::new(Pipeline::new(&config));
//!     let app = create_router(AppState::new(pipeline));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, trace, warn};

use crate::broadcast::ViewerId;
use crate::pipeline::Pipeline;
use crate::types::{ClientMessage, ServerMessage};

// ============================================================================
// Constants
// ============================================================================

/// Number of log entries returned when `limit` is not given.
const DEFAULT_LOG_LIMIT: usize = 50;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(get_ws))
        .route("/api/health", get(get_health))
        .route("/api/tasks", get(get_tasks))
        .route("/api/logs", get(get_logs))
        .route("/api/files", get(get_files))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    fn internal(error: impl Into<String>) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(Self::new(error))).into_response()
    }
}

// ============================================================================
// GET /ws - Viewer Connections
// ============================================================================

/// GET /ws - Upgrades to a viewer connection.
///
/// # WebSocket Protocol
///
/// Every frame is a JSON object `{"type": <kind>, "data": <payload>}`. The
/// server sends `initial_state` followed by `task_file_update` right after
/// the upgrade, then pushes updates as the watched files change.
async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state.pipeline))
}

/// Drives one viewer connection until either side closes it.
async fn handle_websocket(socket: WebSocket, pipeline: Arc<Pipeline>) {
    let (mut sender, mut receiver) = socket.split();

    let conn = match pipeline.connect_viewer().await {
        Ok(conn) => conn,
        Err(err) => {
            error!(error = %err, "Failed to prepare initial state");
            let message = ServerMessage::error(err.viewer_message("loading initial state"));
            if let Ok(json) = serde_json::to_string(&message) {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            let _ = sender.close().await;
            return;
        }
    };
    let viewer = conn.id;
    let mut outbound = conn.receiver;

    let forward_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    error!(error = %err, kind = message.kind(), "Failed to serialize message");
                    continue;
                }
            };
            trace!(viewer = %viewer, kind = message.kind(), "Sending message to viewer");
            if let Err(err) = sender.send(Message::Text(json.into())).await {
                debug!(viewer = %viewer, error = %err, "Failed to send to viewer");
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_frame(&pipeline, viewer, text.as_str()).await,
            Ok(Message::Binary(_)) => {
                pipeline
                    .hub()
                    .send_to(viewer, ServerMessage::error("Invalid message: expected a text frame"))
                    .await;
            }
            Ok(Message::Close(_)) => {
                debug!(viewer = %viewer, "Viewer sent close frame");
                break;
            }
            Ok(Message::Ping(data)) => {
                // axum answers pings itself
                trace!(data_len = data.len(), "Received ping");
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                debug!(viewer = %viewer, error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    pipeline.disconnect_viewer(viewer).await;
}

async fn handle_frame(pipeline: &Pipeline, viewer: ViewerId, text: &str) {
    match ClientMessage::decode(text) {
        Ok(message) => {
            trace!(viewer = %viewer, ?message, "Received viewer message");
            pipeline.handle_client_message(viewer, message).await;
        }
        Err(err) => {
            warn!(viewer = %viewer, error = %err, "Rejected viewer message");
            pipeline
                .hub()
                .send_to(viewer, ServerMessage::error(err.viewer_message("decoding message")))
                .await;
        }
    }
}

// ============================================================================
// GET /api/health - Status
// ============================================================================

/// Response body for the status endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" if responding.
    pub status: String,

    pub timestamp: DateTime<Utc>,

    /// Number of connected viewers.
    pub connections: usize,

    pub session: u64,

    pub check_count: u64,
}

/// GET /api/health - Connection count and session counters.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.pipeline.status().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        connections: status.connections,
        session: status.session,
        check_count: status.check_count,
    })
}

// ============================================================================
// GET /api/tasks, /api/logs, /api/files
// ============================================================================

/// GET /api/tasks - The current task, or `null`.
async fn get_tasks(State(state): State<AppState>) -> Response {
    Json(state.pipeline.current_task().await).into_response()
}

/// Query parameters for the log endpoint.
#[derive(Debug, Default, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// GET /api/logs - Up to `limit` entries, newest first, read from disk.
async fn get_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    match state.pipeline.read_log_entries(limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => {
            error!(error = %err, "Failed to read log entries");
            ErrorResponse::internal(err.viewer_message("reading log"))
        }
    }
}

/// GET /api/files - Nested listing of the workspace root.
async fn get_files(State(state): State<AppState>) -> Response {
    match state.pipeline.file_tree().await {
        Ok(tree) => Json(tree).into_response(),
        Err(err) => {
            error!(error = %err, "Failed to list workspace");
            ErrorResponse::internal(err.viewer_message("getting file tree"))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
