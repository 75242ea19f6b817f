//! HTTP API over the stepping engine.
//!
//! - GET /state  current snapshot
//! - POST /reset reset, optionally with a new config as the JSON body
//! - GET /info   config and run status
//! - GET /health liveness check

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coherence3d::EngineStatus;
use crossbeam_channel::Sender;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::stepper::{describe, Command, Shared};

// =============================================================================
// STATE
// =============================================================================

/// Everything the handlers need: the published state and the command channel.
pub struct AppState<C> {
    pub shared: Arc<Shared<C>>,
    pub commands: Sender<Command<C>>,
    /// How long a reset request waits for the stepper to answer
    pub reset_timeout: Duration,
}

/// Bounds a config type needs to travel through the API.
pub trait ApiConfig: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<C> ApiConfig for C where C: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub detail: String,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct InfoResponse<C> {
    pub config: C,
    pub step: u64,
    pub time: f64,
    pub status: EngineStatus,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub step: u64,
    pub status: EngineStatus,
}

/// Error reply: status code plus a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// GET /state
async fn state_handler<C: ApiConfig>(State(state): State<Arc<AppState<C>>>) -> Result<Response, ApiError> {
    let snapshot = state.shared.snapshot();
    let json = snapshot
        .to_json()
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

/// POST /reset
///
/// An empty body restarts with the current config.
async fn reset_handler<C: ApiConfig>(
    State(state): State<Arc<AppState<C>>>,
    body: Bytes,
) -> Result<Json<ResetResponse>, ApiError> {
    let config = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let parsed: C = serde_json::from_slice(&body)
            .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid config body: {}", err)))?;
        Some(parsed)
    };

    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
    state
        .commands
        .send(Command::Reset {
            config,
            reply: reply_tx,
        })
        .map_err(|_| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "stepper is not running"))?;

    let timeout = state.reset_timeout;
    let outcome = tokio::task::spawn_blocking(move || reply_rx.recv_timeout(timeout))
        .await
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    match outcome {
        Ok(Ok(())) => {
            let snapshot = state.shared.snapshot();
            Ok(Json(ResetResponse {
                step: snapshot.step,
                status: snapshot.status.clone(),
            }))
        }
        Ok(Err(message)) => Err(ApiError::new(StatusCode::BAD_REQUEST, message)),
        Err(_) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "stepper did not answer the reset request",
        )),
    }
}

/// GET /info
async fn info_handler<C: ApiConfig>(State(state): State<Arc<AppState<C>>>) -> Json<InfoResponse<C>> {
    let snapshot = state.shared.snapshot();
    Json(InfoResponse {
        config: state.shared.config(),
        step: snapshot.step,
        time: snapshot.time,
        status: snapshot.status.clone(),
        uptime_secs: state.shared.uptime().as_secs(),
    })
}

/// GET /health
async fn health_handler<C: ApiConfig>(State(state): State<Arc<AppState<C>>>) -> Json<HealthResponse> {
    let snapshot = state.shared.snapshot();
    Json(HealthResponse {
        status: if snapshot.status.is_running() { "ok" } else { "diverged" },
        detail: describe(&snapshot.status),
        uptime_secs: state.shared.uptime().as_secs(),
    })
}

/// Build the router.
pub fn router<C: ApiConfig>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/state", get(state_handler::<C>))
        .route("/reset", post(reset_handler::<C>))
        .route("/info", get(info_handler::<C>))
        .route("/health", get(health_handler::<C>))
        .with_state(state)
}

// =============================================================================
// TESTS
// =============================================================================
