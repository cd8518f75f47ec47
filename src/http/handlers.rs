//! Route handlers for run, stop, list, and health.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::models::session::{SessionSummary, StopOutcome};
use crate::runner::{RunTarget, StreamFrame};
use crate::transform::OutputFormat;
use crate::AppError;

/// Header carrying the session token on a run response.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Header carrying the URL-encoded command text on a run response.
pub const COMMAND_HEADER: &str = "x-command";

/// Body of `POST /api/run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Command to start.
    pub command: Option<String>,
    /// Existing session to reattach to.
    pub session_id: Option<String>,
    /// Output transformer selection for new commands.
    #[serde(default)]
    pub output: OutputFormat,
}

/// Body of `POST /api/stop`.
#[derive(Debug, Deserialize)]
pub struct StopRequest {
    /// Session to stop.
    pub session_id: String,
}

/// HTTP error with a status code and a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match err {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// `GET /health`: liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

/// `POST /api/run`: start a command or reattach, streaming its log as SSE.
///
/// # Errors
///
/// 400 for an invalid request body, 404 for an unknown session.
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Result<Response, ApiError> {
    let target = RunTarget::from_parts(request.command, request.session_id, request.output)?;
    let subscription = state.runner.run(target)?;
    info!(session_id = subscription.session_id(), "subscriber attached over http");

    let headers = [
        (
            HeaderName::from_static(SESSION_ID_HEADER),
            header_value(subscription.session_id())?,
        ),
        (
            HeaderName::from_static(COMMAND_HEADER),
            header_value(&subscription.encoded_command())?,
        ),
        (
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ),
    ];

    let shutdown = state.shutdown.clone();
    let frames = subscription
        .into_frames()
        .take_until(shutdown.cancelled_owned())
        .map(|frame| Ok::<_, Infallible>(sse_event(&frame)));

    Ok((headers, Sse::new(frames)).into_response())
}

/// `POST /api/stop`: begin stop escalation for a session.
///
/// # Errors
///
/// 400 when `session_id` is blank.
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StopRequest>,
) -> Result<(StatusCode, Json<StopOutcome>), ApiError> {
    if request.session_id.trim().is_empty() {
        return Err(AppError::Validation("session_id must not be blank".into()).into());
    }
    let outcome = state.runner.stop(&request.session_id);
    let status = match outcome {
        StopOutcome::NotFound => StatusCode::NOT_FOUND,
        StopOutcome::AlreadyComplete { .. } | StopOutcome::Stopping => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// `GET /api/sessions`: every registered session, newest first.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.runner.list())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|err| {
        ApiError::from(AppError::Http(format!("invalid header value: {err}")))
    })
}

/// Encode one frame: events as `data: <json>`, heartbeats as an SSE comment.
fn sse_event(frame: &StreamFrame) -> Event {
    match frame {
        StreamFrame::Event(event) => Event::default().json_data(event).unwrap_or_else(|err| {
            warn!(%err, "failed to encode output event");
            Event::default().comment("encode-error")
        }),
        StreamFrame::Heartbeat => Event::default().comment("idle"),
    }
}
