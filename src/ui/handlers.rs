//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::error::{Error, SessionError};
use crate::session::{SessionState, SessionStatus};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Session status, level included
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionStatus>> {
    Json(ApiResponse::ok(state.session.status()))
}

/// Get available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    let devices = list_devices();
    Json(ApiResponse::ok(devices))
}

/// Start the session; resolves once streaming or failed
pub async fn start_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<SessionState>>) {
    match state.session.start().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(state.session.state()))),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.user_reason()))),
    }
}

/// Stop the session
pub async fn stop_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionState>> {
    state.session.stop().await;
    Json(ApiResponse::ok(state.session.state()))
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Session(SessionError::AlreadyActive(_)) => StatusCode::CONFLICT,
        Error::Session(SessionError::Cancelled) => StatusCode::CONFLICT,
        Error::Session(SessionError::MissingCredential) => StatusCode::PRECONDITION_FAILED,
        Error::Audio(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Network(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
