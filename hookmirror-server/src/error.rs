//! Error taxonomy for the CI bridge and the request supervisor.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures talking to the GitHub API.
#[derive(Debug, Error)]
pub enum ChecksApiError {
    /// HTTP 422: GitHub will never accept this request as sent.
    #[error("GitHub rejected the request as unprocessable: {0}")]
    Unprocessable(String),

    #[error("GitHub API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("request to GitHub failed: {0}")]
    Transport(String),

    #[error("GitHub App authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode GitHub response: {0}")]
    Decode(String),
}

impl From<reqwest_middleware::Error> for ChecksApiError {
    fn from(error: reqwest_middleware::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// A handler task that panicked or was aborted instead of returning.
#[derive(Debug, Clone, Error)]
#[error("{description} failed unexpectedly: {message}")]
pub struct TaskFault {
    pub description: String,
    pub message: String,
}

/// Outcome of handling one inbound CI event, other than success.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing X-Gitlab-Token header")]
    MissingToken,

    #[error("unknown project {0}")]
    UnknownProject(u64),

    #[error("invalid token for project {0}")]
    InvalidToken(u64),

    #[error("CI bridge is not configured")]
    Disabled,

    #[error("no GitHub App installation available for {0}")]
    InstallationUnavailable(String),

    #[error(transparent)]
    Api(#[from] ChecksApiError),

    #[error(transparent)]
    Fault(#[from] TaskFault),
}

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::MissingToken | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::UnknownProject(_) => StatusCode::NOT_FOUND,
            Self::Disabled | Self::InstallationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Api(_) => StatusCode::BAD_GATEWAY,
            Self::Fault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Fault details stay in the log.
        let message = match &self {
            Self::Fault(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
