//! Inbound webhook endpoints.
//!
//! `/webhook` receives GitHub push events for push mirrors; `/ci-webhook`
//! receives GitLab pipeline and job events for the CI bridge.

mod github;
mod gitlab;

pub use github::{github_webhook_handler, verify_github_signature};
pub use gitlab::{gitlab_webhook_handler, CiResponse};

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::post,
    Router,
};
use hookmirror_core::redact_headers;
use serde::Serialize;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::github::{CorrelationId, CORRELATION_ID_HEADER};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

impl WebhookResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Tag the delivery with a correlation ID and log its sanitized headers.
///
/// The ID is reused for every GitHub request made while handling it.
async fn trace_delivery(request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "delivery",
        correlation_id = %correlation_id,
        path = %request.uri().path()
    );
    span.in_scope(|| {
        let headers = redact_headers(
            request
                .headers()
                .iter()
                .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
        );
        debug!("Webhook headers: {:?}", headers)
    });

    CorrelationId(correlation_id)
        .scope(next.run(request))
        .instrument(span)
        .await
}

pub fn webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route("/ci-webhook", post(gitlab_webhook_handler))
        .route_layer(middleware::from_fn(trace_delivery))
}
