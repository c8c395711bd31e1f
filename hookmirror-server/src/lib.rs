pub mod admin;
pub mod bridge;
pub mod config;
pub mod error;
pub mod github;
pub mod push;
pub mod registry;
pub mod status;
pub mod supervisor;
pub mod webhook;

use std::sync::Arc;

use axum::{response::Json, routing::get, Router};
use hookmirror_core::PartitionLock;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use bridge::Bridge;
pub use error::{BridgeError, ChecksApiError, TaskFault};
pub use push::PushRunner;
pub use registry::Registry;

pub struct AppState {
    pub registry: Arc<Registry>,
    /// `None` when no GitHub App is configured.
    pub bridge: Option<Arc<Bridge>>,
    pub push_runner: PushRunner,
    /// Serialises push mirroring per repository full name.
    pub push_locks: PartitionLock<String>,
    pub admin_secret: Option<String>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "hookmirror"
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status::status_handler))
        .merge(webhook::webhook_router())
        .merge(admin::admin_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
