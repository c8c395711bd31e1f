use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use hookmirror_core::{GitLabEvent, GITLAB_TOKEN_HEADER};
use serde::Serialize;
use tracing::info;

use crate::bridge::{JobOutcome, PipelineOutcome};
use crate::error::BridgeError;
use crate::supervisor::supervise;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CiResponse {
    Pipeline(PipelineOutcome),
    Job(JobOutcome),
    Ignored {
        outcome: &'static str,
        object_kind: String,
    },
}

/// Receive a GitLab pipeline or job hook and relay it to GitHub.
///
/// The token is checked before any bridge state is touched; handling then
/// runs under [`supervise`] so a fault yields a 500 for this delivery only.
pub async fn gitlab_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CiResponse>, BridgeError> {
    let bridge = state.bridge.clone().ok_or(BridgeError::Disabled)?;

    let event =
        GitLabEvent::parse(&body).map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
    let token = headers
        .get(GITLAB_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(BridgeError::MissingToken)?;

    match event {
        GitLabEvent::Pipeline(event) => {
            let repo = bridge.authorize(event.project_id(), Some(token)).await?;
            info!(
                "Pipeline event for {}@{}",
                repo.full_name(),
                event.object_attributes.sha
            );

            let description = format!(
                "pipeline event for {}@{}",
                repo.full_name(),
                event.object_attributes.sha
            );
            let outcome = supervise(description, async move {
                bridge.handle_pipeline_event(&repo, &event).await
            })
            .await?;
            Ok(Json(CiResponse::Pipeline(outcome)))
        }
        GitLabEvent::Job(event) => {
            let repo = bridge.authorize(event.project_id, Some(token)).await?;
            info!(
                "Job event for {} build {} ({})",
                repo.full_name(),
                event.build_id,
                event.build_status
            );

            let description = format!("job event for {} build {}", repo.full_name(), event.build_id);
            let outcome = supervise(description, async move {
                bridge.handle_job_event(&repo, &event).await
            })
            .await?;
            Ok(Json(CiResponse::Job(outcome)))
        }
        GitLabEvent::Other(object_kind) => {
            info!("Ignoring GitLab {} event", object_kind);
            Ok(Json(CiResponse::Ignored {
                outcome: "ignored",
                object_kind,
            }))
        }
    }
}
