//! Status types for the status endpoint.

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{Json, Response},
};
use serde::Serialize;

use crate::admin::validate_auth;
use crate::bridge::{BridgeRepository, InstallationState};
use crate::registry::Registry;
use crate::AppState;

/// A CI bridge entry for the status page.
#[derive(Debug, Serialize)]
pub struct BridgeStatusEntry {
    pub project_id: u64,
    pub repository: String,
    pub installation: InstallationState,
    pub cached_suites: usize,
    pub cached_runs: usize,
    pub run_cache_writes: u64,
}

impl BridgeStatusEntry {
    pub async fn from_repository(repo: &BridgeRepository) -> Self {
        Self {
            project_id: repo.project_id,
            repository: repo.full_name(),
            installation: repo.installation_state().await,
            cached_suites: repo.suites.len().await,
            cached_runs: repo.runs.len().await,
            run_cache_writes: repo.runs.write_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub ci_bridge_enabled: bool,
    pub push_mirrors: Vec<String>,
    pub ci_bridges: Vec<BridgeStatusEntry>,
}

impl StatusData {
    pub async fn collect(registry: &Registry, ci_bridge_enabled: bool, version: String) -> Self {
        let mut ci_bridges = Vec::new();
        for repo in registry.bridges().await {
            ci_bridges.push(BridgeStatusEntry::from_repository(&repo).await);
        }

        Self {
            version,
            ci_bridge_enabled,
            push_mirrors: registry.mirror_names().await,
            ci_bridges,
        }
    }
}

/// Handler: GET /status
///
/// Requires Bearer token authentication via ADMIN_SECRET.
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusData>, Response> {
    validate_auth(&headers, &state.admin_secret)?;

    Ok(Json(
        StatusData::collect(
            &state.registry,
            state.bridge.is_some(),
            hookmirror_core::version(),
        )
        .await,
    ))
}
