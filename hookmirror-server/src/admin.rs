//! Admin API for registering push mirrors and CI bridges.
//!
//! Every route requires `Authorization: Bearer <ADMIN_SECRET>`; without a
//! configured secret the API is disabled.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::bridge::{BridgeConfig, InstallationState};
use crate::push::PushMirror;
use crate::AppState;

/// Length of generated webhook secrets.
pub const SECRET_LENGTH: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateMirrorRequest {
    /// Source repository as `owner/name`.
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub push_key: String,
    #[serde(default)]
    pub pull_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBridgeRequest {
    pub project_id: u64,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub name: String,
    /// Secret the sender must present; generated when none was given.
    pub secret: String,
}

pub fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

fn secret_or_random(secret: String) -> String {
    if secret.trim().is_empty() {
        random_secret()
    } else {
        secret
    }
}

/// Validate the authorization header against the admin secret.
///
/// Returns `Ok(())` if authorized, or an error response if not.
#[allow(clippy::result_large_err)]
pub fn validate_auth(headers: &HeaderMap, admin_secret: &Option<String>) -> Result<(), Response> {
    let Some(expected) = admin_secret else {
        return Err((
            StatusCode::FORBIDDEN,
            "Admin API is disabled (ADMIN_SECRET not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(provided) if provided == expected => Ok(()),
        Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    validate_auth(request.headers(), &state.admin_secret)?;
    Ok(next.run(request).await)
}

async fn save_registry(state: &AppState) -> Result<(), Response> {
    state.registry.save().await.map_err(|e| {
        error!("Failed to save registry: {:#}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "registration applied but the registry could not be saved" })),
        )
            .into_response()
    })
}

async fn create_mirror(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateMirrorRequest>,
) -> Result<Json<RegistrationResponse>, Response> {
    let valid = matches!(
        request.name.split_once('/'),
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/')
    );
    if !valid {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "name must be owner/repository" })),
        )
            .into_response());
    }

    let mirror = PushMirror {
        name: request.name,
        target: request.target,
        source: request.source,
        secret: secret_or_random(request.secret),
        push_key: request.push_key,
        pull_key: request.pull_key,
    };
    let response = RegistrationResponse {
        name: mirror.name.clone(),
        secret: mirror.secret.clone(),
    };

    info!(
        "Adding push mirror {} with target {}",
        mirror.name, mirror.target
    );
    state.registry.insert_mirror(mirror).await;
    save_registry(&state).await?;

    Ok(Json(response))
}

async fn delete_mirror(
    State(state): State<Arc<AppState>>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<StatusCode, Response> {
    let full_name = format!("{}/{}", owner, name);
    if state.registry.remove_mirror(&full_name).await.is_none() {
        return Ok(StatusCode::NOT_FOUND);
    }

    info!("Removed push mirror {}", full_name);
    save_registry(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_bridge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBridgeRequest>,
) -> Result<Json<RegistrationResponse>, Response> {
    let config = BridgeConfig {
        project_id: request.project_id,
        owner: request.owner,
        name: request.name,
        secret: secret_or_random(request.secret),
        installation: InstallationState::Unresolved,
    };
    let response = RegistrationResponse {
        name: format!("{}/{}", config.owner, config.name),
        secret: config.secret.clone(),
    };

    info!(
        "Bridging GitLab project {} to {}",
        config.project_id, response.name
    );
    state.registry.insert_bridge(config).await;
    save_registry(&state).await?;

    Ok(Json(response))
}

async fn delete_bridge(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<u64>,
) -> Result<StatusCode, Response> {
    if state.registry.remove_bridge(project_id).await.is_none() {
        return Ok(StatusCode::NOT_FOUND);
    }

    info!("Removed CI bridge for project {}", project_id);
    save_registry(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn admin_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/mirrors", post(create_mirror))
        .route("/admin/mirrors/{owner}/{name}", delete(delete_mirror))
        .route("/admin/ci", post(create_bridge))
        .route("/admin/ci/{project_id}", delete(delete_bridge))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            require_admin,
        ))
}
