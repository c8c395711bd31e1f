use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, warn};

use super::WebhookResponse;
use crate::push::{PushError, PushSource};
use crate::supervisor::supervise;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct GitHubEventPayload {
    pub repository: Option<Repository>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub owner: Option<User>,
    #[serde(default)]
    pub clone_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    #[serde(default)]
    pub login: String,
}

impl Repository {
    fn owner_login(&self) -> String {
        match &self.owner {
            Some(owner) if !owner.login.is_empty() => owner.login.clone(),
            _ => self
                .full_name
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Check a `sha256=<hex>` signature over `payload`.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&signature_bytes).is_ok()
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let event = headers
        .get("x-github-event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if event != "ping" && event != "push" {
        info!("Ignoring GitHub {:?} event", event);
        return Ok(Json(WebhookResponse::new(format!("ignored {} event", event))));
    }

    let payload: GitHubEventPayload =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let Some(repository) = payload.repository else {
        if event == "ping" {
            return Ok(Json(WebhookResponse::new("pong")));
        }
        return Err(StatusCode::BAD_REQUEST);
    };

    let mirror = state
        .registry
        .mirror(&repository.full_name)
        .await
        .ok_or_else(|| {
            warn!("Webhook for unregistered repository {}", repository.full_name);
            StatusCode::NOT_FOUND
        })?;

    if !mirror.secret.is_empty() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|h| h.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if !verify_github_signature(&mirror.secret, &body, signature) {
            error!("Invalid webhook signature for {}", repository.full_name);
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    if event == "ping" {
        info!("Received webhook ping for {}", repository.full_name);
        return Ok(Json(WebhookResponse::new("pong")));
    }

    let source = PushSource {
        owner: repository.owner_login(),
        name: repository.name.clone(),
        git_url: repository.clone_url.clone(),
    };
    info!("Push to {}, mirroring to {}", mirror.name, mirror.target);

    let task_state = state.clone();
    let result: Result<(), PushError> =
        supervise(format!("push to {}", mirror.name), async move {
            let _held = task_state.push_locks.lock(mirror.name.clone()).await;
            task_state.push_runner.run(&mirror, &source).await
        })
        .await;

    match result {
        Ok(()) => Ok(Json(WebhookResponse::new(format!(
            "mirrored {}",
            repository.full_name
        )))),
        Err(e) => {
            error!("Push mirror for {} failed: {}", repository.full_name, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
