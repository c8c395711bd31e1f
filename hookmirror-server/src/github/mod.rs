//! GitHub App client.
//!
//! Authenticates as the App with a short-lived JWT, exchanges it for
//! per-installation access tokens, and implements the check suite / check
//! run calls the bridge needs.

mod middleware;

pub use middleware::{CorrelationId, CorrelationMiddleware, CORRELATION_ID_HEADER};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookmirror_core::{CheckRunConclusion, CheckRunDescriptor, CheckRunStatus};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::bridge::{AppApi, CheckRunId, ChecksApi, SuiteId};
use crate::error::ChecksApiError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";

/// Tokens are refreshed once fewer than this many seconds remain.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;

#[derive(Clone)]
pub struct GitHubApp {
    client: ClientWithMiddleware,
    api_url: String,
    app_id: u64,
    encoding_key: Arc<EncodingKey>,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateCheckSuiteRequest<'a> {
    head_sha: &'a str,
    head_branch: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CheckRunOutput<'a> {
    pub title: &'a str,
    pub summary: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateCheckRunRequest<'a> {
    name: &'a str,
    head_sha: &'a str,
    details_url: &'a str,
    external_id: &'a str,
    status: CheckRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<CheckRunConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    output: CheckRunOutput<'a>,
}

#[derive(Debug, Serialize)]
struct UpdateCheckRunRequest<'a> {
    name: &'a str,
    details_url: &'a str,
    external_id: &'a str,
    status: CheckRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<CheckRunConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    output: CheckRunOutput<'a>,
}

impl<'a> CreateCheckRunRequest<'a> {
    fn from_descriptor(run: &'a CheckRunDescriptor) -> Self {
        Self {
            name: &run.name,
            head_sha: &run.head_sha,
            details_url: &run.details_url,
            external_id: &run.external_id,
            status: run.status,
            conclusion: run.conclusion,
            started_at: run.started_at,
            completed_at: run.completed_at,
            output: CheckRunOutput {
                title: &run.title,
                summary: &run.summary,
            },
        }
    }
}

impl<'a> UpdateCheckRunRequest<'a> {
    fn from_descriptor(run: &'a CheckRunDescriptor) -> Self {
        Self {
            name: &run.name,
            details_url: &run.details_url,
            external_id: &run.external_id,
            status: run.status,
            conclusion: run.conclusion,
            completed_at: run.completed_at,
            output: CheckRunOutput {
                title: &run.title,
                summary: &run.summary,
            },
        }
    }
}

impl GitHubApp {
    pub fn new(app_id: u64, private_key: &str, api_url: impl Into<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let encoding_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .context("Failed to parse GitHub App private key")?;

        Ok(Self {
            client: create_github_client()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            app_id,
            encoding_key: Arc::new(encoding_key),
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn generate_jwt(&self) -> Result<String, ChecksApiError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ChecksApiError::Auth(format!("system clock before epoch: {}", e)))?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| ChecksApiError::Auth(format!("failed to encode JWT: {}", e)))
    }

    async fn installation_token(&self, installation_id: u64) -> Result<String, ChecksApiError> {
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                let remaining = expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default();
                if remaining.as_secs() > TOKEN_REFRESH_MARGIN_SECS {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );

        info!(
            "Requesting new access token for installation {}",
            installation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", ACCEPT_GITHUB_JSON)
            .send()
            .await?;

        let token_response: InstallationTokenResponse =
            decode(check_response(response, "installation token").await?).await?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .map_err(|e| ChecksApiError::Decode(format!("token expiry: {}", e)))?
            .with_timezone(&Utc);
        let expires_at = UNIX_EPOCH + Duration::from_secs(expires_at.timestamp().max(0) as u64);

        self.token_cache
            .write()
            .await
            .insert(installation_id, (token_response.token.clone(), expires_at));

        Ok(token_response.token)
    }

    async fn installation_request(
        &self,
        installation_id: u64,
        builder: RequestBuilder,
    ) -> Result<RequestBuilder, ChecksApiError> {
        let token = self.installation_token(installation_id).await?;
        Ok(builder
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", ACCEPT_GITHUB_JSON))
    }
}

#[async_trait]
impl AppApi for GitHubApp {
    async fn find_repository_installation(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<u64, ChecksApiError> {
        let jwt = self.generate_jwt()?;
        let url = format!("{}/repos/{}/{}/installation", self.api_url, owner, name);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", ACCEPT_GITHUB_JSON)
            .send()
            .await?;

        let installation: IdResponse =
            decode(check_response(response, "repository installation").await?).await?;
        Ok(installation.id)
    }

    fn installation_client(&self, installation_id: u64) -> Arc<dyn ChecksApi> {
        Arc::new(InstallationClient {
            app: self.clone(),
            installation_id,
        })
    }
}

/// [`ChecksApi`] authenticated as one installation of the App.
pub struct InstallationClient {
    app: GitHubApp,
    installation_id: u64,
}

#[async_trait]
impl ChecksApi for InstallationClient {
    async fn create_check_suite(
        &self,
        owner: &str,
        name: &str,
        head_sha: &str,
        head_branch: &str,
    ) -> Result<SuiteId, ChecksApiError> {
        let url = format!("{}/repos/{}/{}/check-suites", self.app.api_url, owner, name);
        let body = serde_json::to_string(&CreateCheckSuiteRequest {
            head_sha,
            head_branch,
        })
        .map_err(|e| ChecksApiError::Decode(e.to_string()))?;

        let request = self
            .app
            .installation_request(self.installation_id, self.app.client.post(&url))
            .await?
            .header("Content-Type", "application/json")
            .body(body);

        let suite: IdResponse =
            decode(check_response(request.send().await?, "create check suite").await?).await?;
        Ok(SuiteId(suite.id))
    }

    async fn create_check_run(
        &self,
        owner: &str,
        name: &str,
        run: &CheckRunDescriptor,
    ) -> Result<CheckRunId, ChecksApiError> {
        let url = format!("{}/repos/{}/{}/check-runs", self.app.api_url, owner, name);
        let body = serde_json::to_string(&CreateCheckRunRequest::from_descriptor(run))
            .map_err(|e| ChecksApiError::Decode(e.to_string()))?;

        let request = self
            .app
            .installation_request(self.installation_id, self.app.client.post(&url))
            .await?
            .header("Content-Type", "application/json")
            .body(body);

        let check_run: IdResponse =
            decode(check_response(request.send().await?, "create check run").await?).await?;
        Ok(CheckRunId(check_run.id))
    }

    async fn update_check_run(
        &self,
        owner: &str,
        name: &str,
        run_id: CheckRunId,
        run: &CheckRunDescriptor,
    ) -> Result<CheckRunId, ChecksApiError> {
        let url = format!(
            "{}/repos/{}/{}/check-runs/{}",
            self.app.api_url, owner, name, run_id
        );
        let body = serde_json::to_string(&UpdateCheckRunRequest::from_descriptor(run))
            .map_err(|e| ChecksApiError::Decode(e.to_string()))?;

        let request = self
            .app
            .installation_request(self.installation_id, self.app.client.patch(&url))
            .await?
            .header("Content-Type", "application/json")
            .body(body);

        let check_run: IdResponse =
            decode(check_response(request.send().await?, "update check run").await?).await?;
        Ok(CheckRunId(check_run.id))
    }
}

/// Turn a non-2xx response into the matching error, keeping 422 distinct.
async fn check_response(response: Response, operation: &str) -> Result<Response, ChecksApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(ChecksApiError::Unprocessable(body));
    }

    error!("GitHub API error during {}: {} - {}", operation, status, body);
    Err(ChecksApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ChecksApiError> {
    response
        .json()
        .await
        .map_err(|e| ChecksApiError::Decode(e.to_string()))
}

pub fn create_github_client() -> anyhow::Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(format!("hookmirror/{}", hookmirror_core::version()))
        .timeout(Duration::from_secs(30))
        .build()?;

    Ok(ClientBuilder::new(client)
        .with(CorrelationMiddleware)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn descriptor() -> CheckRunDescriptor {
        CheckRunDescriptor {
            name: "build".to_string(),
            head_sha: "abc".to_string(),
            details_url: "https://gitlab.example.com/g/p/-/jobs/1".to_string(),
            external_id: "1".to_string(),
            status: CheckRunStatus::Completed,
            conclusion: Some(CheckRunConclusion::Success),
            title: "Job successful".to_string(),
            summary: "ok".to_string(),
            started_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            completed_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap()),
        }
    }

    #[test]
    fn test_create_request_body() {
        let run = descriptor();
        let body = serde_json::to_value(CreateCheckRunRequest::from_descriptor(&run)).unwrap();
        assert_eq!(body["head_sha"], "abc");
        assert_eq!(body["status"], "completed");
        assert_eq!(body["conclusion"], "success");
        assert_eq!(body["started_at"], "2024-01-01T00:00:00Z");
        assert_eq!(body["output"]["title"], "Job successful");
    }

    #[test]
    fn test_update_request_body_omits_start_and_sha() {
        let run = descriptor();
        let body = serde_json::to_value(UpdateCheckRunRequest::from_descriptor(&run)).unwrap();
        assert!(body.get("started_at").is_none());
        assert!(body.get("head_sha").is_none());
        assert_eq!(body["completed_at"], "2024-01-01T00:01:00Z");
        assert_eq!(body["external_id"], "1");
    }

    #[test]
    fn test_queued_request_omits_conclusion() {
        let mut run = descriptor();
        run.status = CheckRunStatus::Queued;
        run.conclusion = None;
        run.started_at = None;
        run.completed_at = None;

        let body = serde_json::to_value(CreateCheckRunRequest::from_descriptor(&run)).unwrap();
        assert_eq!(
            body,
            json!({
                "name": "build",
                "head_sha": "abc",
                "details_url": "https://gitlab.example.com/g/p/-/jobs/1",
                "external_id": "1",
                "status": "queued",
                "output": { "title": "Job successful", "summary": "ok" }
            })
        );
    }

    #[test]
    fn test_new_rejects_invalid_key() {
        assert!(GitHubApp::new(1, "not a pem", DEFAULT_API_URL).is_err());
    }
}
