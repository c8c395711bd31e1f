//! GitLab webhook payloads consumed by the CI bridge.
//!
//! Only the fields the bridge reads are modelled; everything else in the
//! delivery is ignored.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Header carrying the per-project shared secret.
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// A parsed GitLab delivery, discriminated by its `object_kind`.
#[derive(Debug, Clone)]
pub enum GitLabEvent {
    Pipeline(PipelineEvent),
    Job(JobEvent),
    /// A kind the bridge does not handle (e.g. `push`, `merge_request`).
    Other(String),
}

#[derive(Deserialize)]
struct ObjectKind {
    object_kind: String,
}

impl GitLabEvent {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let ObjectKind { object_kind } = serde_json::from_slice(body)?;
        match object_kind.as_str() {
            "pipeline" => serde_json::from_slice(body).map(Self::Pipeline),
            // Job hooks still arrive with the legacy "build" kind
            "build" => serde_json::from_slice(body).map(Self::Job),
            _ => Ok(Self::Other(object_kind)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineEvent {
    pub project: PipelineProject,
    pub object_attributes: PipelineAttributes,
}

impl PipelineEvent {
    pub fn project_id(&self) -> u64 {
        self.project.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineProject {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineAttributes {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// A job ("build") lifecycle event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobEvent {
    pub project_id: u64,
    #[serde(default)]
    pub project_name: String,
    pub build_id: u64,
    pub build_name: String,
    pub build_status: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub build_failure_reason: String,
    #[serde(default)]
    pub build_allow_failure: bool,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub build_started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub build_finished_at: Option<DateTime<Utc>>,
    pub repository: JobRepository,
}

impl JobEvent {
    /// Link to the job page on the GitLab instance.
    pub fn details_url(&self) -> String {
        format!(
            "{}/-/jobs/{}",
            self.repository.homepage.trim_end_matches('/'),
            self.build_id
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRepository {
    #[serde(default)]
    pub homepage: String,
}

/// Parse a GitLab timestamp.
///
/// Webhooks use `2021-02-23 02:41:37 UTC`; some instances send RFC 3339 or
/// a numeric offset instead.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S UTC").map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
