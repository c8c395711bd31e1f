//! Outbound operations the bridge needs from GitHub.
//!
//! [`crate::github`] implements these over the REST API; tests substitute
//! recording fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hookmirror_core::CheckRunDescriptor;

use crate::error::ChecksApiError;

/// Newtype for GitHub check suite ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuiteId(pub u64);

/// Newtype for GitHub check run ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckRunId(pub u64);

impl fmt::Display for CheckRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check suite and check run calls, authenticated as one installation.
#[async_trait]
pub trait ChecksApi: Send + Sync {
    async fn create_check_suite(
        &self,
        owner: &str,
        name: &str,
        head_sha: &str,
        head_branch: &str,
    ) -> Result<SuiteId, ChecksApiError>;

    async fn create_check_run(
        &self,
        owner: &str,
        name: &str,
        run: &CheckRunDescriptor,
    ) -> Result<CheckRunId, ChecksApiError>;

    /// Update an existing run. The start time and head SHA are never sent.
    async fn update_check_run(
        &self,
        owner: &str,
        name: &str,
        run_id: CheckRunId,
        run: &CheckRunDescriptor,
    ) -> Result<CheckRunId, ChecksApiError>;
}

/// App-level operations: finding installations and minting installation clients.
#[async_trait]
pub trait AppApi: Send + Sync {
    async fn find_repository_installation(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<u64, ChecksApiError>;

    /// Build a client authenticated as `installation_id`. Expensive; callers cache the result.
    fn installation_client(&self, installation_id: u64) -> Arc<dyn ChecksApi>;
}
