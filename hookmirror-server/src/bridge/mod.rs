//! GitLab CI → GitHub Checks bridge.
//!
//! Each inbound event is handled by [`Bridge`]: the installation client is
//! resolved, the event's commit is locked in the record's
//! [`PartitionLock`](hookmirror_core::PartitionLock), the check suite is
//! ensured, and the check run is created or updated. Events for different
//! commits run concurrently; events for the same commit are serialised.

mod api;
mod installation;
mod record;
mod run;
mod suite;
#[cfg(test)]
pub(crate) mod testing;

pub use api::{AppApi, CheckRunId, ChecksApi, SuiteId};
pub use installation::{InstallationResolver, Resolution};
pub use record::{
    BridgeConfig, BridgeRepository, BuildId, CommitSha, InstallationState, RunCache, SuiteCache,
    SuiteEntry,
};
pub use run::{sync_check_run, RunSync};
pub use suite::ensure_check_suite;

use std::sync::Arc;

use hookmirror_core::{CheckRunDescriptor, JobEvent, PipelineEvent};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::BridgeError;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Suite { check_suite_id: u64 },
    SuiteRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job status is not relayed.
    Discarded { status: String },
    Created { check_run_id: u64 },
    Updated { check_run_id: u64 },
}

impl From<RunSync> for JobOutcome {
    fn from(sync: RunSync) -> Self {
        match sync {
            RunSync::Created(id) => Self::Created { check_run_id: id.0 },
            RunSync::Updated(id) => Self::Updated { check_run_id: id.0 },
        }
    }
}

pub struct Bridge {
    resolver: InstallationResolver,
    registry: Arc<Registry>,
}

impl Bridge {
    pub fn new(app: Arc<dyn AppApi>, registry: Arc<Registry>) -> Self {
        Self {
            resolver: InstallationResolver::new(app),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Find the record for `project_id` and check the delivery's token against it.
    pub async fn authorize(
        &self,
        project_id: u64,
        token: Option<&str>,
    ) -> Result<Arc<BridgeRepository>, BridgeError> {
        let token = token.ok_or(BridgeError::MissingToken)?;
        let repo = self
            .registry
            .bridge(project_id)
            .await
            .ok_or(BridgeError::UnknownProject(project_id))?;

        if !repo.verify_token(token) {
            return Err(BridgeError::InvalidToken(project_id));
        }
        Ok(repo)
    }

    async fn client(&self, repo: &BridgeRepository) -> Result<Arc<dyn ChecksApi>, BridgeError> {
        let resolution = self.resolver.ensure_resolved(repo).await;
        if resolution.changed {
            if let Err(e) = self.registry.save().await {
                error!("Failed to save registry after installation lookup: {:#}", e);
            }
        }
        self.resolver.client_for(repo, resolution.state).await
    }

    /// Ensure a check suite exists for the pipeline's commit.
    pub async fn handle_pipeline_event(
        &self,
        repo: &BridgeRepository,
        event: &PipelineEvent,
    ) -> Result<PipelineOutcome, BridgeError> {
        let api = self.client(repo).await?;
        let attributes = &event.object_attributes;

        let held = repo
            .commits
            .lock(CommitSha::from(attributes.sha.as_str()))
            .await;
        let entry = ensure_check_suite(api.as_ref(), repo, &held, &attributes.ref_name).await?;

        Ok(match entry {
            SuiteEntry::Created(id) => PipelineOutcome::Suite { check_suite_id: id.0 },
            SuiteEntry::Rejected => PipelineOutcome::SuiteRejected,
        })
    }

    /// Mirror one job status change onto its check run.
    pub async fn handle_job_event(
        &self,
        repo: &BridgeRepository,
        event: &JobEvent,
    ) -> Result<JobOutcome, BridgeError> {
        let Some(descriptor) = CheckRunDescriptor::for_job(event) else {
            warn!(
                "Ignoring job {} of {} with unhandled status {:?}",
                event.build_id,
                repo.full_name(),
                event.build_status
            );
            return Ok(JobOutcome::Discarded {
                status: event.build_status.clone(),
            });
        };

        let api = self.client(repo).await?;
        let held = repo.commits.lock(CommitSha::from(event.sha.as_str())).await;

        if ensure_check_suite(api.as_ref(), repo, &held, &event.ref_name)
            .await
            .is_err()
        {
            warn!(
                "Continuing with check run for build {} without a check suite",
                event.build_id
            );
        }

        let sync = sync_check_run(
            api.as_ref(),
            repo,
            &held,
            BuildId(event.build_id),
            &descriptor,
        )
        .await?;
        Ok(sync.into())
    }
}
