use hookmirror_core::{CheckRunDescriptor, PartitionGuard};
use tracing::{error, info};

use super::api::{CheckRunId, ChecksApi};
use super::record::{BridgeRepository, BuildId, CommitSha};
use crate::error::ChecksApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSync {
    Created(CheckRunId),
    Updated(CheckRunId),
}

impl RunSync {
    pub fn run_id(&self) -> CheckRunId {
        match self {
            Self::Created(id) | Self::Updated(id) => *id,
        }
    }
}

/// Create or update the check run for `build` while its commit is held.
///
/// Creates when nothing is cached or when the run is in progress; updates the
/// cached run otherwise. The cache is written only when the returned ID
/// differs from the cached one.
pub async fn sync_check_run(
    api: &dyn ChecksApi,
    repo: &BridgeRepository,
    _held: &PartitionGuard<'_, CommitSha>,
    build: BuildId,
    run: &CheckRunDescriptor,
) -> Result<RunSync, ChecksApiError> {
    let cached = repo.runs.get(build).await;
    let update_of = cached.filter(|_| !run.requires_create());

    let result = match update_of {
        Some(run_id) => api
            .update_check_run(&repo.owner, &repo.name, run_id, run)
            .await
            .map(RunSync::Updated),
        None => api
            .create_check_run(&repo.owner, &repo.name, run)
            .await
            .map(RunSync::Created),
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                "Failed to {} check run {:?} for build {} at {} in {}: {}",
                if update_of.is_some() { "update" } else { "create" },
                run.name,
                build.0,
                run.head_sha,
                repo.full_name(),
                e
            );
            return Err(e);
        }
    };

    let run_id = outcome.run_id();
    if cached != Some(run_id) {
        repo.runs.put(build, run_id).await;
    }

    info!(
        "{} check run {} for build {} on {} ({:?})",
        match outcome {
            RunSync::Created(_) => "Created",
            RunSync::Updated(_) => "Updated",
        },
        run_id,
        build.0,
        repo.full_name(),
        run.status
    );

    Ok(outcome)
}
