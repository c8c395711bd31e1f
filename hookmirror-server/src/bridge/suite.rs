use hookmirror_core::PartitionGuard;
use tracing::{error, info, warn};

use super::api::ChecksApi;
use super::record::{BridgeRepository, CommitSha, SuiteEntry};
use crate::error::ChecksApiError;

/// Make sure a check suite exists for the commit held by `held`.
///
/// A cached entry (including a 422 rejection) short-circuits without an API
/// call. Failures other than 422 are returned and leave the cache empty so a
/// later delivery retries.
pub async fn ensure_check_suite(
    api: &dyn ChecksApi,
    repo: &BridgeRepository,
    held: &PartitionGuard<'_, CommitSha>,
    ref_name: &str,
) -> Result<SuiteEntry, ChecksApiError> {
    let sha = held.key();
    if let Some(entry) = repo.suites.get(sha).await {
        return Ok(entry);
    }

    match api
        .create_check_suite(&repo.owner, &repo.name, &sha.0, ref_name)
        .await
    {
        Ok(suite_id) => {
            info!(
                "Created check suite {} for {}@{}",
                suite_id.0,
                repo.full_name(),
                sha
            );
            let entry = SuiteEntry::Created(suite_id);
            repo.suites.put(sha.clone(), entry).await;
            Ok(entry)
        }
        Err(ChecksApiError::Unprocessable(body)) => {
            warn!(
                "GitHub refused a check suite for {}@{} ({}); not retrying",
                repo.full_name(),
                sha,
                body
            );
            repo.suites.put(sha.clone(), SuiteEntry::Rejected).await;
            Ok(SuiteEntry::Rejected)
        }
        Err(e) => {
            error!(
                "Failed to create check suite for {} at {} in {}: {}",
                ref_name,
                sha,
                repo.full_name(),
                e
            );
            Err(e)
        }
    }
}
