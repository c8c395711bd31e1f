//! Lazy GitHub App installation lookup with permanent-failure caching.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use super::api::{AppApi, ChecksApi};
use super::record::{BridgeRepository, InstallationState};
use crate::error::BridgeError;

/// Result of [`InstallationResolver::ensure_resolved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub state: InstallationState,
    /// Whether this call moved the record out of `Unresolved`.
    pub changed: bool,
}

pub struct InstallationResolver {
    app: Arc<dyn AppApi>,
    clients: RwLock<HashMap<u64, Arc<dyn ChecksApi>>>,
}

impl InstallationResolver {
    pub fn new(app: Arc<dyn AppApi>) -> Self {
        Self {
            app,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the installation for `repo` unless a previous call already did.
    ///
    /// Concurrent callers for the same record queue on its resolution mutex,
    /// so only one lookup is made. The recorded state stays readable during
    /// the lookup. A failed lookup is recorded as
    /// [`InstallationState::PermanentFailure`] and never repeated.
    pub async fn ensure_resolved(&self, repo: &BridgeRepository) -> Resolution {
        let unchanged = |state| Resolution {
            state,
            changed: false,
        };

        let state = repo.installation_state().await;
        if state != InstallationState::Unresolved {
            return unchanged(state);
        }

        let _resolving = repo.resolving.lock().await;
        let state = repo.installation_state().await;
        if state != InstallationState::Unresolved {
            return unchanged(state);
        }

        let state = match self
            .app
            .find_repository_installation(&repo.owner, &repo.name)
            .await
        {
            Ok(id) => {
                info!("Resolved {} to installation {}", repo.full_name(), id);
                InstallationState::Resolved(id)
            }
            Err(e) => {
                error!(
                    "Failed to find installation for {}, not retrying: {}",
                    repo.full_name(),
                    e
                );
                InstallationState::PermanentFailure
            }
        };
        repo.set_installation_state(state).await;

        Resolution {
            state,
            changed: true,
        }
    }

    /// Client for a resolved installation, built at most once per installation ID.
    pub async fn client_for(
        &self,
        repo: &BridgeRepository,
        state: InstallationState,
    ) -> Result<Arc<dyn ChecksApi>, BridgeError> {
        let installation_id = match state {
            InstallationState::Resolved(id) => id,
            InstallationState::Unresolved | InstallationState::PermanentFailure => {
                return Err(BridgeError::InstallationUnavailable(repo.full_name()));
            }
        };

        if let Some(client) = self.clients.read().await.get(&installation_id) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write().await;
        let client = clients
            .entry(installation_id)
            .or_insert_with(|| self.app.installation_client(installation_id));
        Ok(Arc::clone(client))
    }

    /// Number of installation clients built so far.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
