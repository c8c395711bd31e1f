//! Per-project bridge state: the registered pairing plus its in-memory caches.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hookmirror_core::PartitionLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::api::{CheckRunId, SuiteId};

/// Newtype for commit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitSha(pub String);

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommitSha {
    fn from(sha: String) -> Self {
        Self(sha)
    }
}

impl From<&str> for CommitSha {
    fn from(sha: &str) -> Self {
        Self(sha.to_string())
    }
}

/// Newtype for GitLab build (job) ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildId(pub u64);

/// Where the GitHub App installation lookup for a repository stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum InstallationState {
    #[default]
    Unresolved,
    Resolved(u64),
    /// The lookup failed once; it is not retried until an operator resets it.
    #[serde(rename = "failed")]
    PermanentFailure,
}

/// Memoized outcome of creating the check suite for one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteEntry {
    Created(SuiteId),
    /// GitHub answered 422; never retried.
    Rejected,
}

/// Commit → check suite cache.
#[derive(Debug, Default)]
pub struct SuiteCache {
    entries: RwLock<HashMap<CommitSha, SuiteEntry>>,
}

impl SuiteCache {
    pub async fn get(&self, sha: &CommitSha) -> Option<SuiteEntry> {
        self.entries.read().await.get(sha).copied()
    }

    pub async fn put(&self, sha: CommitSha, entry: SuiteEntry) {
        self.entries.write().await.insert(sha, entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Build → check run cache, counting every write.
#[derive(Debug, Default)]
pub struct RunCache {
    entries: RwLock<HashMap<BuildId, CheckRunId>>,
    writes: AtomicU64,
}

impl RunCache {
    pub async fn get(&self, build: BuildId) -> Option<CheckRunId> {
        self.entries.read().await.get(&build).copied()
    }

    pub async fn put(&self, build: BuildId, run_id: CheckRunId) {
        self.entries.write().await.insert(build, run_id);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Number of `put` calls since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Persisted part of a bridge record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub project_id: u64,
    pub owner: String,
    pub name: String,
    pub secret: String,
    #[serde(default)]
    pub installation: InstallationState,
}

/// One GitLab project bridged to one GitHub repository.
#[derive(Debug)]
pub struct BridgeRepository {
    pub project_id: u64,
    pub owner: String,
    pub name: String,
    secret: String,
    installation: RwLock<InstallationState>,
    /// Held across the installation lookup so only one caller performs it.
    pub(crate) resolving: Mutex<()>,
    pub suites: SuiteCache,
    pub runs: RunCache,
    /// Serialises API calls per commit.
    pub commits: PartitionLock<CommitSha>,
}

impl BridgeRepository {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            project_id: config.project_id,
            owner: config.owner,
            name: config.name,
            secret: config.secret,
            installation: RwLock::new(config.installation),
            resolving: Mutex::new(()),
            suites: SuiteCache::default(),
            runs: RunCache::default(),
            commits: PartitionLock::new(),
        }
    }

    pub fn verify_token(&self, token: &str) -> bool {
        constant_time_eq(self.secret.as_bytes(), token.as_bytes())
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub async fn installation_state(&self) -> InstallationState {
        *self.installation.read().await
    }

    pub(crate) async fn set_installation_state(&self, state: InstallationState) {
        *self.installation.write().await = state;
    }

    pub async fn to_config(&self) -> BridgeConfig {
        BridgeConfig {
            project_id: self.project_id,
            owner: self.owner.clone(),
            name: self.name.clone(),
            secret: self.secret.clone(),
            installation: self.installation_state().await,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
