//! Registered push mirrors and CI bridge records, persisted as one JSON file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::bridge::{BridgeConfig, BridgeRepository};
use crate::push::PushMirror;

/// On-disk layout of the registry.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub mirrors: BTreeMap<String, PushMirror>,
    #[serde(default)]
    pub ci: BTreeMap<u64, BridgeConfig>,
}

pub struct Registry {
    path: Option<PathBuf>,
    mirrors: RwLock<BTreeMap<String, Arc<PushMirror>>>,
    bridges: RwLock<BTreeMap<u64, Arc<BridgeRepository>>>,
    save_lock: Mutex<()>,
}

impl Registry {
    /// A registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self::from_file(None, RegistryFile::default())
    }

    /// Load the registry at `path`; a missing file yields an empty registry.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse registry {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No registry at {}, starting empty", path.display());
                RegistryFile::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read registry {}", path.display()))
            }
        };

        let registry = Self::from_file(Some(path), file);
        info!(
            "Loaded {} push mirrors and {} CI bridges",
            registry.mirrors.read().await.len(),
            registry.bridges.read().await.len()
        );
        Ok(registry)
    }

    fn from_file(path: Option<PathBuf>, file: RegistryFile) -> Self {
        let mirrors = file
            .mirrors
            .into_iter()
            .map(|(name, mut mirror)| {
                mirror.name = name.clone();
                (name, Arc::new(mirror))
            })
            .collect();
        let bridges = file
            .ci
            .into_iter()
            .map(|(project_id, mut config)| {
                config.project_id = project_id;
                (project_id, Arc::new(BridgeRepository::new(config)))
            })
            .collect();

        Self {
            path,
            mirrors: RwLock::new(mirrors),
            bridges: RwLock::new(bridges),
            save_lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> RegistryFile {
        let mirrors = self
            .mirrors
            .read()
            .await
            .iter()
            .map(|(name, mirror)| (name.clone(), mirror.as_ref().clone()))
            .collect();

        let bridges: Vec<_> = self.bridges.read().await.values().cloned().collect();
        let mut ci = BTreeMap::new();
        for bridge in bridges {
            ci.insert(bridge.project_id, bridge.to_config().await);
        }

        RegistryFile { mirrors, ci }
    }

    /// Write the registry to disk by replacing the file atomically.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _saving = self.save_lock.lock().await;
        let data = serde_json::to_vec_pretty(&self.snapshot().await)
            .context("Failed to serialize registry")?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!("Saved registry to {}", path.display());
        Ok(())
    }

    pub async fn mirror(&self, full_name: &str) -> Option<Arc<PushMirror>> {
        self.mirrors.read().await.get(full_name).cloned()
    }

    pub async fn mirror_names(&self) -> Vec<String> {
        self.mirrors.read().await.keys().cloned().collect()
    }

    pub async fn insert_mirror(&self, mirror: PushMirror) {
        self.mirrors
            .write()
            .await
            .insert(mirror.name.clone(), Arc::new(mirror));
    }

    pub async fn remove_mirror(&self, full_name: &str) -> Option<Arc<PushMirror>> {
        self.mirrors.write().await.remove(full_name)
    }

    pub async fn bridge(&self, project_id: u64) -> Option<Arc<BridgeRepository>> {
        self.bridges.read().await.get(&project_id).cloned()
    }

    pub async fn bridges(&self) -> Vec<Arc<BridgeRepository>> {
        self.bridges.read().await.values().cloned().collect()
    }

    /// Register a bridge record, replacing any record for the same project.
    pub async fn insert_bridge(&self, config: BridgeConfig) -> Arc<BridgeRepository> {
        let bridge = Arc::new(BridgeRepository::new(config));
        self.bridges
            .write()
            .await
            .insert(bridge.project_id, bridge.clone());
        bridge
    }

    pub async fn remove_bridge(&self, project_id: u64) -> Option<Arc<BridgeRepository>> {
        self.bridges.write().await.remove(&project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::InstallationState;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry_path(dir: &TempDir) -> PathBuf {
        dir.path().join("mirrors.json")
    }

    fn bridge_config(project_id: u64) -> BridgeConfig {
        BridgeConfig {
            project_id,
            owner: "octo".to_string(),
            name: "widget".to_string(),
            secret: "s3cret".to_string(),
            installation: InstallationState::Unresolved,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(registry_path(&dir)).await.unwrap();
        assert!(registry.mirror_names().await.is_empty());
        assert!(registry.bridges().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = registry_path(&dir);
        let registry = Registry::load(&path).await.unwrap();
        registry
            .insert_mirror(PushMirror {
                name: "octo/widget".to_string(),
                target: "git@mirror.example.com:octo/widget.git".to_string(),
                source: String::new(),
                secret: "hook".to_string(),
                push_key: String::new(),
                pull_key: String::new(),
            })
            .await;
        let bridge = registry.insert_bridge(bridge_config(7)).await;
        bridge.set_installation_state(InstallationState::Resolved(42)).await;
        registry.save().await.unwrap();
        assert!(!dir.path().join("mirrors.json.tmp").exists());

        let reloaded = Registry::load(&path).await.unwrap();
        assert_eq!(reloaded.mirror_names().await, vec!["octo/widget"]);
        let bridge = reloaded.bridge(7).await.unwrap();
        assert_eq!(bridge.full_name(), "octo/widget");
        assert!(bridge.verify_token("s3cret"));
        assert_eq!(
            bridge.installation_state().await,
            InstallationState::Resolved(42)
        );
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = registry_path(&dir);
        std::fs::write(
            &path,
            serde_json::to_vec(&json!({
                "mirrors": {
                    "octo/widget": { "name": "ignored", "target": "git@x:y.git" }
                },
                "ci": {
                    "12": {
                        "project_id": 0,
                        "owner": "octo",
                        "name": "widget",
                        "secret": "t",
                        "installation": { "state": "failed" }
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let registry = Registry::load(&path).await.unwrap();
        assert_eq!(
            registry.mirror("octo/widget").await.unwrap().name,
            "octo/widget"
        );
        let bridge = registry.bridge(12).await.unwrap();
        assert_eq!(bridge.project_id, 12);
        assert_eq!(
            bridge.installation_state().await,
            InstallationState::PermanentFailure
        );
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = registry_path(&dir);
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(Registry::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = Registry::in_memory();
        registry.insert_bridge(bridge_config(1)).await;
        assert!(registry.remove_bridge(1).await.is_some());
        assert!(registry.remove_bridge(1).await.is_none());
        assert!(registry.bridge(1).await.is_none());
        registry.save().await.unwrap();
    }
}
