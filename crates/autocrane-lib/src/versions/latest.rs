//! Latest version accessor
//!
//! The latest map is the rollout target: the newest manifest entry per
//! repository, persisted so external observers can see what the namespace
//! is converging toward.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{encode_version_map, parse_version_map};
use crate::cluster::VersionStore;
use crate::manifest::DataRepositoryManifest;
use crate::models::{annotations, VersionMap};

/// Maintains the per-namespace rollout target map
pub struct LatestVersionAccessor {
    store: Arc<dyn VersionStore>,
}

impl LatestVersionAccessor {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// Refresh and return the latest map for a namespace.
    pub async fn get_or_update(
        &self,
        namespace: &str,
        manifest: &DataRepositoryManifest,
        cancel: &CancellationToken,
    ) -> Result<VersionMap> {
        if cancel.is_cancelled() {
            bail!("latest-version refresh cancelled");
        }

        let stored = parse_version_map(self.store.load(namespace, annotations::LATEST).await?);

        let mut result = VersionMap::new();
        for (repo, entries) in &manifest.repositories {
            if let Some(newest) = entries.last() {
                result.insert(repo.clone(), newest.version.clone());
            }
        }

        if result != stored {
            for (repo, version) in &result {
                if stored.get(repo) != Some(version) {
                    info!(
                        namespace = %namespace,
                        repo = %repo,
                        version = %version,
                        "Advanced rollout target"
                    );
                }
            }
            self.store
                .save(namespace, annotations::LATEST, &encode_version_map(&result))
                .await?;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct MemoryStore {
        values: Mutex<BTreeMap<(String, String), String>>,
        saves: Mutex<u32>,
    }

    impl MemoryStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                values: Mutex::new(BTreeMap::new()),
                saves: Mutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl VersionStore for MemoryStore {
        async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>> {
            Ok(self
                .values
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), key.to_string()))
                .cloned())
        }

        async fn save(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
            *self.saves.lock().unwrap() += 1;
            self.values
                .lock()
                .unwrap()
                .insert((namespace.to_string(), key.to_string()), value.to_string());
            Ok(())
        }
    }

    fn manifest(entries: &[(&str, &[&str])]) -> DataRepositoryManifest {
        let mut manifest = DataRepositoryManifest::default();
        for (repo, versions) in entries {
            manifest.repositories.insert(
                repo.to_string(),
                versions
                    .iter()
                    .enumerate()
                    .map(|(i, version)| ManifestEntry {
                        version: version.to_string(),
                        timestamp: 100 + i as i64,
                        path: format!("{repo}/{version}.tar"),
                    })
                    .collect(),
            );
        }
        manifest
    }

    #[tokio::test]
    async fn test_tracks_newest_manifest_entry() {
        let store = MemoryStore::new();
        let accessor = LatestVersionAccessor::new(store.clone());
        let cancel = CancellationToken::new();

        let result = accessor
            .get_or_update(
                "prod",
                &manifest(&[("a", &["v1", "v2"]), ("b", &["r5"])]),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(result.get("a").map(String::as_str), Some("v2"));
        assert_eq!(result.get("b").map(String::as_str), Some("r5"));
    }

    #[tokio::test]
    async fn test_persists_only_on_change() {
        let store = MemoryStore::new();
        let accessor = LatestVersionAccessor::new(store.clone());
        let cancel = CancellationToken::new();
        let manifest = manifest(&[("a", &["v1"])]);

        accessor.get_or_update("prod", &manifest, &cancel).await.unwrap();
        accessor.get_or_update("prod", &manifest, &cancel).await.unwrap();

        assert_eq!(*store.saves.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drops_repos_missing_from_manifest() {
        let store = MemoryStore::new();
        store
            .save("prod", annotations::LATEST, r#"{"gone":"v9"}"#)
            .await
            .unwrap();
        let accessor = LatestVersionAccessor::new(store.clone());
        let cancel = CancellationToken::new();

        let result = accessor
            .get_or_update("prod", &manifest(&[("a", &["v1"])]), &cancel)
            .await
            .unwrap();
        assert!(!result.contains_key("gone"));
    }

    #[tokio::test]
    async fn test_cancelled_refresh_errors() {
        let store = MemoryStore::new();
        let accessor = LatestVersionAccessor::new(store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(accessor
            .get_or_update("prod", &manifest(&[]), &cancel)
            .await
            .is_err());
    }
}
