//! Known-good version accessor
//!
//! A version is promoted to known-good only after a pod has been observed
//! requesting it while free of watchdog failures. The map never moves
//! backwards; rollback of individual pods is the oracle's job, and a bad
//! rollout is stopped by the watchdogs preventing promotion.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{encode_version_map, parse_version_map};
use crate::cluster::{FailingPodGetter, VersionStore};
use crate::manifest::DataRepositoryManifest;
use crate::models::{annotations, PodDataRequestInfo, PodIdentifier, VersionMap};

/// Maintains the per-namespace known-good version map
pub struct KnownGoodAccessor {
    store: Arc<dyn VersionStore>,
    failing: Arc<dyn FailingPodGetter>,
}

impl KnownGoodAccessor {
    pub fn new(store: Arc<dyn VersionStore>, failing: Arc<dyn FailingPodGetter>) -> Self {
        Self { store, failing }
    }

    /// Refresh and return the known-good map for a namespace.
    ///
    /// Every returned value is a version the manifest currently lists.
    /// Repositories the manifest no longer knows are dropped. A repository
    /// seen for the first time with no healthy observation seeds at the
    /// newest published version.
    pub async fn get_or_update(
        &self,
        namespace: &str,
        manifest: &DataRepositoryManifest,
        requests: &[PodDataRequestInfo],
        cancel: &CancellationToken,
    ) -> Result<VersionMap> {
        if cancel.is_cancelled() {
            bail!("known-good refresh cancelled");
        }

        let stored = parse_version_map(self.store.load(namespace, annotations::KNOWN_GOOD).await?);
        let failing: HashSet<PodIdentifier> =
            self.failing.get(namespace).await?.into_iter().collect();

        let mut result = VersionMap::new();
        for (repo, entries) in &manifest.repositories {
            if entries.is_empty() {
                continue;
            }

            // Newest manifest version currently requested by a pod with no
            // active watchdog failure.
            let healthiest = requests
                .iter()
                .filter(|info| !failing.contains(&info.id))
                .filter(|info| info.data_sources.iter().any(|source| source == repo))
                .filter_map(|info| info.request_details(repo))
                .filter_map(|current| manifest.order_index(repo, &current.hash))
                .max();

            let stored_index = stored
                .get(repo)
                .and_then(|version| manifest.order_index(repo, version));

            let chosen = match (stored_index, healthiest) {
                (Some(stored), Some(observed)) => stored.max(observed),
                (Some(stored), None) => stored,
                (None, Some(observed)) => observed,
                (None, None) => entries.len() - 1,
            };

            result.insert(repo.clone(), entries[chosen].version.clone());
        }

        if result != stored {
            for (repo, version) in &result {
                if stored.get(repo) != Some(version) {
                    info!(
                        namespace = %namespace,
                        repo = %repo,
                        version = %version,
                        "Promoted known-good version"
                    );
                }
            }
            self.store
                .save(namespace, annotations::KNOWN_GOOD, &encode_version_map(&result))
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

        fn save_count(&self) -> u32 {
            *self.saves.lock().unwrap()
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

    struct FixedFailing(Vec<PodIdentifier>);

    #[async_trait::async_trait]
    impl FailingPodGetter for FixedFailing {
        async fn get(&self, _namespace: &str) -> Result<Vec<PodIdentifier>> {
            Ok(self.0.clone())
        }
    }

    fn manifest(repo: &str, versions: &[&str]) -> DataRepositoryManifest {
        let mut manifest = DataRepositoryManifest::default();
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
        manifest
    }

    fn pod_at(name: &str, repo: &str, version: &str) -> PodDataRequestInfo {
        let details = crate::models::DataDownloadRequestDetails {
            hash: version.to_string(),
            path: format!("{repo}/{version}.tar"),
            unix_timestamp_seconds: 1,
        };
        PodDataRequestInfo {
            id: PodIdentifier::new("prod", name),
            drop_folder: "/data".to_string(),
            data_sources: vec![repo.to_string()],
            requests: BTreeMap::from([(repo.to_string(), details.encode())]),
        }
    }

    fn accessor(failing: Vec<PodIdentifier>) -> (KnownGoodAccessor, Arc<MemoryStore>) {
        let store = MemoryStore::new();
        let accessor = KnownGoodAccessor::new(store.clone(), Arc::new(FixedFailing(failing)));
        (accessor, store)
    }

    #[tokio::test]
    async fn test_seeds_newest_without_observations() {
        let (accessor, _store) = accessor(Vec::new());
        let manifest = manifest("a", &["v1", "v2"]);
        let cancel = CancellationToken::new();

        let result = accessor
            .get_or_update("prod", &manifest, &[], &cancel)
            .await
            .unwrap();
        assert_eq!(result.get("a").map(String::as_str), Some("v2"));
    }

    #[tokio::test]
    async fn test_adopts_observed_healthy_version() {
        let (accessor, _store) = accessor(Vec::new());
        let manifest = manifest("a", &["v1", "v2"]);
        let requests = vec![pod_at("web-0", "a", "v1")];
        let cancel = CancellationToken::new();

        let result = accessor
            .get_or_update("prod", &manifest, &requests, &cancel)
            .await
            .unwrap();
        assert_eq!(result.get("a").map(String::as_str), Some("v1"));
    }

    #[tokio::test]
    async fn test_promotes_forward_from_healthy_pod() {
        let (accessor, store) = accessor(Vec::new());
        let manifest = manifest("a", &["v1", "v2"]);
        let cancel = CancellationToken::new();

        let first = accessor
            .get_or_update("prod", &manifest, &[pod_at("web-0", "a", "v1")], &cancel)
            .await
            .unwrap();
        assert_eq!(first.get("a").map(String::as_str), Some("v1"));

        let second = accessor
            .get_or_update("prod", &manifest, &[pod_at("web-0", "a", "v2")], &cancel)
            .await
            .unwrap();
        assert_eq!(second.get("a").map(String::as_str), Some("v2"));
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_pods_do_not_promote() {
        let (accessor, _store) = accessor(vec![PodIdentifier::new("prod", "web-1")]);
        let manifest = manifest("a", &["v1", "v2"]);
        let requests = vec![pod_at("web-0", "a", "v1"), pod_at("web-1", "a", "v2")];
        let cancel = CancellationToken::new();

        let result = accessor
            .get_or_update("prod", &manifest, &requests, &cancel)
            .await
            .unwrap();
        assert_eq!(result.get("a").map(String::as_str), Some("v1"));
    }

    #[tokio::test]
    async fn test_never_demotes() {
        let (accessor, _store) = accessor(Vec::new());
        let manifest = manifest("a", &["v1", "v2"]);
        let cancel = CancellationToken::new();

        accessor
            .get_or_update("prod", &manifest, &[pod_at("web-0", "a", "v2")], &cancel)
            .await
            .unwrap();

        let after = accessor
            .get_or_update("prod", &manifest, &[pod_at("web-0", "a", "v1")], &cancel)
            .await
            .unwrap();
        assert_eq!(after.get("a").map(String::as_str), Some("v2"));
    }

    #[tokio::test]
    async fn test_drops_repos_missing_from_manifest() {
        let (accessor, store) = accessor(Vec::new());
        store
            .save("prod", annotations::KNOWN_GOOD, r#"{"gone":"v9","a":"v1"}"#)
            .await
            .unwrap();
        let manifest = manifest("a", &["v1", "v2"]);
        let cancel = CancellationToken::new();

        let result = accessor
            .get_or_update("prod", &manifest, &[], &cancel)
            .await
            .unwrap();
        assert!(!result.contains_key("gone"));
        assert_eq!(result.get("a").map(String::as_str), Some("v1"));
    }

    #[tokio::test]
    async fn test_skips_save_when_unchanged() {
        let (accessor, store) = accessor(Vec::new());
        let manifest = manifest("a", &["v1"]);
        let requests = vec![pod_at("web-0", "a", "v1")];
        let cancel = CancellationToken::new();

        accessor
            .get_or_update("prod", &manifest, &requests, &cancel)
            .await
            .unwrap();
        accessor
            .get_or_update("prod", &manifest, &requests, &cancel)
            .await
            .unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_errors() {
        let (accessor, _store) = accessor(Vec::new());
        let manifest = manifest("a", &["v1"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(accessor
            .get_or_update("prod", &manifest, &[], &cancel)
            .await
            .is_err());
    }
}
