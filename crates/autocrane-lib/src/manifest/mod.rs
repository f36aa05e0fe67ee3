//! Data repository manifest
//!
//! The manifest is the global authoritative list of available data versions
//! per repository, published by the data repo service as a JSON document.
//! Every orchestration iteration fetches it once and validates it before
//! any decisions are made.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One published version of a data repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Version identifier, unique within the repository.
    pub version: String,
    /// Publication time, unix seconds. Entries are ordered oldest-first.
    pub timestamp: i64,
    /// Repository-relative path of the blob for this version.
    pub path: String,
}

/// Available versions for every known data repository, newest-last
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRepositoryManifest {
    pub repositories: BTreeMap<String, Vec<ManifestEntry>>,
}

impl DataRepositoryManifest {
    /// Entry for a specific version of a repository.
    pub fn entry(&self, repo: &str, version: &str) -> Option<&ManifestEntry> {
        self.repositories
            .get(repo)?
            .iter()
            .find(|entry| entry.version == version)
    }

    /// Newest published entry for a repository.
    pub fn newest(&self, repo: &str) -> Option<&ManifestEntry> {
        self.repositories.get(repo)?.last()
    }

    /// Position of a version in the repository's publication order.
    pub fn order_index(&self, repo: &str, version: &str) -> Option<usize> {
        self.repositories
            .get(repo)?
            .iter()
            .position(|entry| entry.version == version)
    }

    pub fn contains_version(&self, repo: &str, version: &str) -> bool {
        self.entry(repo, version).is_some()
    }

    /// Check the manifest invariants: versions within a repository are
    /// unique, strictly ordered by timestamp, and carry a blob path.
    pub fn validate(&self) -> Result<()> {
        for (repo, entries) in &self.repositories {
            let mut seen = std::collections::BTreeSet::new();
            let mut last_timestamp = i64::MIN;
            for entry in entries {
                if entry.version.is_empty() {
                    bail!("repository {repo} has an entry with an empty version");
                }
                if entry.path.is_empty() {
                    bail!("repository {repo} version {} has no blob path", entry.version);
                }
                if !seen.insert(entry.version.as_str()) {
                    bail!("repository {repo} lists version {} twice", entry.version);
                }
                if entry.timestamp <= last_timestamp {
                    bail!(
                        "repository {repo} version {} is not ordered by timestamp",
                        entry.version
                    );
                }
                last_timestamp = entry.timestamp;
            }
        }
        Ok(())
    }
}

/// Source of the global data repository manifest
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<DataRepositoryManifest>;
}

/// Manifest fetcher reading a JSON document over HTTP
pub struct HttpManifestFetcher {
    url: String,
    client: reqwest::Client,
}

impl HttpManifestFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<DataRepositoryManifest> {
        let request = async {
            let manifest: DataRepositoryManifest = self
                .client
                .get(self.url.as_str())
                .send()
                .await
                .with_context(|| format!("Failed to fetch manifest from {}", self.url))?
                .error_for_status()
                .context("Manifest endpoint returned an error status")?
                .json()
                .await
                .context("Failed to parse manifest document")?;
            manifest.validate()?;
            Ok(manifest)
        };

        tokio::select! {
            _ = cancel.cancelled() => bail!("manifest fetch cancelled"),
            result = request => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(repo: &str, entries: &[(&str, i64)]) -> DataRepositoryManifest {
        let mut manifest = DataRepositoryManifest::default();
        manifest.repositories.insert(
            repo.to_string(),
            entries
                .iter()
                .map(|(version, timestamp)| ManifestEntry {
                    version: version.to_string(),
                    timestamp: *timestamp,
                    path: format!("{repo}/{version}.tar"),
                })
                .collect(),
        );
        manifest
    }

    #[test]
    fn test_newest_is_last_entry() {
        let manifest = manifest_with("maps", &[("v1", 100), ("v2", 200)]);
        assert_eq!(manifest.newest("maps").unwrap().version, "v2");
        assert!(manifest.newest("absent").is_none());
    }

    #[test]
    fn test_order_index_follows_publication_order() {
        let manifest = manifest_with("maps", &[("v1", 100), ("v2", 200), ("v3", 300)]);
        assert_eq!(manifest.order_index("maps", "v1"), Some(0));
        assert_eq!(manifest.order_index("maps", "v3"), Some(2));
        assert_eq!(manifest.order_index("maps", "v9"), None);
    }

    #[test]
    fn test_validate_accepts_ordered_unique_versions() {
        let manifest = manifest_with("maps", &[("v1", 100), ("v2", 200)]);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_versions() {
        let manifest = manifest_with("maps", &[("v1", 100), ("v1", 200)]);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_timestamps() {
        let manifest = manifest_with("maps", &[("v1", 200), ("v2", 100)]);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_path() {
        let mut manifest = manifest_with("maps", &[("v1", 100)]);
        manifest.repositories.get_mut("maps").unwrap()[0].path.clear();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_json_shape() {
        let json = serde_json::json!({
            "repositories": {
                "maps": [
                    {"version": "v1", "timestamp": 100, "path": "maps/v1.tar"},
                    {"version": "v2", "timestamp": 200, "path": "maps/v2.tar"}
                ]
            }
        });

        let manifest: DataRepositoryManifest = serde_json::from_value(json).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.entry("maps", "v2").unwrap().path, "maps/v2.tar");
    }
}
