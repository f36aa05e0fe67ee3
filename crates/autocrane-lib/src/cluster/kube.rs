//! Kubernetes implementations of the cluster collaborator traits
//!
//! All durable orchestrator state lives in annotations: per-pod download
//! requests on the pods themselves and the per-namespace version maps on a
//! sentinel `ConfigMap`. Writes use merge-patch semantics so concurrent
//! writers of disjoint keys never conflict.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, EvictParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    ExpiredObjectDeleter, FailingPodGetter, PodAnnotationPutter, PodDataRequestGetter, PodEvicter,
    VersionStore,
};
use crate::models::{annotations, PodDataRequestInfo, PodIdentifier};

/// Name of the per-namespace sentinel object carrying version-map
/// annotations.
pub const SENTINEL_CONFIG_MAP: &str = "autocrane-versions";

/// Cluster adapter backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Build a pod's data request view from its annotations.
fn pod_info_from_annotations(
    namespace: &str,
    name: String,
    pod_annotations: &BTreeMap<String, String>,
) -> PodDataRequestInfo {
    let drop_folder = pod_annotations
        .get(annotations::DROP_FOLDER)
        .cloned()
        .unwrap_or_default();

    let data_sources = pod_annotations
        .get(annotations::DATA_SOURCES)
        .map(|sources| {
            sources
                .split(',')
                .map(str::trim)
                .filter(|repo| !repo.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let mut requests = BTreeMap::new();
    for (key, value) in pod_annotations {
        if let Some(repo) = key.strip_prefix(annotations::REQUEST_PREFIX) {
            requests.insert(repo.to_string(), value.clone());
        }
    }

    PodDataRequestInfo {
        id: PodIdentifier::new(namespace, name),
        drop_folder,
        data_sources,
        requests,
    }
}

/// A pod fails when any watchdog status annotation reports an error.
fn has_failing_watchdog(pod_annotations: &BTreeMap<String, String>) -> bool {
    pod_annotations
        .iter()
        .any(|(key, value)| key.starts_with(annotations::WATCHDOG_PREFIX) && value.starts_with("error"))
}

/// Whether an object's TTL annotation has passed.
fn object_expired(pod_annotations: Option<&BTreeMap<String, String>>, now_unix: i64) -> bool {
    let Some(value) = pod_annotations.and_then(|a| a.get(annotations::EXPIRES)) else {
        return false;
    };
    match value.parse::<i64>() {
        Ok(deadline) => deadline <= now_unix,
        Err(e) => {
            warn!(value = %value, error = %e, "Ignoring unparseable expiry annotation");
            false
        }
    }
}

#[async_trait]
impl PodDataRequestGetter for KubeCluster {
    async fn get(&self, namespace: &str) -> Result<Vec<PodDataRequestInfo>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list pods in {namespace}"))?;

        let mut infos = Vec::with_capacity(list.items.len());
        for pod in list.items {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            let pod_annotations = pod.metadata.annotations.unwrap_or_default();
            infos.push(pod_info_from_annotations(namespace, name, &pod_annotations));
        }
        Ok(infos)
    }
}

#[async_trait]
impl FailingPodGetter for KubeCluster {
    async fn get(&self, namespace: &str) -> Result<Vec<PodIdentifier>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list pods in {namespace}"))?;

        let mut failing = Vec::new();
        for pod in list.items {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            let pod_annotations = pod.metadata.annotations.unwrap_or_default();
            if has_failing_watchdog(&pod_annotations) {
                failing.push(PodIdentifier::new(namespace, name));
            }
        }
        Ok(failing)
    }
}

#[async_trait]
impl PodAnnotationPutter for KubeCluster {
    async fn put(&self, pod: &PodIdentifier, batch: Vec<(String, String)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut map = serde_json::Map::new();
        for (key, value) in batch {
            map.insert(key, serde_json::Value::String(value));
        }
        let patch = serde_json::json!({ "metadata": { "annotations": map } });

        self.pods(&pod.namespace)
            .patch(&pod.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to patch annotations on {pod}"))?;
        Ok(())
    }
}

#[async_trait]
impl PodEvicter for KubeCluster {
    async fn evict(&self, pod: &PodIdentifier) -> Result<()> {
        self.pods(&pod.namespace)
            .evict(&pod.name, &EvictParams::default())
            .await
            .with_context(|| format!("Failed to evict {pod}"))?;
        debug!(pod = %pod, "Eviction requested");
        Ok(())
    }
}

#[async_trait]
impl ExpiredObjectDeleter for KubeCluster {
    async fn delete_expired(
        &self,
        namespace: &str,
        now_unix: i64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut deleted = 0u64;

        let pods = self.pods(namespace);
        for pod in pods.list(&ListParams::default()).await?.items {
            if cancel.is_cancelled() {
                bail!("expired-object cleanup cancelled");
            }
            let Some(name) = pod.metadata.name else {
                continue;
            };
            if object_expired(pod.metadata.annotations.as_ref(), now_unix) {
                pods.delete(&name, &DeleteParams::default())
                    .await
                    .with_context(|| format!("Failed to delete expired pod {namespace}/{name}"))?;
                deleted += 1;
            }
        }

        let config_maps = self.config_maps(namespace);
        for config_map in config_maps.list(&ListParams::default()).await?.items {
            if cancel.is_cancelled() {
                bail!("expired-object cleanup cancelled");
            }
            let Some(name) = config_map.metadata.name else {
                continue;
            };
            if object_expired(config_map.metadata.annotations.as_ref(), now_unix) {
                config_maps
                    .delete(&name, &DeleteParams::default())
                    .await
                    .with_context(|| {
                        format!("Failed to delete expired config map {namespace}/{name}")
                    })?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl VersionStore for KubeCluster {
    async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let sentinel = self
            .config_maps(namespace)
            .get_opt(SENTINEL_CONFIG_MAP)
            .await
            .with_context(|| format!("Failed to read {SENTINEL_CONFIG_MAP} in {namespace}"))?;

        Ok(sentinel
            .and_then(|cm| cm.metadata.annotations)
            .and_then(|a| a.get(key).cloned()))
    }

    async fn save(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let config_maps = self.config_maps(namespace);

        if config_maps.get_opt(SENTINEL_CONFIG_MAP).await?.is_none() {
            let sentinel = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(SENTINEL_CONFIG_MAP.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            match config_maps.create(&PostParams::default(), &sentinel).await {
                Ok(_) => {}
                // Lost the create race; the patch below still applies.
                Err(kube::Error::Api(e)) if e.code == 409 => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create {SENTINEL_CONFIG_MAP} in {namespace}")
                    });
                }
            }
        }

        let mut map = serde_json::Map::new();
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        let patch = serde_json::json!({ "metadata": { "annotations": map } });

        config_maps
            .patch(
                SENTINEL_CONFIG_MAP,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .with_context(|| format!("Failed to update {SENTINEL_CONFIG_MAP} in {namespace}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations_from(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_pod_info_from_annotations() {
        let pod_annotations = annotations_from(&[
            ("data.autocrane/drop-folder", "/data"),
            ("data.autocrane/sources", "maps, models ,"),
            ("data.autocrane/req-maps", "abc"),
            ("unrelated/annotation", "x"),
        ]);

        let info = pod_info_from_annotations("prod", "web-0".to_string(), &pod_annotations);
        assert_eq!(info.id, PodIdentifier::new("prod", "web-0"));
        assert_eq!(info.drop_folder, "/data");
        assert_eq!(info.data_sources, vec!["maps", "models"]);
        assert_eq!(info.requests.get("maps").map(String::as_str), Some("abc"));
        assert_eq!(info.requests.len(), 1);
    }

    #[test]
    fn test_pod_info_without_annotations() {
        let info = pod_info_from_annotations("prod", "web-0".to_string(), &BTreeMap::new());
        assert!(info.drop_folder.is_empty());
        assert!(info.data_sources.is_empty());
        assert!(info.requests.is_empty());
    }

    #[test]
    fn test_failing_watchdog_detection() {
        let failing = annotations_from(&[("status.autocrane/ready", "error: probe timed out")]);
        assert!(has_failing_watchdog(&failing));

        let healthy = annotations_from(&[("status.autocrane/ready", "ok")]);
        assert!(!has_failing_watchdog(&healthy));

        let unrelated = annotations_from(&[("other/thing", "error")]);
        assert!(!has_failing_watchdog(&unrelated));
    }

    #[test]
    fn test_object_expired() {
        let expired = annotations_from(&[("data.autocrane/expires", "100")]);
        assert!(object_expired(Some(&expired), 100));
        assert!(object_expired(Some(&expired), 101));
        assert!(!object_expired(Some(&expired), 99));

        let garbage = annotations_from(&[("data.autocrane/expires", "soon")]);
        assert!(!object_expired(Some(&garbage), 1_000));

        assert!(!object_expired(None, 1_000));
    }
}
