//! Cluster-facing collaborator traits
//!
//! The orchestrator core is written against these seams; the `kube` module
//! provides the production Kubernetes implementations and tests supply
//! mocks. Annotations are the only durable state behind these traits.

mod kube;
pub mod lease;

pub use self::kube::{KubeCluster, SENTINEL_CONFIG_MAP};
pub use self::lease::{KubeLeaderElector, LeaderElector, LeadershipHandle};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::{PodDataRequestInfo, PodIdentifier};

/// Reads every pod's data request state for a namespace
#[async_trait]
pub trait PodDataRequestGetter: Send + Sync {
    async fn get(&self, namespace: &str) -> Result<Vec<PodDataRequestInfo>>;
}

/// Reports pods currently failing at least one watchdog
#[async_trait]
pub trait FailingPodGetter: Send + Sync {
    async fn get(&self, namespace: &str) -> Result<Vec<PodIdentifier>>;
}

/// Writes a batch of annotations to a pod with patch semantics
#[async_trait]
pub trait PodAnnotationPutter: Send + Sync {
    async fn put(&self, pod: &PodIdentifier, annotations: Vec<(String, String)>) -> Result<()>;
}

/// Requests eviction of a pod
#[async_trait]
pub trait PodEvicter: Send + Sync {
    async fn evict(&self, pod: &PodIdentifier) -> Result<()>;
}

/// Garbage-collects workload-scoped objects whose TTL annotation has passed
#[async_trait]
pub trait ExpiredObjectDeleter: Send + Sync {
    /// Delete expired objects in a namespace; returns how many were removed.
    async fn delete_expired(
        &self,
        namespace: &str,
        now_unix: i64,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Persists small string values as annotations on a per-namespace sentinel
/// object. Used by the version accessors for known-good and latest maps.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    async fn save(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
}
