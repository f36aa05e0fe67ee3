//! Orchestration loop
//!
//! A single elected leader drives all mutating work on a fixed-period
//! iteration: refresh the manifest, steer every namespace's pods toward
//! their target data versions, evict pods failing watchdogs on consecutive
//! iterations, and garbage-collect expired objects. Non-leader replicas
//! idle. Annotations are the only durable state; nothing is cached across
//! iterations.

mod window;

pub use window::FailureWindow;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::cluster::{
    ExpiredObjectDeleter, FailingPodGetter, LeaderElector, PodAnnotationPutter,
    PodDataRequestGetter, PodEvicter, VersionStore,
};
use crate::manifest::{DataRepositoryManifest, ManifestFetcher};
use crate::models::{annotations, PodIdentifier};
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use crate::oracle::UpgradeOracle;
use crate::status::{ControllerStatus, IterationRecord};
use crate::versions::{KnownGoodAccessor, LatestVersionAccessor};

/// Cancelled cleanly or ran to completion.
pub const EXIT_SUCCESS: i32 = 0;
/// Consecutive-error threshold exceeded.
pub const EXIT_TOO_MANY_ERRORS: i32 = 2;
/// No namespaces configured, or the leader-election task terminated
/// unexpectedly.
pub const EXIT_CONFIG: i32 = 3;

/// Name of the lease the orchestrator claims.
pub const LEASE_NAME: &str = "acleaderorchestrate";

/// Loop configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Namespaces to supervise; must be non-empty.
    pub namespaces: Vec<String>,
    /// Iteration period (default: 60 seconds)
    pub iteration: Duration,
    /// Consecutive failed iterations tolerated before exiting (default: 5)
    pub consecutive_error_limit: u32,
    /// Iterations a pod must fail watchdogs before eviction (default: 3)
    pub watchdog_failures_before_eviction: usize,
    /// Lease claimed for leader election
    pub lease_name: String,
    /// Lease renewal period (default: 30 seconds)
    pub lease_renewal: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            iteration: Duration::from_secs(60),
            consecutive_error_limit: 5,
            watchdog_failures_before_eviction: 3,
            lease_name: LEASE_NAME.to_string(),
            lease_renewal: Duration::from_secs(30),
        }
    }
}

/// Counters from one completed iteration
#[derive(Debug, Default, Clone)]
pub struct IterationStats {
    pub namespaces: usize,
    pub pods: usize,
    pub patches: usize,
    pub evictions: usize,
}

struct NamespaceStats {
    pods: usize,
    patches: usize,
}

/// The orchestration loop and its collaborators
pub struct Orchestrator {
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    manifest_fetcher: Arc<dyn ManifestFetcher>,
    request_getter: Arc<dyn PodDataRequestGetter>,
    known_good: KnownGoodAccessor,
    latest: LatestVersionAccessor,
    failing_getter: Arc<dyn FailingPodGetter>,
    annotation_putter: Arc<dyn PodAnnotationPutter>,
    evicter: Arc<dyn PodEvicter>,
    expired_deleter: Arc<dyn ExpiredObjectDeleter>,
    elector: Arc<dyn LeaderElector>,
    status: ControllerStatus,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
}

impl Orchestrator {
    /// Run the loop until cancellation or a terminal condition.
    ///
    /// Returns the process exit code: [`EXIT_SUCCESS`] on cancellation,
    /// [`EXIT_TOO_MANY_ERRORS`] once the consecutive-error limit is
    /// exceeded, [`EXIT_CONFIG`] for an empty namespace list or an
    /// unexpectedly terminated lease task.
    pub async fn run(&self, cancel: CancellationToken) -> i32 {
        if self.config.namespaces.is_empty() {
            error!("No namespaces configured, refusing to start");
            return EXIT_CONFIG;
        }

        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), &self.config.namespaces);

        let leadership = self.elector.start(
            &self.config.lease_name,
            self.config.lease_renewal,
            cancel.child_token(),
        );

        self.status.mark_started();

        let mut window = FailureWindow::new(self.config.watchdog_failures_before_eviction);
        let mut consecutive_errors: u32 = 0;

        loop {
            if leadership.is_completed() {
                error!("Leader election task completed unexpectedly");
                self.status.record_terminal("leader election task terminated");
                return EXIT_CONFIG;
            }

            if consecutive_errors > self.config.consecutive_error_limit {
                error!(
                    errors = consecutive_errors,
                    "Consecutive error limit exceeded"
                );
                self.status.record_terminal("consecutive error limit exceeded");
                return EXIT_TOO_MANY_ERRORS;
            }

            if cancel.is_cancelled() {
                self.logger.log_shutdown("cancelled");
                return EXIT_SUCCESS;
            }

            self.status.record_leadership(leadership.is_leader());
            if leadership.is_leader() {
                self.metrics.set_leader(true);

                let started = Instant::now();
                let outcome = async {
                    let stats = self.process_iteration(&mut window, &cancel).await?;
                    self.cleanup_expired(&cancel).await?;
                    Ok::<_, anyhow::Error>(stats)
                }
                .await;

                match outcome {
                    Ok(stats) => {
                        consecutive_errors = 0;
                        self.metrics
                            .observe_iteration(started.elapsed().as_secs_f64());
                        self.status.record_iteration(IterationRecord {
                            completed_unix: self.clock.now_unix(),
                            namespaces: stats.namespaces,
                            pods: stats.pods,
                            patches: stats.patches,
                            evictions: stats.evictions,
                        });
                        self.logger.log_iteration(
                            stats.namespaces,
                            stats.pods,
                            stats.patches,
                            stats.evictions,
                        );
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        self.metrics.inc_iteration_errors();
                        self.status
                            .record_iteration_error(&e.to_string(), consecutive_errors);
                        error!(
                            error = %e,
                            consecutive = consecutive_errors,
                            "Orchestration iteration failed"
                        );
                    }
                }
            } else {
                self.metrics.set_leader(false);
                info!("not leader, skipping iteration");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.logger.log_shutdown("cancelled");
                    return EXIT_SUCCESS;
                }
                _ = tokio::time::sleep(self.config.iteration) => {}
            }
        }
    }

    /// One pass over every configured namespace plus the eviction step.
    async fn process_iteration(
        &self,
        window: &mut FailureWindow,
        cancel: &CancellationToken,
    ) -> Result<IterationStats> {
        let manifest = match self.manifest_fetcher.fetch(cancel).await {
            Ok(manifest) => {
                self.status.record_manifest_success(self.clock.now_unix());
                manifest
            }
            Err(e) => {
                self.status.record_manifest_failure(&e.to_string());
                return Err(e.context("fetching data repository manifest"));
            }
        };

        let mut stats = IterationStats::default();
        let mut failing_this_iteration: HashSet<PodIdentifier> = HashSet::new();

        for namespace in &self.config.namespaces {
            let ns_stats = self
                .process_namespace(namespace, &manifest, &mut failing_this_iteration, cancel)
                .await
                .with_context(|| format!("processing namespace {namespace}"))?;
            stats.namespaces += 1;
            stats.pods += ns_stats.pods;
            stats.patches += ns_stats.patches;
        }

        window.push(failing_this_iteration);
        let persistent = window.persistent_failures();
        if !persistent.is_empty() {
            stats.evictions = self.evict_pods(&persistent).await?;
        }

        Ok(stats)
    }

    /// Steer one namespace: refresh version state, apply the oracle to every
    /// pod, and collect watchdog failures. Each pod receives at most one
    /// annotation patch carrying its whole batch.
    async fn process_namespace(
        &self,
        namespace: &str,
        manifest: &DataRepositoryManifest,
        failing_this_iteration: &mut HashSet<PodIdentifier>,
        cancel: &CancellationToken,
    ) -> Result<NamespaceStats> {
        let requests = self
            .request_getter
            .get(namespace)
            .await
            .context("listing pod data requests")?;

        let known_good = self
            .known_good
            .get_or_update(namespace, manifest, &requests, cancel)
            .await
            .context("refreshing known-good versions")?;
        let latest = self
            .latest
            .get_or_update(namespace, manifest, cancel)
            .await
            .context("refreshing latest versions")?;

        let oracle = UpgradeOracle::new(manifest, &known_good, &latest, &requests);

        let mut stats = NamespaceStats {
            pods: requests.len(),
            patches: 0,
        };

        for info in &requests {
            let mut batch = Vec::new();
            for repo in &info.data_sources {
                let Some(mut details) = oracle.get_data_request(&info.id, repo) else {
                    continue;
                };
                details.unix_timestamp_seconds = self.clock.now_unix();

                let rollback = latest.get(repo).map(String::as_str) != Some(details.hash.as_str());
                if rollback {
                    self.metrics.inc_rollbacks_proposed();
                } else {
                    self.metrics.inc_upgrades_proposed();
                }
                self.logger
                    .log_data_request(&info.id.to_string(), repo, &details.hash, rollback);

                batch.push((annotations::request_key(repo), details.encode()));
            }

            if !batch.is_empty() {
                self.annotation_putter
                    .put(&info.id, batch)
                    .await
                    .with_context(|| format!("patching annotations on {}", info.id))?;
                self.metrics.inc_annotation_patches();
                stats.patches += 1;
            }
        }

        let failing = self
            .failing_getter
            .get(namespace)
            .await
            .context("listing failing pods")?;
        failing_this_iteration.extend(failing);

        Ok(stats)
    }

    /// Evict persistently failing pods concurrently. Individual failures are
    /// logged; any failure surfaces as one iteration error after the join.
    async fn evict_pods(&self, pods: &[PodIdentifier]) -> Result<usize> {
        let results = futures::future::join_all(pods.iter().map(|pod| {
            let evicter = self.evicter.clone();
            async move { (pod, evicter.evict(pod).await) }
        }))
        .await;

        let mut evicted = 0;
        let mut failed = 0;
        for (pod, result) in results {
            match result {
                Ok(()) => {
                    evicted += 1;
                    self.metrics.inc_pods_evicted();
                    self.logger.log_eviction(&pod.to_string());
                }
                Err(e) => {
                    failed += 1;
                    warn!(pod = %pod, error = %e, "Failed to evict pod");
                }
            }
        }

        if failed > 0 {
            bail!("{failed} of {} evictions failed", pods.len());
        }
        Ok(evicted)
    }

    /// Garbage-collect objects whose TTL annotation has passed.
    async fn cleanup_expired(&self, cancel: &CancellationToken) -> Result<()> {
        let now = self.clock.now_unix();
        for namespace in &self.config.namespaces {
            let deleted = self
                .expired_deleter
                .delete_expired(namespace, now, cancel)
                .await
                .with_context(|| format!("deleting expired objects in {namespace}"))?;
            if deleted > 0 {
                self.metrics.add_expired_objects_deleted(deleted);
                info!(namespace = %namespace, deleted = deleted, "Deleted expired objects");
            }
        }
        Ok(())
    }
}

/// Builder for assembling the orchestrator and its collaborators
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    identity: String,
    clock: Option<Arc<dyn Clock>>,
    manifest_fetcher: Option<Arc<dyn ManifestFetcher>>,
    request_getter: Option<Arc<dyn PodDataRequestGetter>>,
    failing_pod_getter: Option<Arc<dyn FailingPodGetter>>,
    annotation_putter: Option<Arc<dyn PodAnnotationPutter>>,
    pod_evicter: Option<Arc<dyn PodEvicter>>,
    expired_object_deleter: Option<Arc<dyn ExpiredObjectDeleter>>,
    version_store: Option<Arc<dyn VersionStore>>,
    leader_elector: Option<Arc<dyn LeaderElector>>,
    controller_status: Option<ControllerStatus>,
}

impl OrchestratorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            identity: "autocrane-orchestrator".to_string(),
            clock: None,
            manifest_fetcher: None,
            request_getter: None,
            failing_pod_getter: None,
            annotation_putter: None,
            pod_evicter: None,
            expired_object_deleter: None,
            version_store: None,
            leader_elector: None,
            controller_status: None,
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity used in structured log events
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn manifest_fetcher(mut self, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        self.manifest_fetcher = Some(fetcher);
        self
    }

    pub fn request_getter(mut self, getter: Arc<dyn PodDataRequestGetter>) -> Self {
        self.request_getter = Some(getter);
        self
    }

    pub fn failing_pod_getter(mut self, getter: Arc<dyn FailingPodGetter>) -> Self {
        self.failing_pod_getter = Some(getter);
        self
    }

    pub fn annotation_putter(mut self, putter: Arc<dyn PodAnnotationPutter>) -> Self {
        self.annotation_putter = Some(putter);
        self
    }

    pub fn pod_evicter(mut self, evicter: Arc<dyn PodEvicter>) -> Self {
        self.pod_evicter = Some(evicter);
        self
    }

    pub fn expired_object_deleter(mut self, deleter: Arc<dyn ExpiredObjectDeleter>) -> Self {
        self.expired_object_deleter = Some(deleter);
        self
    }

    /// Store backing the known-good and latest version maps
    pub fn version_store(mut self, store: Arc<dyn VersionStore>) -> Self {
        self.version_store = Some(store);
        self
    }

    pub fn leader_elector(mut self, elector: Arc<dyn LeaderElector>) -> Self {
        self.leader_elector = Some(elector);
        self
    }

    /// Status record shared with the probe endpoints
    pub fn controller_status(mut self, status: ControllerStatus) -> Self {
        self.controller_status = Some(status);
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> Result<Orchestrator> {
        let manifest_fetcher = self
            .manifest_fetcher
            .ok_or_else(|| anyhow!("manifest_fetcher is required"))?;
        let request_getter = self
            .request_getter
            .ok_or_else(|| anyhow!("request_getter is required"))?;
        let failing_getter = self
            .failing_pod_getter
            .ok_or_else(|| anyhow!("failing_pod_getter is required"))?;
        let annotation_putter = self
            .annotation_putter
            .ok_or_else(|| anyhow!("annotation_putter is required"))?;
        let evicter = self
            .pod_evicter
            .ok_or_else(|| anyhow!("pod_evicter is required"))?;
        let expired_deleter = self
            .expired_object_deleter
            .ok_or_else(|| anyhow!("expired_object_deleter is required"))?;
        let version_store = self
            .version_store
            .ok_or_else(|| anyhow!("version_store is required"))?;
        let elector = self
            .leader_elector
            .ok_or_else(|| anyhow!("leader_elector is required"))?;

        Ok(Orchestrator {
            known_good: KnownGoodAccessor::new(version_store.clone(), failing_getter.clone()),
            latest: LatestVersionAccessor::new(version_store),
            config: self.config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            manifest_fetcher,
            request_getter,
            failing_getter,
            annotation_putter,
            evicter,
            expired_deleter,
            elector,
            status: self.controller_status.unwrap_or_default(),
            metrics: OrchestratorMetrics::new(),
            logger: StructuredLogger::new(self.identity),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
