//! Observability infrastructure for the orchestrator
//!
//! Provides:
//! - Prometheus metrics (iteration latency, patch/eviction counters, leader gauge)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for iteration latency (in seconds); an iteration makes
/// many cluster round trips, so the range is generous.
const ITERATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OrchestratorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct OrchestratorMetricsInner {
    iterations_total: IntCounter,
    iteration_errors_total: IntCounter,
    iteration_latency_seconds: Histogram,
    annotation_patches_total: IntCounter,
    upgrades_proposed_total: IntCounter,
    rollbacks_proposed_total: IntCounter,
    pods_evicted_total: IntCounter,
    expired_objects_deleted_total: IntCounter,
    leader_status: IntGauge,
}

impl OrchestratorMetricsInner {
    fn new() -> Self {
        Self {
            iterations_total: register_int_counter!(
                "autocrane_iterations_total",
                "Total number of completed orchestration iterations"
            )
            .expect("Failed to register iterations_total"),

            iteration_errors_total: register_int_counter!(
                "autocrane_iteration_errors_total",
                "Total number of failed orchestration iterations"
            )
            .expect("Failed to register iteration_errors_total"),

            iteration_latency_seconds: register_histogram!(
                "autocrane_iteration_latency_seconds",
                "Time spent processing one orchestration iteration",
                ITERATION_BUCKETS.to_vec()
            )
            .expect("Failed to register iteration_latency_seconds"),

            annotation_patches_total: register_int_counter!(
                "autocrane_annotation_patches_total",
                "Total number of pod annotation patch requests issued"
            )
            .expect("Failed to register annotation_patches_total"),

            upgrades_proposed_total: register_int_counter!(
                "autocrane_upgrades_proposed_total",
                "Total number of data version upgrades proposed to pods"
            )
            .expect("Failed to register upgrades_proposed_total"),

            rollbacks_proposed_total: register_int_counter!(
                "autocrane_rollbacks_proposed_total",
                "Total number of known-good rollbacks proposed to pods"
            )
            .expect("Failed to register rollbacks_proposed_total"),

            pods_evicted_total: register_int_counter!(
                "autocrane_pods_evicted_total",
                "Total number of pods evicted for persistent watchdog failures"
            )
            .expect("Failed to register pods_evicted_total"),

            expired_objects_deleted_total: register_int_counter!(
                "autocrane_expired_objects_deleted_total",
                "Total number of expired workload objects garbage collected"
            )
            .expect("Failed to register expired_objects_deleted_total"),

            leader_status: register_int_gauge!(
                "autocrane_leader_status",
                "Whether this replica currently holds the orchestration lease"
            )
            .expect("Failed to register leader_status"),
        }
    }
}

/// Orchestrator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OrchestratorMetrics {
    _private: (),
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OrchestratorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a completed iteration and its latency
    pub fn observe_iteration(&self, duration_secs: f64) {
        self.inner().iterations_total.inc();
        self.inner().iteration_latency_seconds.observe(duration_secs);
    }

    /// Record a failed iteration
    pub fn inc_iteration_errors(&self) {
        self.inner().iteration_errors_total.inc();
    }

    /// Record an issued annotation patch
    pub fn inc_annotation_patches(&self) {
        self.inner().annotation_patches_total.inc();
    }

    /// Record a proposed upgrade toward the rollout target
    pub fn inc_upgrades_proposed(&self) {
        self.inner().upgrades_proposed_total.inc();
    }

    /// Record a proposed rollback to known-good
    pub fn inc_rollbacks_proposed(&self) {
        self.inner().rollbacks_proposed_total.inc();
    }

    /// Record an eviction
    pub fn inc_pods_evicted(&self) {
        self.inner().pods_evicted_total.inc();
    }

    /// Record garbage-collected objects
    pub fn add_expired_objects_deleted(&self, count: u64) {
        self.inner().expired_objects_deleted_total.inc_by(count);
    }

    /// Update the leader gauge
    pub fn set_leader(&self, leader: bool) {
        self.inner().leader_status.set(i64::from(leader));
    }
}

/// Structured logger for orchestrator events
///
/// Provides consistent JSON-formatted logging for upgrades, rollbacks,
/// evictions and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    identity: String,
}

impl StructuredLogger {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    /// Log orchestrator startup
    pub fn log_startup(&self, version: &str, namespaces: &[String]) {
        info!(
            event = "orchestrator_started",
            identity = %self.identity,
            version = %version,
            namespaces = ?namespaces,
            "AutoCrane orchestrator started"
        );
    }

    /// Log orchestrator shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "orchestrator_shutdown",
            identity = %self.identity,
            reason = %reason,
            "AutoCrane orchestrator shutting down"
        );
    }

    /// Log a proposed data request
    pub fn log_data_request(&self, pod: &str, repo: &str, version: &str, rollback: bool) {
        info!(
            event = "data_request_proposed",
            identity = %self.identity,
            pod = %pod,
            repo = %repo,
            version = %version,
            rollback = rollback,
            "Proposed data version change"
        );
    }

    /// Log an eviction for persistent watchdog failures
    pub fn log_eviction(&self, pod: &str) {
        warn!(
            event = "pod_evicted",
            identity = %self.identity,
            pod = %pod,
            "Evicting pod failing watchdogs on consecutive iterations"
        );
    }

    /// Log iteration completion
    pub fn log_iteration(&self, namespaces: usize, pods: usize, patches: usize, evictions: usize) {
        info!(
            event = "iteration_complete",
            identity = %self.identity,
            namespaces = namespaces,
            pods = pods,
            patches = patches,
            evictions = evictions,
            "Orchestration iteration complete"
        );
    }
}
