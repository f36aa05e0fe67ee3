//! Core library for the AutoCrane orchestrator
//!
//! This crate provides the building blocks for supervising a fleet of
//! workload pods:
//! - Data repository manifest loading and validation
//! - The upgrade oracle deciding per-pod data version targets
//! - Known-good and latest version accessors persisted in-cluster
//! - The leader-elected orchestration loop with watchdog-driven eviction
//! - Kubernetes adapters for the cluster-facing collaborator traits
//! - The controller status record, probe endpoints and metrics

pub mod api;
pub mod clock;
pub mod cluster;
pub mod downloads;
pub mod manifest;
pub mod models;
pub mod observability;
pub mod oracle;
pub mod orchestrator;
pub mod status;
pub mod versions;

pub use clock::{Clock, ManualClock, SystemClock};
pub use downloads::build_download_requests;
pub use manifest::{DataRepositoryManifest, HttpManifestFetcher, ManifestEntry, ManifestFetcher};
pub use models::*;
pub use observability::{OrchestratorMetrics, StructuredLogger};
pub use oracle::UpgradeOracle;
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, EXIT_CONFIG, EXIT_SUCCESS,
    EXIT_TOO_MANY_ERRORS,
};
pub use status::{ControllerStatus, IterationRecord, ProbeResult, Role, StatusReport};
pub use versions::{KnownGoodAccessor, LatestVersionAccessor};
