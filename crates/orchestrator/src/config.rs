//! Orchestrator configuration

use anyhow::Result;
use serde::Deserialize;

/// Orchestrator configuration, read from `AUTOCRANE_*` environment
/// variables
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Comma-separated list of namespaces to supervise; required.
    #[serde(default)]
    pub namespaces: String,

    /// Orchestration iteration period in seconds
    #[serde(default = "default_iteration_seconds")]
    pub iteration_seconds: u64,

    /// Consecutive failed iterations tolerated before exiting
    #[serde(default = "default_consecutive_error_limit")]
    pub consecutive_error_limit: u32,

    /// Iterations a pod must fail watchdogs before eviction
    #[serde(default = "default_watchdog_failures")]
    pub watchdog_failures_before_eviction: usize,

    /// Lease renewal period in seconds
    #[serde(default = "default_lease_renewal_seconds")]
    pub lease_renewal_seconds: u64,

    /// Namespace the leader-election lease lives in
    #[serde(default = "default_lease_namespace")]
    pub lease_namespace: String,

    /// Port the probe and metrics endpoints listen on
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// URL of the data repository manifest document
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Lease holder identity; defaults to the pod or host name
    #[serde(default = "default_identity")]
    pub identity: String,
}

fn default_iteration_seconds() -> u64 {
    60
}

fn default_consecutive_error_limit() -> u32 {
    5
}

fn default_watchdog_failures() -> usize {
    3
}

fn default_lease_renewal_seconds() -> u64 {
    30
}

fn default_lease_namespace() -> String {
    "autocrane".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_manifest_url() -> String {
    "http://datarepo/manifest.json".to_string()
}

fn default_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "autocrane-orchestrator".to_string())
}

impl OrchestratorSettings {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AUTOCRANE"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parsed namespace list, empty entries dropped
    pub fn namespace_list(&self) -> Vec<String> {
        self.namespaces
            .split(',')
            .map(str::trim)
            .filter(|namespace| !namespace.is_empty())
            .map(String::from)
            .collect()
    }
}
