//! AutoCrane orchestrator - data-version rollout and watchdog eviction
//!
//! This binary runs as a small Deployment in the cluster. One replica wins
//! the orchestration lease and drives rolling data-version upgrades and
//! watchdog-based evictions across the configured namespaces; the others
//! idle until the lease changes hands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use autocrane_lib::{
    api,
    cluster::{KubeCluster, KubeLeaderElector},
    manifest::HttpManifestFetcher,
    orchestrator::{OrchestratorBuilder, OrchestratorConfig},
    status::ControllerStatus,
    SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = ORCHESTRATOR_VERSION, "Starting autocrane orchestrator");

    let settings = config::OrchestratorSettings::load()?;
    let namespaces = settings.namespace_list();
    if namespaces.is_empty() {
        error!("AUTOCRANE_NAMESPACES must list at least one namespace");
        std::process::exit(autocrane_lib::EXIT_CONFIG);
    }
    info!(namespaces = ?namespaces, identity = %settings.identity, "Orchestrator configured");

    // The status record shared between the loop and the probe endpoints
    let status = ControllerStatus::new();

    // Cluster adapters
    let client = kube::Client::try_default().await?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let manifest_fetcher = Arc::new(HttpManifestFetcher::new(&settings.manifest_url)?);
    let elector = Arc::new(KubeLeaderElector::new(
        client,
        settings.lease_namespace.clone(),
        settings.identity.clone(),
    ));

    let orchestrator = OrchestratorBuilder::new()
        .config(OrchestratorConfig {
            namespaces,
            iteration: Duration::from_secs(settings.iteration_seconds),
            consecutive_error_limit: settings.consecutive_error_limit,
            watchdog_failures_before_eviction: settings.watchdog_failures_before_eviction,
            lease_renewal: Duration::from_secs(settings.lease_renewal_seconds),
            ..OrchestratorConfig::default()
        })
        .identity(settings.identity.clone())
        .clock(Arc::new(SystemClock))
        .manifest_fetcher(manifest_fetcher)
        .request_getter(cluster.clone())
        .failing_pod_getter(cluster.clone())
        .annotation_putter(cluster.clone())
        .pod_evicter(cluster.clone())
        .expired_object_deleter(cluster.clone())
        .version_store(cluster)
        .leader_elector(elector)
        .controller_status(status.clone())
        .build()?;

    let cancel = CancellationToken::new();

    // Probe and metrics server, stopped by the same token as the loop
    let api_task = tokio::spawn(api::serve(settings.api_port, status, cancel.clone()));

    // Cancel the loop on SIGINT
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, shutting down");
            signal_cancel.cancel();
        }
    });

    let exit_code = orchestrator.run(cancel.clone()).await;
    cancel.cancel();
    let _ = api_task.await;
    std::process::exit(exit_code);
}
