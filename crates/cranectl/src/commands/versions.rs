//! Known-good and latest version inspection

use std::collections::BTreeSet;

use anyhow::Result;
use autocrane_lib::cluster::{KubeCluster, VersionStore};
use autocrane_lib::models::{annotations, VersionMap};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_info, print_table, OutputFormat};

/// Row for the version table
#[derive(Tabled, Serialize)]
struct VersionRow {
    #[tabled(rename = "Repo")]
    repo: String,
    #[tabled(rename = "Known Good")]
    known_good: String,
    #[tabled(rename = "Latest")]
    latest: String,
}

/// Render the persisted known-good and latest maps for a namespace
pub async fn show_versions(
    cluster: &KubeCluster,
    namespace: &str,
    format: OutputFormat,
) -> Result<()> {
    let known_good = load_map(cluster, namespace, annotations::KNOWN_GOOD).await?;
    let latest = load_map(cluster, namespace, annotations::LATEST).await?;

    if known_good.is_empty() && latest.is_empty() {
        print_info("No version state recorded for this namespace");
        return Ok(());
    }

    let repos: BTreeSet<&String> = known_good.keys().chain(latest.keys()).collect();
    let rows: Vec<VersionRow> = repos
        .into_iter()
        .map(|repo| VersionRow {
            repo: repo.clone(),
            known_good: known_good.get(repo).cloned().unwrap_or_else(|| "-".to_string()),
            latest: latest.get(repo).cloned().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}

async fn load_map(cluster: &KubeCluster, namespace: &str, key: &str) -> Result<VersionMap> {
    let raw = VersionStore::load(cluster, namespace, key).await?;
    Ok(raw
        .map(|value| serde_json::from_str(&value))
        .transpose()?
        .unwrap_or_default())
}
