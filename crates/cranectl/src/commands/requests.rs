//! Per-pod download request inspection

use anyhow::Result;
use autocrane_lib::build_download_requests;
use autocrane_lib::cluster::{KubeCluster, PodDataRequestGetter};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_table, OutputFormat};

/// Row for the download request table
#[derive(Tabled, Serialize)]
struct RequestRow {
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Repo")]
    repo: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Extraction")]
    extraction: String,
}

/// Render the download requests the agent would derive for every pod
pub async fn show_requests(
    cluster: &KubeCluster,
    namespace: &str,
    format: OutputFormat,
) -> Result<()> {
    let infos = PodDataRequestGetter::get(cluster, namespace).await?;

    let mut rows = Vec::new();
    for info in &infos {
        for request in build_download_requests(info) {
            rows.push(RequestRow {
                pod: request.pod.name.clone(),
                repo: request.repo.clone(),
                version: request
                    .details
                    .as_ref()
                    .map(|details| details.hash.clone())
                    .unwrap_or_else(|| "-".to_string()),
                extraction: if request.extraction_location.is_empty() {
                    "-".to_string()
                } else {
                    request.extraction_location.clone()
                },
            });
        }
    }

    print_table(&rows, format);
    Ok(())
}
