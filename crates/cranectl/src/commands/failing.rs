//! Watchdog failure inspection

use anyhow::Result;
use autocrane_lib::cluster::{FailingPodGetter, KubeCluster};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_table, OutputFormat};

/// Row for the failing pod table
#[derive(Tabled, Serialize)]
struct FailingRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    pod: String,
}

/// Render the pods currently failing at least one watchdog
pub async fn show_failing(
    cluster: &KubeCluster,
    namespace: &str,
    format: OutputFormat,
) -> Result<()> {
    let failing = FailingPodGetter::get(cluster, namespace).await?;

    let rows: Vec<FailingRow> = failing
        .into_iter()
        .map(|pod| FailingRow {
            namespace: pod.namespace,
            pod: pod.name,
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}
