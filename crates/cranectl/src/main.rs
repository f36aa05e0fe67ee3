//! AutoCrane operator CLI
//!
//! A command-line tool for inspecting rollout state straight from the
//! cluster: per-pod download requests, known-good and latest data
//! versions, and pods currently failing watchdogs.

mod commands;
mod output;

use anyhow::Result;
use autocrane_lib::cluster::KubeCluster;
use clap::{Parser, Subcommand};
use commands::{failing, requests, versions};

/// AutoCrane operator CLI
#[derive(Parser)]
#[command(name = "cranectl")]
#[command(author, version, about = "CLI for inspecting AutoCrane rollout state", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the download requests the agent derives for each pod
    Requests {
        /// Namespace to inspect
        namespace: String,
    },

    /// Show known-good and latest data versions
    Versions {
        /// Namespace to inspect
        namespace: String,
    },

    /// Show pods currently failing watchdogs
    Failing {
        /// Namespace to inspect
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = kube::Client::try_default().await?;
    let cluster = KubeCluster::new(client);

    match cli.command {
        Commands::Requests { namespace } => {
            requests::show_requests(&cluster, &namespace, cli.format).await?;
        }
        Commands::Versions { namespace } => {
            versions::show_versions(&cluster, &namespace, cli.format).await?;
        }
        Commands::Failing { namespace } => {
            failing::show_failing(&cluster, &namespace, cli.format).await?;
        }
    }

    Ok(())
}
