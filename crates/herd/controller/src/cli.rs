//! Command-line arguments

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Herd CLI application
#[derive(Debug, Parser)]
#[command(name = "herdctl")]
#[command(about = "Herd - Multi-cluster stack and pipeline deployment", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HERD_CONFIG")]
    pub config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "HERD_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the dependency order of a manifest's items
    Order {
        /// Stack or Pipeline manifest
        manifest: PathBuf,
    },

    /// Print the merged values of one item for one cluster
    Render {
        /// Stack or Pipeline manifest
        manifest: PathBuf,

        /// Chart or step name
        #[arg(long)]
        item: String,

        /// Cluster id
        #[arg(long)]
        target: String,

        /// Directory holding config maps and secrets
        #[arg(long)]
        values_dir: Option<PathBuf>,
    },

    /// Run a full reconciliation against in-memory clusters
    Simulate {
        /// Stack or Pipeline manifest
        manifest: PathBuf,

        /// Directory holding config maps and secrets
        #[arg(long)]
        values_dir: Option<PathBuf>,

        /// Simulated cluster, as `id` or `id:key=value,key=value`
        #[arg(long = "cluster")]
        clusters: Vec<ClusterArg>,

        /// Tear the unit down after applying it
        #[arg(long)]
        teardown: bool,
    },
}

/// A simulated cluster and its labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterArg {
    pub id: String,
    pub labels: BTreeMap<String, String>,
}

impl ClusterArg {
    /// Cluster without labels
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Labels as borrowed pairs
    pub fn label_pairs(&self) -> Vec<(&str, &str)> {
        self.labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl FromStr for ClusterArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, labels) = match s.split_once(':') {
            Some((id, labels)) => (id.trim(), labels),
            None => (s.trim(), ""),
        };
        if id.is_empty() {
            return Err(format!("cluster id missing in '{s}'"));
        }

        let mut cluster = ClusterArg::new(id);
        for pair in labels.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("label '{pair}' is not key=value"))?;
            cluster
                .labels
                .insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(cluster)
    }
}
