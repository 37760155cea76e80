//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use keel_core::Role;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel node agent: capacity detection and isolation selection", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON node configuration file
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that override fields of the node configuration
#[derive(Args, Debug, Default)]
pub struct NodeArgs {
    /// Resource overrides, e.g. "cpus:2;mem:4096;ports:[31000-32000]"
    #[arg(long, env = "KEEL_RESOURCES")]
    pub resources: Option<String>,

    /// Role for auto-detected and unlabelled resources
    #[arg(long)]
    pub default_role: Option<Role>,

    /// Work directory; disk is measured on its filesystem
    #[arg(long, env = "KEEL_WORK_DIR")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and print this node's advertised capacity
    Resources {
        #[command(flatten)]
        node: NodeArgs,

        /// Print the resource set as JSON
        #[arg(long)]
        json: bool,

        /// Give up on host probing after this many seconds
        #[arg(long, default_value = "30")]
        probe_timeout_secs: u64,
    },

    /// Select an isolation backend by kind, then release it
    Isolation {
        /// Backend kind (defaults to the configured one)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// List isolation backends available on this build
    Backends,

    /// Run the startup sequence: resolve capacity, then select isolation
    Start {
        #[command(flatten)]
        node: NodeArgs,

        /// Backend kind (defaults to the configured one)
        #[arg(long)]
        isolation: Option<String>,

        /// Give up on host probing after this many seconds
        #[arg(long, default_value = "30")]
        probe_timeout_secs: u64,
    },
}
