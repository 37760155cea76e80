use crate::cli::{Commands, NodeArgs};
use anyhow::{Context, Result};
use keel_capacity::{SystemProbe, resolve_node_resources};
use keel_core::{NodeConfig, ResourceSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub mod backends;
pub mod isolation;
pub mod resources;
pub mod start;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<()> {
    match command {
        Commands::Resources {
            node,
            json,
            probe_timeout_secs,
        } => {
            let config = load_config(config_path, node).await?;
            resources::execute(&config, json, probe_timeout_secs).await
        }

        Commands::Isolation { kind } => {
            let config = load_config(config_path, NodeArgs::default()).await?;
            isolation::execute(&config, kind.as_deref()).await
        }

        Commands::Backends => {
            let config = load_config(config_path, NodeArgs::default()).await?;
            backends::execute(&config);
            Ok(())
        }

        Commands::Start {
            node,
            isolation,
            probe_timeout_secs,
        } => {
            let mut config = load_config(config_path, node).await?;
            if let Some(kind) = isolation {
                config.isolation = kind;
            }
            start::execute(&config, probe_timeout_secs).await
        }
    }
}

/// Config file (or defaults) with command-line flags applied on top
async fn load_config(path: Option<&Path>, args: NodeArgs) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(resources) = args.resources {
        config.resources = Some(resources);
    }
    if let Some(role) = args.default_role {
        config.default_role = role;
    }
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }

    Ok(config)
}

/// Resolve capacity against the real host, bounded by `timeout_secs`
async fn resolve_capacity(config: &NodeConfig, timeout_secs: u64) -> Result<ResourceSet> {
    let probe = Arc::new(SystemProbe::new());

    tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        resolve_node_resources(probe, config),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Capacity resolution did not complete within {timeout_secs}s"))?
    .context("Failed to resolve node capacity")
}
