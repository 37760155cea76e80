//! Start command implementation
//!
//! Capacity is resolved before the backend is selected so a bad override
//! string fails startup without touching isolation state.

use anyhow::{Context, Result};
use keel_core::NodeConfig;
use keel_isolation::IsolationRegistry;
use tracing::info;

pub async fn execute(config: &NodeConfig, timeout_secs: u64) -> Result<()> {
    let resources = super::resolve_capacity(config, timeout_secs).await?;

    let registry = IsolationRegistry::builtin(config);
    let mut handle = registry.create(&config.isolation);
    let Some(backend) = handle.as_ref() else {
        anyhow::bail!(
            "Isolation backend '{}' is {}; refusing to start",
            config.isolation,
            registry.lookup(&config.isolation)
        );
    };

    let initialized = backend
        .initialize(&resources)
        .await
        .with_context(|| format!("Failed to initialize '{}' isolation", config.isolation));

    if initialized.is_ok() {
        info!(kind = %config.isolation, "Node ready");
        super::resources::print_table(&resources);
        println!("Isolation: {}", config.isolation);
    }

    // Release even when initialization failed
    registry.destroy(&mut handle).await?;
    initialized
}
