//! Isolation command implementation

use anyhow::Result;
use keel_core::NodeConfig;
use keel_isolation::IsolationRegistry;

pub async fn execute(config: &NodeConfig, kind: Option<&str>) -> Result<()> {
    let kind = kind.unwrap_or(&config.isolation);
    let registry = IsolationRegistry::builtin(config);

    let Some(handle) = registry.create(kind) else {
        anyhow::bail!(
            "Isolation backend '{kind}' is {} (available: {})",
            registry.lookup(kind),
            registry.kinds().join(", ")
        );
    };

    println!("✅ Isolation backend '{}' selected", handle.kind());

    registry.destroy(&mut Some(handle)).await?;
    Ok(())
}
