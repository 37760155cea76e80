//! Resources command implementation

use anyhow::Result;
use keel_core::{Dimension, NodeConfig, Quantity, ResourceSet};

pub async fn execute(config: &NodeConfig, json: bool, timeout_secs: u64) -> Result<()> {
    let resources = super::resolve_capacity(config, timeout_secs).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
    } else {
        print_table(&resources);
    }
    Ok(())
}

pub fn print_table(resources: &ResourceSet) {
    println!("\n📦 Node Resources");
    println!("{:-<60}", "");

    for (name, role, quantity) in resources.iter() {
        let unit = match (name, quantity) {
            (Dimension::Mem | Dimension::Disk, _) => " MB".to_string(),
            (Dimension::Ports, Quantity::Ranges(ranges)) => format!(" ({} ports)", ranges.port_count()),
            _ => String::new(),
        };
        println!("  {:<8} {:<12} {quantity}{unit}", name.as_str(), format!("({role})"));
    }

    println!("{:-<60}", "");
    println!("Override form: {resources}");
}
