//! Backends command implementation

use keel_core::NodeConfig;
use keel_isolation::{Availability, IsolationRegistry};

pub fn execute(config: &NodeConfig) {
    let registry = IsolationRegistry::builtin(config);

    println!("\n🧱 Isolation backends");
    println!("{:-<60}", "");

    for kind in registry.kinds() {
        let marker = if kind == config.isolation { " (configured)" } else { "" };
        println!("  {kind}{marker}");
    }

    if registry.lookup("cgroups") == Availability::Unsupported {
        println!("  cgroups: {}", Availability::Unsupported);
    }
    println!("{:-<60}", "");
}
