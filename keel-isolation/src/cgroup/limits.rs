//! Translating an allocation into cgroup v2 limits

use keel_core::{ByteSize, ResourceSet, Result};
use tracing::debug;

use super::controller::TaskCgroup;

/// CFS period written to `cpu.max`, in microseconds
pub const CPU_PERIOD_USEC: u64 = 100_000;

/// Smallest quota the kernel accepts, in microseconds
pub const MIN_CPU_QUOTA_USEC: u64 = 1_000;

/// `cpu.max` content for a cpus allocation; `None` lifts the limit
#[must_use]
pub fn cpu_max(cpus: Option<f64>) -> String {
    match cpus {
        Some(cpus) => {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let quota = (cpus * CPU_PERIOD_USEC as f64) as u64;
            format!("{} {CPU_PERIOD_USEC}", quota.max(MIN_CPU_QUOTA_USEC))
        }
        None => format!("max {CPU_PERIOD_USEC}"),
    }
}

/// `memory.max` content for a mem allocation; `None` lifts the limit
#[must_use]
pub fn memory_max(mem: Option<ByteSize>) -> String {
    mem.map_or_else(|| "max".to_string(), |mem| mem.as_bytes().to_string())
}

impl TaskCgroup {
    /// Write cpu and memory limits for `resources`
    ///
    /// Dimensions the allocation does not mention are left unlimited.
    pub async fn apply_limits(&self, resources: &ResourceSet) -> Result<()> {
        let cpu = cpu_max(resources.cpus());
        let memory = memory_max(resources.mem());

        debug!(task = %self.task, cpu_max = %cpu, memory_max = %memory, "Applying limits");

        self.write_control("cpu.max", &cpu).await?;
        self.write_control("memory.max", &memory).await
    }
}
