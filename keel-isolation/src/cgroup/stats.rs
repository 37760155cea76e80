//! Reading usage counters from cgroup v2 control files

use keel_core::{ByteSize, Result};
use std::time::Duration;
use tracing::debug;

use super::controller::TaskCgroup;

/// Counters read from a task's group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CgroupUsage {
    /// Total CPU time used
    pub cpu_usage: Duration,
    /// Time spent throttled at the quota
    pub cpu_throttled: Duration,
    /// Current memory charge
    pub memory_current: ByteSize,
}

/// Parse `usage_usec` and `throttled_usec` out of `cpu.stat`
///
/// ```text
/// usage_usec 12345678
/// user_usec 1234567
/// system_usec 890123
/// nr_periods 456
/// nr_throttled 123
/// throttled_usec 45678
/// ```
#[must_use]
pub fn parse_cpu_stat(content: &str) -> (Duration, Duration) {
    let mut usage_usec = 0u64;
    let mut throttled_usec = 0u64;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };

        match key {
            "usage_usec" => usage_usec = value.parse().unwrap_or(0),
            "throttled_usec" => throttled_usec = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    (
        Duration::from_micros(usage_usec),
        Duration::from_micros(throttled_usec),
    )
}

impl TaskCgroup {
    /// Read current usage counters
    pub async fn usage(&self) -> Result<CgroupUsage> {
        let (cpu_usage, cpu_throttled) = parse_cpu_stat(&self.read_control("cpu.stat").await?);

        let memory_current = ByteSize::from_bytes(
            self.read_control("memory.current")
                .await?
                .trim()
                .parse()
                .unwrap_or(0),
        );

        debug!(
            task = %self.task,
            cpu_usage_us = cpu_usage.as_micros(),
            memory_current = %memory_current,
            "Read cgroup usage"
        );

        Ok(CgroupUsage {
            cpu_usage,
            cpu_throttled,
            memory_current,
        })
    }
}
