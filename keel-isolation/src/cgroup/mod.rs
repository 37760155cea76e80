//! Kernel control-group (cgroup v2) isolation
//!
//! Each task gets its own group under the agent's hierarchy:
//!
//! ```text
//! <cgroups_root>/<hierarchy>/<task>/
//!     cgroup.procs   task processes
//!     cpu.max        "<quota> 100000"
//!     memory.max     bytes
//! ```
//!
//! Construction touches nothing; the hierarchy is created by
//! [`IsolationBackend::initialize`].

mod controller;
mod limits;
mod stats;

pub use controller::TaskCgroup;
pub use limits::{CPU_PERIOD_USEC, MIN_CPU_QUOTA_USEC, cpu_max, memory_max};
pub use stats::{CgroupUsage, parse_cpu_stat};

use async_trait::async_trait;
use keel_core::{NodeConfig, ProcessId, ResourceSet, ResourceStats, Result, TaskId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{IsolationBackend, unknown_task};

struct Tracked {
    group: TaskCgroup,
    resources: ResourceSet,
}

/// Isolation through cgroup v2 cpu and memory controllers
#[derive(Debug)]
pub struct CgroupIsolation {
    root: PathBuf,
    tasks: Mutex<HashMap<TaskId, Tracked>>,
}

impl std::fmt::Debug for Tracked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("path", &self.group.path())
            .finish_non_exhaustive()
    }
}

impl CgroupIsolation {
    /// Backend managing task groups under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Backend rooted at the configured hierarchy
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.cgroups_path())
    }

    /// Directory task groups are created under
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of tasks with a live group
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[async_trait]
impl IsolationBackend for CgroupIsolation {
    fn kind(&self) -> &'static str {
        "cgroups"
    }

    async fn initialize(&self, resources: &ResourceSet) -> Result<()> {
        if let Some(parent) = self.root.parent() {
            controller::enable_controllers(parent).await;
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| controller::cgroup_error("create", &self.root, &e))?;
        controller::enable_controllers(&self.root).await;

        info!(root = %self.root.display(), resources = %resources, "cgroup isolation ready");
        Ok(())
    }

    async fn launch(&self, task: &TaskId, pid: ProcessId, resources: &ResourceSet) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        if let Some(tracked) = tasks.get_mut(task) {
            debug!(task = %task, pid = pid.as_raw(), "Adding process to existing task group");
            tracked.group.apply_limits(resources).await?;
            tracked.resources = resources.clone();
            return tracked.group.add_process(pid).await;
        }

        let mut group = TaskCgroup::create(&self.root, task).await?;
        let setup = async {
            group.apply_limits(resources).await?;
            group.add_process(pid).await
        };
        if let Err(e) = setup.await {
            if let Err(cleanup) = group.destroy().await {
                warn!(task = %task, error = %cleanup, "Failed to remove cgroup after launch error");
            }
            return Err(e);
        }

        debug!(task = %task, pid = pid.as_raw(), resources = %resources, "Launched into cgroup");
        tasks.insert(
            task.clone(),
            Tracked {
                group,
                resources: resources.clone(),
            },
        );
        Ok(())
    }

    async fn update(&self, task: &TaskId, resources: &ResourceSet) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let tracked = tasks.get_mut(task).ok_or_else(|| unknown_task(task))?;

        tracked.group.apply_limits(resources).await?;
        tracked.resources = resources.clone();
        Ok(())
    }

    async fn usage(&self, task: &TaskId) -> Result<ResourceStats> {
        let tasks = self.tasks.lock().await;
        let tracked = tasks.get(task).ok_or_else(|| unknown_task(task))?;
        let usage = tracked.group.usage().await?;

        Ok(ResourceStats {
            cpus_limit: tracked.resources.cpus(),
            mem_limit: tracked.resources.mem(),
            cpu_usage: usage.cpu_usage,
            cpu_throttled: usage.cpu_throttled,
            memory_current: usage.memory_current,
        })
    }

    // A group that fails to go away stays tracked so the kill can be retried
    async fn kill(&self, task: &TaskId) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let tracked = tasks.get_mut(task).ok_or_else(|| unknown_task(task))?;

        tracked.group.destroy().await?;
        tasks.remove(task);
        debug!(task = %task, "Killed task group");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        let mut destroyed = Vec::new();
        for (task, tracked) in tasks.iter_mut() {
            match tracked.group.destroy().await {
                Ok(()) => destroyed.push(task.clone()),
                Err(e) => {
                    warn!(task = %task, error = %e, "Failed to destroy task group during shutdown");
                }
            }
        }
        for task in &destroyed {
            tasks.remove(task);
        }
        drop(tasks);

        // Leaves the hierarchy in place if something else still lives there
        if let Err(e) = fs::remove_dir(&self.root).await {
            debug!(root = %self.root.display(), error = %e, "Hierarchy not removed");
        }

        info!("cgroup isolation shut down");
        Ok(())
    }
}
