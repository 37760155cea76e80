//! Process-group isolation
//!
//! Tracks each task's process and its allocation. Nothing is enforced
//! beyond signals: killing a task sends `SIGKILL` to its process group.

use async_trait::async_trait;
use keel_core::{ProcessId, ResourceSet, ResourceStats, Result, TaskId};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{IsolationBackend, allocation_stats, unknown_task};

#[derive(Debug)]
struct TrackedTask {
    pid: ProcessId,
    resources: ResourceSet,
}

/// Isolation by process group
#[derive(Debug, Default)]
pub struct ProcessIsolation {
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
}

impl ProcessIsolation {
    /// Create an empty process backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently tracked
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

/// Kill `pid`'s process group, or `pid` alone if it leads no group
///
/// A process that is already gone is not an error.
fn kill_tree(pid: ProcessId) -> Result<()> {
    let pid = Pid::from(pid);

    match signal::killpg(pid, Signal::SIGKILL) {
        Ok(()) => return Ok(()),
        Err(Errno::ESRCH) => {}
        Err(e) => return Err(e.into()),
    }

    match signal::kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl IsolationBackend for ProcessIsolation {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn initialize(&self, resources: &ResourceSet) -> Result<()> {
        info!(resources = %resources, "Process isolation ready");
        Ok(())
    }

    async fn launch(&self, task: &TaskId, pid: ProcessId, resources: &ResourceSet) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        if let Some(previous) = tasks.insert(
            task.clone(),
            TrackedTask {
                pid,
                resources: resources.clone(),
            },
        ) {
            warn!(task = %task, old_pid = previous.pid.as_raw(), "Task relaunched; replacing tracked process");
        }

        debug!(task = %task, pid = pid.as_raw(), resources = %resources, "Tracking task");
        Ok(())
    }

    async fn update(&self, task: &TaskId, resources: &ResourceSet) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let tracked = tasks.get_mut(task).ok_or_else(|| unknown_task(task))?;
        tracked.resources = resources.clone();

        debug!(task = %task, resources = %resources, "Updated allocation");
        Ok(())
    }

    async fn usage(&self, task: &TaskId) -> Result<ResourceStats> {
        self.tasks
            .lock()
            .await
            .get(task)
            .map(|tracked| allocation_stats(&tracked.resources))
            .ok_or_else(|| unknown_task(task))
    }

    async fn kill(&self, task: &TaskId) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let pid = tasks.get(task).map(|t| t.pid).ok_or_else(|| unknown_task(task))?;

        kill_tree(pid)?;
        tasks.remove(task);
        debug!(task = %task, pid = pid.as_raw(), "Killed task");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.tasks.lock().await.retain(|task, tracked| match kill_tree(tracked.pid) {
            Ok(()) => false,
            Err(e) => {
                warn!(task = %task, pid = tracked.pid.as_raw(), error = %e, "Failed to kill task during shutdown");
                true
            }
        });

        info!("Process isolation shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Error;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::Command;

    fn task(id: &str) -> TaskId {
        TaskId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_kill_terminates_process_group() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = ProcessId::from_raw(i32::try_from(child.id()).unwrap());

        let backend = ProcessIsolation::new();
        backend
            .launch(&task("sleeper"), pid, &ResourceSet::new())
            .await
            .unwrap();
        assert_eq!(backend.task_count().await, 1);

        backend.kill(&task("sleeper")).await.unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
        assert_eq!(backend.task_count().await, 0);
    }

    #[tokio::test]
    async fn test_kill_of_exited_process_succeeds() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = ProcessId::from_raw(i32::try_from(child.id()).unwrap());
        child.wait().unwrap();

        let backend = ProcessIsolation::new();
        backend.launch(&task("done"), pid, &ResourceSet::new()).await.unwrap();

        backend.kill(&task("done")).await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_kill_keeps_task_tracked() {
        use std::os::unix::fs::MetadataExt;

        let euid = unsafe { libc::geteuid() };
        let init_owner = std::fs::metadata("/proc/1").map(|m| m.uid());
        if euid == 0 || init_owner.map_or(true, |uid| uid == euid) {
            println!("Skipping: this user may signal pid 1");
            return;
        }

        let backend = ProcessIsolation::new();
        backend
            .launch(&task("init"), ProcessId::from_raw(1), &ResourceSet::new())
            .await
            .unwrap();

        assert!(matches!(
            backend.kill(&task("init")).await,
            Err(Error::System(Errno::EPERM))
        ));
        assert_eq!(backend.task_count().await, 1);

        backend.shutdown().await.unwrap();
        assert_eq!(backend.task_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_task_rejected() {
        let backend = ProcessIsolation::new();

        assert!(matches!(
            backend.kill(&task("ghost")).await,
            Err(Error::UnknownTask { .. })
        ));
        assert!(matches!(
            backend.usage(&task("ghost")).await,
            Err(Error::UnknownTask { .. })
        ));
    }

    #[tokio::test]
    async fn test_usage_reports_allocation() {
        let backend = ProcessIsolation::new();
        let alloc = keel_core::parse("cpus:1.5;mem:512", &keel_core::Role::default()).unwrap();

        backend
            .launch(&task("web"), ProcessId::from_raw(i32::MAX), &alloc)
            .await
            .unwrap();

        let stats = backend.usage(&task("web")).await.unwrap();
        assert_eq!(stats.cpus_limit, Some(1.5));
        assert_eq!(stats.mem_limit, Some(keel_core::ByteSize::from_mb(512)));
    }
}
