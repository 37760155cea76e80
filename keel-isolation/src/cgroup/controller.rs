//! Per-task cgroup directory

use keel_core::{Error, ProcessId, Result, TaskId};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Controllers every task group needs
const CONTROLLERS: [&str; 2] = ["cpu", "memory"];

/// How often `rmdir` is retried while the kernel reaps killed processes
const REMOVE_ATTEMPTS: u32 = 10;
const REMOVE_BACKOFF: Duration = Duration::from_millis(20);

pub(crate) fn cgroup_error(action: &str, path: &Path, e: &std::io::Error) -> Error {
    if e.kind() == ErrorKind::PermissionDenied {
        Error::PermissionDenied {
            operation: format!("{action} {}", path.display()),
        }
    } else {
        Error::CGroup {
            message: format!("Failed to {action} {}: {e}", path.display()),
        }
    }
}

/// Turn on the cpu and memory controllers for children of `dir`
///
/// Best effort: a missing control file or a refused write usually means
/// the controllers are delegated from higher up.
pub(crate) async fn enable_controllers(dir: &Path) {
    let control_file = dir.join("cgroup.subtree_control");

    let Ok(current) = fs::read_to_string(&control_file).await else {
        debug!(path = %control_file.display(), "No subtree_control; skipping controller setup");
        return;
    };

    let missing: Vec<String> = CONTROLLERS
        .iter()
        .filter(|c| !current.split_whitespace().any(|enabled| enabled == **c))
        .map(|c| format!("+{c}"))
        .collect();

    if missing.is_empty() {
        return;
    }

    let to_enable = missing.join(" ");
    match fs::write(&control_file, &to_enable).await {
        Ok(()) => debug!(dir = %dir.display(), controllers = %to_enable, "Enabled controllers"),
        Err(e) => debug!(dir = %dir.display(), error = %e, "Could not enable controllers"),
    }
}

/// A task's cgroup: `<root>/<task>`
///
/// Created on launch and removed by [`TaskCgroup::destroy`]. Dropping an
/// active group without destroying it leaves the directory behind.
#[derive(Debug)]
pub struct TaskCgroup {
    pub(crate) task: TaskId,
    pub(crate) path: PathBuf,
    active: bool,
}

impl TaskCgroup {
    /// Create the group directory under `root`
    pub async fn create(root: &Path, task: &TaskId) -> Result<Self> {
        let path = root.join(task.as_str());

        match fs::create_dir(&path).await {
            Ok(()) => debug!(task = %task, path = %path.display(), "Created cgroup"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(task = %task, path = %path.display(), "Reusing leftover cgroup");
            }
            Err(e) => return Err(cgroup_error("create", &path, &e)),
        }

        Ok(Self {
            task: task.clone(),
            path,
            active: true,
        })
    }

    /// Directory backing this group
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(Error::CGroup {
                message: format!("cgroup for task {} already destroyed", self.task),
            })
        }
    }

    pub(crate) async fn write_control(&self, file: &str, content: &str) -> Result<()> {
        self.ensure_active()?;
        let path = self.path.join(file);
        fs::write(&path, content)
            .await
            .map_err(|e| cgroup_error("write", &path, &e))
    }

    pub(crate) async fn read_control(&self, file: &str) -> Result<String> {
        self.ensure_active()?;
        let path = self.path.join(file);
        fs::read_to_string(&path)
            .await
            .map_err(|e| cgroup_error("read", &path, &e))
    }

    /// Move `pid` into this group
    pub async fn add_process(&self, pid: ProcessId) -> Result<()> {
        debug!(task = %self.task, pid = pid.as_raw(), "Adding process to cgroup");
        self.write_control("cgroup.procs", &pid.as_raw().to_string())
            .await
    }

    /// Processes currently in the group
    pub async fn processes(&self) -> Result<Vec<ProcessId>> {
        if !self.path.join("cgroup.procs").exists() {
            return Ok(Vec::new());
        }

        Ok(self
            .read_control("cgroup.procs")
            .await?
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .map(ProcessId::from_raw)
            .collect())
    }

    /// Kill every process in the group
    ///
    /// Uses `cgroup.kill` where the kernel provides it, otherwise signals
    /// each listed process.
    pub async fn kill_all(&self) -> Result<()> {
        if self.path.join("cgroup.kill").exists() {
            return self.write_control("cgroup.kill", "1").await;
        }

        for pid in self.processes().await? {
            match signal::kill(pid.into(), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Kill the group's processes and remove its directory
    ///
    /// On error the group stays active and `destroy` may be called again.
    pub async fn destroy(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.kill_all().await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match fs::remove_dir(&self.path).await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) if e.kind() == ErrorKind::ResourceBusy && attempt < REMOVE_ATTEMPTS => {
                    tokio::time::sleep(REMOVE_BACKOFF).await;
                }
                // Ordinary directory rather than cgroupfs
                Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                    fs::remove_dir_all(&self.path)
                        .await
                        .map_err(|e| cgroup_error("remove", &self.path, &e))?;
                    break;
                }
                Err(e) => return Err(cgroup_error("remove", &self.path, &e)),
            }
        }

        self.active = false;
        debug!(task = %self.task, "Destroyed cgroup");
        Ok(())
    }
}

impl Drop for TaskCgroup {
    fn drop(&mut self) {
        if self.active {
            warn!(task = %self.task, path = %self.path.display(), "cgroup dropped without destroy; leaving directory behind");
        }
    }
}
