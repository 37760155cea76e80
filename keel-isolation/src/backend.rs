//! Isolation backend trait and the no-op backend

use async_trait::async_trait;
use keel_core::{Error, ProcessId, ResourceSet, ResourceStats, Result, TaskId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Trait for isolation backends
///
/// This allows for different implementations:
/// - [`ProcessIsolation`](crate::ProcessIsolation) - process groups, signals only
/// - [`CgroupIsolation`](crate::CgroupIsolation) - kernel control groups (Linux)
/// - [`NullIsolation`] - bookkeeping only, for tests and dry runs
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait IsolationBackend: Send + Sync + fmt::Debug {
    /// Registry name of this backend kind
    fn kind(&self) -> &'static str;

    /// Prepare the backend for a node advertising `resources`
    async fn initialize(&self, resources: &ResourceSet) -> Result<()>;

    /// Start isolating `pid` as `task` under `resources`
    async fn launch(&self, task: &TaskId, pid: ProcessId, resources: &ResourceSet) -> Result<()>;

    /// Change the allocation of a running task
    async fn update(&self, task: &TaskId, resources: &ResourceSet) -> Result<()>;

    /// Current usage of a running task
    async fn usage(&self, task: &TaskId) -> Result<ResourceStats>;

    /// Kill a task and release what the backend holds for it
    async fn kill(&self, task: &TaskId) -> Result<()>;

    /// Release everything; called once when the handle is destroyed
    async fn shutdown(&self) -> Result<()>;
}

/// Stats carrying only the allocation, for backends that cannot meter usage
pub(crate) fn allocation_stats(resources: &ResourceSet) -> ResourceStats {
    ResourceStats {
        cpus_limit: resources.cpus(),
        mem_limit: resources.mem(),
        ..ResourceStats::default()
    }
}

pub(crate) fn unknown_task(task: &TaskId) -> Error {
    Error::UnknownTask {
        task: task.to_string(),
    }
}

/// Backend that records what it is asked to do and enforces nothing
///
/// # Example
/// ```
/// use keel_isolation::{IsolationBackend, NullIsolation};
/// use keel_core::{ProcessId, ResourceSet, TaskId};
///
/// # tokio_test::block_on(async {
/// let backend = NullIsolation::new();
/// let task = TaskId::new("web-1").unwrap();
///
/// backend.launch(&task, ProcessId::from_raw(123), &ResourceSet::new()).await.unwrap();
/// assert!(backend.has_task(&task).await);
///
/// backend.kill(&task).await.unwrap();
/// assert!(!backend.has_task(&task).await);
/// # });
/// ```
#[derive(Clone)]
pub struct NullIsolation {
    state: Arc<Mutex<NullState>>,
}

#[derive(Default)]
struct NullState {
    node: Option<ResourceSet>,
    tasks: HashMap<TaskId, (ProcessId, ResourceSet)>,
    call_count: usize,
    shut_down: bool,
}

impl NullIsolation {
    /// Create a new null backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NullState::default())),
        }
    }

    /// Get the number of backend calls made (for testing)
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.call_count
    }

    /// Check if a task is being tracked
    pub async fn has_task(&self, task: &TaskId) -> bool {
        self.state.lock().await.tasks.contains_key(task)
    }

    /// Node resources passed to `initialize` (for testing)
    pub async fn node_resources(&self) -> Option<ResourceSet> {
        self.state.lock().await.node.clone()
    }

    /// Whether `shutdown` has run (for testing)
    pub async fn is_shut_down(&self) -> bool {
        self.state.lock().await.shut_down
    }
}

impl Default for NullIsolation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NullIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullIsolation").finish_non_exhaustive()
    }
}

#[async_trait]
impl IsolationBackend for NullIsolation {
    fn kind(&self) -> &'static str {
        "null"
    }

    async fn initialize(&self, resources: &ResourceSet) -> Result<()> {
        let mut state = self.state.lock().await;
        state.node = Some(resources.clone());
        state.call_count += 1;

        tracing::debug!(resources = %resources, "Null: initialized");
        Ok(())
    }

    async fn launch(&self, task: &TaskId, pid: ProcessId, resources: &ResourceSet) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.insert(task.clone(), (pid, resources.clone()));
        state.call_count += 1;

        tracing::debug!(task = %task, pid = pid.as_raw(), "Null: launched");
        Ok(())
    }

    async fn update(&self, task: &TaskId, resources: &ResourceSet) -> Result<()> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        let entry = state.tasks.get_mut(task).ok_or_else(|| unknown_task(task))?;
        entry.1 = resources.clone();

        tracing::debug!(task = %task, resources = %resources, "Null: updated");
        Ok(())
    }

    async fn usage(&self, task: &TaskId) -> Result<ResourceStats> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        state
            .tasks
            .get(task)
            .map(|(_, resources)| allocation_stats(resources))
            .ok_or_else(|| unknown_task(task))
    }

    async fn kill(&self, task: &TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        state.tasks.remove(task).ok_or_else(|| unknown_task(task))?;

        tracing::debug!(task = %task, "Null: killed");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        let task_count = state.tasks.len();
        state.tasks.clear();
        state.shut_down = true;

        tracing::debug!(tasks_removed = task_count, "Null: shut down");
        Ok(())
    }
}
