//! Host probes for CPU count, memory size and filesystem size

use async_trait::async_trait;
use keel_core::ByteSize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Which host query failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    /// Logical CPU count
    CpuCount,
    /// Total main memory
    TotalMemory,
    /// Size of a filesystem
    FilesystemSize,
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CpuCount => "cpu count",
            Self::TotalMemory => "total memory",
            Self::FilesystemSize => "filesystem size",
        })
    }
}

/// A host query failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{probe} probe failed: {message}")]
pub struct ProbeError {
    /// The failing probe
    pub probe: Probe,
    /// Underlying cause
    pub message: String,
}

impl ProbeError {
    /// Create a new probe error
    pub fn new(probe: Probe, message: impl Into<String>) -> Self {
        Self {
            probe,
            message: message.into(),
        }
    }
}

/// Queries against the running host
///
/// Each query is independent and may fail; none is retried.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so the resolver can run the
/// queries concurrently.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Number of logical CPUs
    async fn cpu_count(&self) -> Result<u64, ProbeError>;

    /// Total main memory
    async fn total_memory(&self) -> Result<ByteSize, ProbeError>;

    /// Total size of the filesystem holding `path`
    async fn filesystem_size(&self, path: &Path) -> Result<ByteSize, ProbeError>;
}

/// Probes the real host
///
/// Every query is a blocking system call and runs on tokio's blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl SystemProbe {
    /// Create a new system probe
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(probe: Probe, f: F) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProbeError::new(probe, e.to_string()))?
}

#[async_trait]
impl HostProbe for SystemProbe {
    async fn cpu_count(&self) -> Result<u64, ProbeError> {
        blocking(Probe::CpuCount, || {
            if !sysinfo::IS_SUPPORTED_SYSTEM {
                return Err(ProbeError::new(Probe::CpuCount, "unsupported platform"));
            }

            let sys = sysinfo::System::new_with_specifics(
                sysinfo::RefreshKind::new().with_cpu(sysinfo::CpuRefreshKind::new()),
            );

            match sys.cpus().len() {
                0 => Err(ProbeError::new(Probe::CpuCount, "no CPUs reported")),
                n => Ok(n as u64),
            }
        })
        .await
    }

    async fn total_memory(&self) -> Result<ByteSize, ProbeError> {
        blocking(Probe::TotalMemory, || {
            if !sysinfo::IS_SUPPORTED_SYSTEM {
                return Err(ProbeError::new(Probe::TotalMemory, "unsupported platform"));
            }

            let mut sys = sysinfo::System::new();
            sys.refresh_memory();

            match sys.total_memory() {
                0 => Err(ProbeError::new(Probe::TotalMemory, "no memory reported")),
                bytes => Ok(ByteSize::from_bytes(bytes)),
            }
        })
        .await
    }

    async fn filesystem_size(&self, path: &Path) -> Result<ByteSize, ProbeError> {
        let path = path.to_path_buf();

        blocking(Probe::FilesystemSize, move || {
            let stat = nix::sys::statvfs::statvfs(&path).map_err(|e| {
                ProbeError::new(Probe::FilesystemSize, format!("{}: {e}", path.display()))
            })?;

            #[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
            let bytes = (stat.blocks() as u64).saturating_mul(stat.fragment_size() as u64);

            tracing::trace!(path = %path.display(), bytes, "statvfs");
            Ok(ByteSize::from_bytes(bytes))
        })
        .await
    }
}

/// Scripted probe for tests (never touches the host)
///
/// Outcomes are fixed at construction; calls are counted per probe so tests
/// can check that overridden dimensions are never probed.
///
/// # Example
/// ```
/// use keel_capacity::{HostProbe, MockProbe, Probe};
/// use keel_core::ByteSize;
///
/// # tokio_test::block_on(async {
/// let probe = MockProbe::new().with_total_memory(Ok(ByteSize::from_gb(8)));
///
/// assert_eq!(probe.total_memory().await.unwrap(), ByteSize::from_gb(8));
/// assert_eq!(probe.call_count(Probe::TotalMemory).await, 1);
/// # });
/// ```
#[derive(Clone)]
pub struct MockProbe {
    cpu_count: Result<u64, String>,
    total_memory: Result<ByteSize, String>,
    filesystem_size: Result<ByteSize, String>,
    latency: Duration,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    cpu_calls: usize,
    memory_calls: usize,
    filesystem_calls: usize,
    last_path: Option<PathBuf>,
}

impl MockProbe {
    /// Mock host with 4 CPUs, 8 GB memory and a 100 GB filesystem
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu_count: Ok(4),
            total_memory: Ok(ByteSize::from_gb(8)),
            filesystem_size: Ok(ByteSize::from_gb(100)),
            latency: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Script the CPU probe
    #[must_use]
    pub fn with_cpu_count(mut self, outcome: Result<u64, &str>) -> Self {
        self.cpu_count = outcome.map_err(str::to_string);
        self
    }

    /// Script the memory probe
    #[must_use]
    pub fn with_total_memory(mut self, outcome: Result<ByteSize, &str>) -> Self {
        self.total_memory = outcome.map_err(str::to_string);
        self
    }

    /// Script the filesystem probe
    #[must_use]
    pub fn with_filesystem_size(mut self, outcome: Result<ByteSize, &str>) -> Self {
        self.filesystem_size = outcome.map_err(str::to_string);
        self
    }

    /// Make every probe take `latency` before answering
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn respond(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Number of times `probe` was queried (for testing)
    pub async fn call_count(&self, probe: Probe) -> usize {
        let state = self.state.lock().await;
        match probe {
            Probe::CpuCount => state.cpu_calls,
            Probe::TotalMemory => state.memory_calls,
            Probe::FilesystemSize => state.filesystem_calls,
        }
    }

    /// Path passed to the most recent filesystem query (for testing)
    pub async fn last_path(&self) -> Option<PathBuf> {
        self.state.lock().await.last_path.clone()
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProbe").finish_non_exhaustive()
    }
}

#[async_trait]
impl HostProbe for MockProbe {
    async fn cpu_count(&self) -> Result<u64, ProbeError> {
        self.state.lock().await.cpu_calls += 1;
        self.respond().await;
        tracing::debug!(outcome = ?self.cpu_count, "Mock: cpu count");

        self.cpu_count
            .clone()
            .map_err(|e| ProbeError::new(Probe::CpuCount, e))
    }

    async fn total_memory(&self) -> Result<ByteSize, ProbeError> {
        self.state.lock().await.memory_calls += 1;
        self.respond().await;
        tracing::debug!(outcome = ?self.total_memory, "Mock: total memory");

        self.total_memory
            .clone()
            .map_err(|e| ProbeError::new(Probe::TotalMemory, e))
    }

    async fn filesystem_size(&self, path: &Path) -> Result<ByteSize, ProbeError> {
        {
            let mut state = self.state.lock().await;
            state.filesystem_calls += 1;
            state.last_path = Some(path.to_path_buf());
        }
        self.respond().await;
        tracing::debug!(path = %path.display(), outcome = ?self.filesystem_size, "Mock: filesystem size");

        self.filesystem_size
            .clone()
            .map_err(|e| ProbeError::new(Probe::FilesystemSize, e))
    }
}
