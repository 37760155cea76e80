//! Capacity resolution: operator overrides first, then host probes, then defaults

use keel_core::{
    ByteSize, Defaults, Dimension, NodeConfig, Quantity, ResourceSet, Result, Role,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::probe::HostProbe;

/// Memory above which [`MEM_RESERVED`] is held back from advertising
pub const MEM_MARGIN_THRESHOLD: ByteSize = ByteSize::from_gb(1);

/// Memory held back when the host has more than [`MEM_MARGIN_THRESHOLD`]
pub const MEM_RESERVED: ByteSize = ByteSize::from_gb(1);

/// Disk above which [`DISK_RESERVED`] is held back from advertising
pub const DISK_MARGIN_THRESHOLD: ByteSize = ByteSize::from_gb(10);

/// Disk held back when the filesystem is larger than [`DISK_MARGIN_THRESHOLD`]
pub const DISK_RESERVED: ByteSize = ByteSize::from_gb(5);

/// Advertised memory for a probed total
#[must_use]
pub fn mem_margin(probed: ByteSize) -> ByteSize {
    if probed > MEM_MARGIN_THRESHOLD {
        probed - MEM_RESERVED
    } else {
        probed
    }
}

/// Advertised disk for a probed filesystem size
#[must_use]
pub fn disk_margin(probed: ByteSize) -> ByteSize {
    if probed > DISK_MARGIN_THRESHOLD {
        probed - DISK_RESERVED
    } else {
        probed
    }
}

/// Fills in whatever capacity dimensions the operator left unset
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use keel_capacity::{CapacityResolver, MockProbe};
/// use keel_core::{ByteSize, Defaults, ResourceSet, Role};
///
/// # tokio_test::block_on(async {
/// let probe = MockProbe::new().with_total_memory(Ok(ByteSize::from_gb(8)));
/// let resolver = CapacityResolver::new(Arc::new(probe), Defaults::default(), "/tmp");
///
/// let resources = resolver.resolve(ResourceSet::new(), &Role::default()).await.unwrap();
/// assert_eq!(resources.mem(), Some(ByteSize::from_mb(7168)));
/// # });
/// ```
pub struct CapacityResolver {
    probe: Arc<dyn HostProbe>,
    defaults: Defaults,
    work_dir: PathBuf,
}

impl CapacityResolver {
    /// Create a resolver probing `work_dir`'s filesystem for disk
    #[must_use]
    pub fn new(probe: Arc<dyn HostProbe>, defaults: Defaults, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            defaults,
            work_dir: work_dir.into(),
        }
    }

    /// Create a resolver from node configuration
    #[must_use]
    pub fn from_config(probe: Arc<dyn HostProbe>, config: &NodeConfig) -> Self {
        Self::new(probe, config.defaults.clone(), config.work_dir.clone())
    }

    /// Complete `overrides` so every dimension has an entry
    ///
    /// Dimensions present in `overrides` (under any role) are kept verbatim
    /// and never probed. The rest are probed concurrently; a failed probe
    /// falls back to the dimension's default. New entries carry `default_role`.
    pub async fn resolve(&self, overrides: ResourceSet, default_role: &Role) -> Result<ResourceSet> {
        let wanted = |name: Dimension| {
            let missing = !overrides.has_dimension(name);
            if !missing {
                debug!(dimension = %name, "Keeping operator-supplied value");
            }
            missing
        };

        let (want_cpus, want_mem, want_disk, want_ports) = (
            wanted(Dimension::Cpus),
            wanted(Dimension::Mem),
            wanted(Dimension::Disk),
            wanted(Dimension::Ports),
        );

        let (cpus, mem, disk) = tokio::join!(
            async { if want_cpus { Some(self.detect_cpus().await) } else { None } },
            async { if want_mem { Some(self.detect_mem().await) } else { None } },
            async { if want_disk { Some(self.detect_disk().await) } else { None } },
        );
        let ports = want_ports.then(|| Quantity::Ranges(self.defaults.ports.clone()));

        let mut resources = overrides;
        for (name, quantity) in [
            (Dimension::Cpus, cpus),
            (Dimension::Mem, mem),
            (Dimension::Disk, disk),
            (Dimension::Ports, ports),
        ] {
            if let Some(quantity) = quantity {
                resources = resources.merge(ResourceSet::single(name, default_role.clone(), quantity)?)?;
            }
        }

        info!(resources = %resources, "Resolved node capacity");
        Ok(resources)
    }

    async fn detect_cpus(&self) -> Quantity {
        match self.probe.cpu_count().await {
            Ok(count) => {
                #[allow(clippy::cast_precision_loss)]
                let cpus = count as f64;
                info!(dimension = "cpus", cpus, "Auto-detected");
                Quantity::Scalar(cpus)
            }
            Err(e) => {
                warn!(
                    dimension = "cpus",
                    probe = %e.probe,
                    error = %e.message,
                    default = self.defaults.cpus,
                    "Failed to auto-detect the number of cpus; using default"
                );
                Quantity::Scalar(self.defaults.cpus)
            }
        }
    }

    async fn detect_mem(&self) -> Quantity {
        match self.probe.total_memory().await {
            Ok(total) => {
                let mem = mem_margin(total);
                info!(dimension = "mem", total = %total, advertised = %mem, "Auto-detected");
                Quantity::Bytes(mem)
            }
            Err(e) => {
                warn!(
                    dimension = "mem",
                    probe = %e.probe,
                    error = %e.message,
                    default = %self.defaults.mem,
                    "Failed to auto-detect the size of main memory; using default"
                );
                Quantity::Bytes(self.defaults.mem)
            }
        }
    }

    async fn detect_disk(&self) -> Quantity {
        match self.probe.filesystem_size(&self.work_dir).await {
            Ok(size) => {
                let disk = disk_margin(size);
                info!(
                    dimension = "disk",
                    work_dir = %self.work_dir.display(),
                    size = %size,
                    advertised = %disk,
                    "Auto-detected"
                );
                Quantity::Bytes(disk)
            }
            Err(e) => {
                warn!(
                    dimension = "disk",
                    probe = %e.probe,
                    work_dir = %self.work_dir.display(),
                    error = %e.message,
                    default = %self.defaults.disk,
                    "Failed to auto-detect the disk space; using default"
                );
                Quantity::Bytes(self.defaults.disk)
            }
        }
    }
}

/// Parse the configured overrides, then resolve against `probe`
///
/// Invalid defaults or a malformed override string fail here, before any
/// probe runs.
pub async fn resolve_node_resources(
    probe: Arc<dyn HostProbe>,
    config: &NodeConfig,
) -> Result<ResourceSet> {
    config.defaults.validate()?;
    let overrides = keel_core::parse(
        config.resources.as_deref().unwrap_or_default(),
        &config.default_role,
    )?;

    CapacityResolver::from_config(probe, config)
        .resolve(overrides, &config.default_role)
        .await
}
