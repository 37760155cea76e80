//! Node configuration and the default resource constants

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ByteSize, Error, PortRange, Ranges, Result, Role};

/// Cpus advertised when neither an override nor a CPU probe is available
pub const DEFAULT_CPUS: f64 = 1.0;

/// Memory advertised when neither an override nor a memory probe is available
pub const DEFAULT_MEM: ByteSize = ByteSize::from_gb(1);

/// Disk advertised when neither an override nor a disk probe is available
pub const DEFAULT_DISK: ByteSize = ByteSize::from_gb(10);

/// Port interval advertised when ports are not overridden
pub const DEFAULT_PORTS: PortRange = PortRange {
    begin: 31000,
    end: 32000,
};

/// Fallback amounts for each dimension
///
/// Built once at startup and handed to the resolver by value; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Fallback cpus
    pub cpus: f64,
    /// Fallback memory
    pub mem: ByteSize,
    /// Fallback disk
    pub disk: ByteSize,
    /// Ports advertised when not overridden
    pub ports: Ranges,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            cpus: DEFAULT_CPUS,
            mem: DEFAULT_MEM,
            disk: DEFAULT_DISK,
            ports: Ranges::single(DEFAULT_PORTS),
        }
    }
}

impl Defaults {
    /// Check the fallbacks are advertisable amounts
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for negative or non-finite cpus and
    /// for an empty port set
    pub fn validate(&self) -> Result<()> {
        if !self.cpus.is_finite() || self.cpus < 0.0 {
            return Err(Error::InvalidConfig {
                message: format!("default cpus must be a non-negative number, got {}", self.cpus),
            });
        }
        if self.ports.is_empty() {
            return Err(Error::InvalidConfig {
                message: "default ports must name at least one interval".to_string(),
            });
        }
        Ok(())
    }
}

/// Node agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Raw resource override string, e.g. `cpus:2;mem:4096`
    pub resources: Option<String>,

    /// Role applied to auto-detected and unlabelled entries
    pub default_role: Role,

    /// Work directory; its filesystem is what the disk probe measures
    pub work_dir: PathBuf,

    /// Isolation backend kind
    pub isolation: String,

    /// Mount point of the cgroup v2 hierarchy
    pub cgroups_root: PathBuf,

    /// Sub-hierarchy the agent owns under `cgroups_root`
    pub cgroups_hierarchy: String,

    /// Fallback constants
    pub defaults: Defaults,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            resources: None,
            default_role: Role::default(),
            work_dir: PathBuf::from("/tmp/keel"),
            isolation: "process".to_string(),
            cgroups_root: PathBuf::from("/sys/fs/cgroup"),
            cgroups_hierarchy: "keel".to_string(),
            defaults: Defaults::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file; missing fields take their defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid JSON, or
    /// carries invalid defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&raw)?;
        config.defaults.validate()?;
        tracing::debug!(path = %path.display(), "Loaded node config");
        Ok(config)
    }

    /// Directory the cgroup isolation backend creates task groups under
    #[must_use]
    pub fn cgroups_path(&self) -> PathBuf {
        self.cgroups_root.join(&self.cgroups_hierarchy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let defaults = Defaults::default();
        assert_eq!(defaults.cpus, 1.0);
        assert_eq!(defaults.mem.whole_mb(), 1024);
        assert_eq!(defaults.disk.whole_mb(), 10240);
        assert_eq!(defaults.ports.to_string(), "[31000-32000]");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"resources": "cpus:2", "default_role": "prod"}"#).unwrap();

        assert_eq!(config.resources.as_deref(), Some("cpus:2"));
        assert_eq!(config.default_role.as_str(), "prod");
        assert_eq!(config.isolation, "process");
        assert_eq!(config.defaults, Defaults::default());
        assert_eq!(config.cgroups_path(), PathBuf::from("/sys/fs/cgroup/keel"));
    }

    #[test]
    fn invalid_role_rejected() {
        assert!(serde_json::from_str::<NodeConfig>(r#"{"default_role": "a b"}"#).is_err());
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        tokio::fs::write(&path, r#"{"isolation": "cgroups", "work_dir": "/var/lib/keel"}"#)
            .await
            .unwrap();

        let config = NodeConfig::load(&path).await.unwrap();
        assert_eq!(config.isolation, "cgroups");
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/keel"));
    }

    #[test]
    fn validate_rejects_bad_defaults() {
        assert!(Defaults::default().validate().is_ok());

        for cpus in [-1.0, f64::NAN, f64::INFINITY] {
            let defaults = Defaults { cpus, ..Defaults::default() };
            assert!(matches!(defaults.validate(), Err(Error::InvalidConfig { .. })), "{cpus}");
        }

        let no_ports = Defaults { ports: Ranges::default(), ..Defaults::default() };
        assert!(matches!(no_ports.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn load_rejects_invalid_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        tokio::fs::write(&path, r#"{"defaults": {"cpus": -1}}"#).await.unwrap();
        let result = NodeConfig::load(&path).await;
        assert!(matches!(result, Err(Error::InvalidConfig { .. })), "{result:?}");

        tokio::fs::write(&path, r#"{"defaults": {"ports": [{"begin": 32000, "end": 31000}]}}"#)
            .await
            .unwrap();
        assert!(NodeConfig::load(&path).await.is_err());

        tokio::fs::write(&path, r#"{"defaults": {"ports": []}}"#).await.unwrap();
        assert!(NodeConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn load_missing_file_fails() {
        let result = NodeConfig::load(Path::new("/nonexistent/keel.json")).await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
