//! Name-keyed isolation backend registry
//!
//! The registry is the only place backend kinds are named. Callers ask for
//! a kind string and get back an [`IsolationHandle`] or nothing; they never
//! match on concrete backend types.
//!
//! # Example
//! ```
//! use keel_core::NodeConfig;
//! use keel_isolation::IsolationRegistry;
//!
//! # tokio_test::block_on(async {
//! let registry = IsolationRegistry::builtin(&NodeConfig::default());
//!
//! let mut handle = registry.create("process");
//! assert!(handle.is_some());
//! assert!(registry.create("unknown-xyz").is_none());
//!
//! registry.destroy(&mut handle).await.unwrap();
//! registry.destroy(&mut handle).await.unwrap(); // already empty: no-op
//! # });
//! ```

use keel_core::{NodeConfig, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use tracing::{debug, info, warn};

use crate::backend::IsolationBackend;
use crate::process::ProcessIsolation;

type Constructor = Box<dyn Fn(&NodeConfig) -> Box<dyn IsolationBackend> + Send + Sync>;

enum Slot {
    Available(Constructor),
    Unsupported,
}

/// Whether a kind can be created on this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Registered and constructible
    Available,
    /// Known kind, but compiled out of this build
    Unsupported,
    /// Never registered
    Unknown,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Unsupported => write!(f, "not supported on this build"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Factory for isolation backends, keyed by kind name
pub struct IsolationRegistry {
    config: NodeConfig,
    slots: BTreeMap<String, Slot>,
}

impl IsolationRegistry {
    /// Empty registry; constructors receive `config` when invoked
    #[must_use]
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            config: config.clone(),
            slots: BTreeMap::new(),
        }
    }

    /// Registry with the kinds this build ships: `process` always, and
    /// `cgroups` when built for Linux with the `cgroups` feature
    #[must_use]
    pub fn builtin(config: &NodeConfig) -> Self {
        let mut registry = Self::new(config);
        registry.register("process", |_| Box::new(ProcessIsolation::new()));

        #[cfg(all(target_os = "linux", feature = "cgroups"))]
        registry.register("cgroups", |config| {
            Box::new(crate::cgroup::CgroupIsolation::from_config(config))
        });
        #[cfg(not(all(target_os = "linux", feature = "cgroups")))]
        registry.mark_unsupported("cgroups");

        registry
    }

    /// Register (or replace) the constructor for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&NodeConfig) -> Box<dyn IsolationBackend> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "Registered isolation backend");
        self.slots.insert(kind, Slot::Available(Box::new(constructor)));
        self
    }

    /// Record `kind` as known but unavailable on this build
    pub fn mark_unsupported(&mut self, kind: impl Into<String>) -> &mut Self {
        self.slots.insert(kind.into(), Slot::Unsupported);
        self
    }

    /// Whether `kind` can be created here
    #[must_use]
    pub fn lookup(&self, kind: &str) -> Availability {
        match self.slots.get(kind) {
            Some(Slot::Available(_)) => Availability::Available,
            Some(Slot::Unsupported) => Availability::Unsupported,
            None => Availability::Unknown,
        }
    }

    /// Kinds that [`create`](Self::create) will succeed for, sorted
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Available(_)))
            .map(|(kind, _)| kind.as_str())
            .collect()
    }

    /// Construct a backend of `kind`
    ///
    /// Unknown kinds and kinds unsupported on this build yield `None`;
    /// whether that is fatal is the caller's call.
    #[must_use]
    pub fn create(&self, kind: &str) -> Option<IsolationHandle> {
        match self.slots.get(kind) {
            Some(Slot::Available(constructor)) => {
                info!(kind, "Selected isolation backend");
                Some(IsolationHandle {
                    kind: kind.to_string(),
                    backend: constructor(&self.config),
                    released: false,
                })
            }
            Some(Slot::Unsupported) => {
                warn!(kind, availability = %Availability::Unsupported, "Isolation backend unavailable");
                None
            }
            None => {
                warn!(kind, availability = %Availability::Unknown, "Isolation backend unavailable");
                None
            }
        }
    }

    /// Shut down and release the backend held in `handle`
    ///
    /// The handle is taken out of the option, so calling this again on the
    /// same option (or on an option that never held a handle) does nothing.
    pub async fn destroy(&self, handle: &mut Option<IsolationHandle>) -> Result<()> {
        let Some(mut handle) = handle.take() else {
            return Ok(());
        };

        let result = handle.backend.shutdown().await;
        handle.released = true;

        match &result {
            Ok(()) => info!(kind = %handle.kind, "Released isolation backend"),
            Err(e) => warn!(kind = %handle.kind, error = %e, "Isolation backend shutdown failed"),
        }
        result
    }
}

impl fmt::Debug for IsolationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationRegistry")
            .field("kinds", &self.slots.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Exclusively owned isolation backend
///
/// Derefs to [`IsolationBackend`]. Release it with
/// [`IsolationRegistry::destroy`]; dropping it unreleased logs a warning.
#[derive(Debug)]
pub struct IsolationHandle {
    kind: String,
    backend: Box<dyn IsolationBackend>,
    released: bool,
}

impl IsolationHandle {
    /// Registry name this handle was created under
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Deref for IsolationHandle {
    type Target = dyn IsolationBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl Drop for IsolationHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!(kind = %self.kind, "Isolation handle dropped without destroy");
        }
    }
}
