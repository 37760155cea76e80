//! Resource isolation backends with a name-keyed registry
//!
//! Startup code asks the [`IsolationRegistry`] for a backend by name and gets
//! back an opaque [`IsolationHandle`]; per-task enforcement drives it through
//! the [`IsolationBackend`] trait without knowing the concrete kind.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
#[cfg(all(target_os = "linux", feature = "cgroups"))]
pub mod cgroup;
pub mod process;
pub mod registry;

pub use backend::{IsolationBackend, NullIsolation};
#[cfg(all(target_os = "linux", feature = "cgroups"))]
pub use cgroup::CgroupIsolation;
pub use process::ProcessIsolation;
pub use registry::{Availability, IsolationHandle, IsolationRegistry};

/// Whether this build carries the kernel control-group backend
pub const CGROUPS_SUPPORTED: bool = cfg!(all(target_os = "linux", feature = "cgroups"));

// Re-export commonly used types
pub use keel_core::{ProcessId, ResourceSet, ResourceStats, TaskId};
