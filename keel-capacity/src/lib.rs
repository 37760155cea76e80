//! Node capacity resolution
//!
//! Decides how much CPU, memory, disk and port capacity a node advertises,
//! merging operator overrides with values probed from the host.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod probe;
pub mod resolver;

pub use probe::{HostProbe, MockProbe, Probe, ProbeError, SystemProbe};
pub use resolver::{CapacityResolver, resolve_node_resources};

// Re-export commonly used types
pub use keel_core::{Defaults, ResourceSet, Role};
