//! Keel Core - resource sets, node configuration and shared types
//!
//! This crate provides the value types every other Keel crate speaks:
//! the keyed [`ResourceSet`] a node advertises, the override parser that
//! produces one from an operator string, and the node configuration.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod parse;
pub mod resources;
pub mod types;

pub use config::{Defaults, NodeConfig};
pub use error::{Error, Result};
pub use parse::parse;
pub use resources::{
    ByteSize, Dimension, PortRange, Quantity, Ranges, ResourceEntry, ResourceSet, ResourceStats,
};
pub use types::{ProcessId, Role, TaskId};
