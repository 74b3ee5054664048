/*!

This library provides the data side of `testenv`: the stack file that describes a suite's
dependencies, the per-suite host port table, and the typed Kubernetes, kind and DataStorage
documents that are rendered from a stack.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use datastorage_config::{DataStorageConfig, Placement, RenderedConfig};
pub use error::{Error, Result};
pub use kind_config::KindClusterConfig;
pub use manifest::{render_documents, ManifestSet};
pub use ports::{default_allocations, default_ports, validate_disjoint, PortAllocation};
pub use stack::{
    validate_name, DataStorageSpec, ImageBuild, KindSpec, PortMapping, PostgresSpec, RedisSpec,
    StackSpec, WorkloadSpec,
};

pub mod constants;
mod datastorage_config;
mod error;
pub mod kind_config;
mod manifest;
mod ports;
mod stack;
pub mod system;
