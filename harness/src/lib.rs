/*!

`testenv-harness` stands up and tears down the dependency stacks that integration and end-to-end
test suites run against. Everything happens by driving the `podman`, `kind` and `kubectl` CLIs:

- [`IntegrationStack`] runs PostgreSQL, Redis and DataStorage as podman containers on a
  per-suite network with per-suite host ports.
- [`E2eEnvironment`] creates a kind cluster, loads images into it and deploys the same
  dependencies plus the workloads under test, and collects coverage on teardown.

External commands go through a [`CommandRunner`] so that the orchestration can be exercised
without the tools installed.

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

pub use e2e::{E2eEnvironment, E2eOptions};
pub use error::{Error, Result};
pub use integration::{ConnectionInfo, IntegrationStack};
pub use kind::{ClusterOptions, Kind, KindCluster};
pub use kubectl::Kubectl;
pub use podman::{ContainerSpec, Podman};
pub use process::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use settings::Settings;
pub use wait::Poll;

pub mod coverage;
pub mod diagnostics;
mod e2e;
mod error;
#[cfg(test)]
mod fake;
pub mod health;
mod integration;
pub mod kind;
pub mod kubectl;
pub mod migrations;
pub mod podman;
pub mod process;
pub mod services;
mod settings;
mod wait;
