use crate::Env;
use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use testenv_harness::services::{network_name, PostgresContainer};
use testenv_harness::{ClusterOptions, E2eEnvironment, E2eOptions};

/// Where the PostgreSQL that receives the migrations runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MigrationTarget {
    /// The integration stack's podman container.
    Container,
    /// The PostgreSQL pod of the end-to-end environment.
    Cluster,
}

impl FromStr for MigrationTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container" => Ok(Self::Container),
            "cluster" => Ok(Self::Cluster),
            other => Err(anyhow!(
                "Unknown migration target '{}', expected 'container' or 'cluster'",
                other
            )),
        }
    }
}

/// Applies the `Up` sections of the stack's migration files in version order.
#[derive(Debug, Parser)]
pub(crate) struct Migrate {
    /// Either `container` or `cluster`.
    #[clap(long, default_value = "container")]
    target: MigrationTarget,

    /// Kubeconfig of the end-to-end cluster, for `--target cluster`.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,
}

impl Migrate {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let applied = match self.target {
            MigrationTarget::Container => {
                let spec = stack
                    .postgres
                    .clone()
                    .context("The stack file has no postgres section")?;
                let ports = stack
                    .resolved_ports()
                    .context("Unable to determine the suite's ports")?;
                let postgres = PostgresContainer::new(
                    env.podman(),
                    &stack.suite,
                    &network_name(&stack.suite),
                    ports.postgres,
                    spec,
                );
                postgres
                    .migrate()
                    .await
                    .context(format!("Unable to migrate '{}'", postgres.name()))?
            }
            MigrationTarget::Cluster => {
                let options = E2eOptions {
                    cluster: ClusterOptions {
                        kubeconfig: self.kubeconfig,
                        keep: true,
                        reuse: true,
                    },
                    diagnostics_dir: None,
                };
                let e2e = E2eEnvironment::attach(env.runner(), env.settings(), &stack, options)
                    .await
                    .context("Unable to find the end-to-end environment")?;
                e2e.migrate()
                    .await
                    .context(format!("Unable to migrate namespace '{}'", e2e.namespace()))?
            }
        };
        println!("Applied {} migration(s).", applied);
        Ok(())
    }
}
