use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use testenv_harness::{ClusterOptions, E2eEnvironment, E2eOptions};

/// Set up or tear down an end-to-end environment.
#[derive(Debug, Parser)]
pub(crate) struct E2e {
    #[clap(subcommand)]
    command: E2eCommand,
}

#[derive(Debug, Parser)]
enum E2eCommand {
    /// Create the kind cluster and deploy the suite into it.
    Setup(Setup),
    /// Collect coverage and delete what `setup` created.
    Teardown(Teardown),
}

impl E2e {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        match self.command {
            E2eCommand::Setup(setup) => setup.run(env).await,
            E2eCommand::Teardown(teardown) => teardown.run(env).await,
        }
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Setup {
    /// Write the cluster's kubeconfig here instead of a temporary directory.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,

    /// Use an existing cluster of the same name instead of recreating it.
    #[clap(long)]
    reuse: bool,

    /// Dump pod logs, descriptions and events here if setup fails.
    #[clap(long = "diagnostics-dir")]
    diagnostics_dir: Option<PathBuf>,
}

impl Setup {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let options = E2eOptions {
            cluster: ClusterOptions {
                kubeconfig: self.kubeconfig,
                // The cluster has to outlive this process; `teardown` deletes it.
                keep: true,
                reuse: self.reuse,
            },
            diagnostics_dir: self.diagnostics_dir,
        };
        let e2e = E2eEnvironment::setup(env.runner(), env.settings(), &stack, options)
            .await
            .context(format!(
                "Unable to set up the end-to-end environment for '{}'",
                stack.suite
            ))?;
        let summary = json!({
            "cluster": e2e.cluster().name(),
            "namespace": e2e.namespace(),
            "kubeconfig": e2e.kubeconfig(),
            "datastorageUrl": e2e.datastorage_url(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary)
                .context("Could not create string from environment summary.")?
        );
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Teardown {
    /// Kubeconfig written by `setup`. When omitted it is exported from kind again.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,

    /// Stop coverage-enabled workloads and copy their coverage data here first.
    #[clap(long = "coverage-dir")]
    coverage_dir: Option<PathBuf>,

    /// Delete the namespace but leave the kind cluster running.
    #[clap(long = "keep-cluster")]
    keep_cluster: bool,

    /// Dump pod logs, descriptions and events here if coverage collection fails.
    #[clap(long = "diagnostics-dir")]
    diagnostics_dir: Option<PathBuf>,
}

impl Teardown {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let options = E2eOptions {
            cluster: ClusterOptions {
                kubeconfig: self.kubeconfig,
                keep: self.keep_cluster,
                reuse: true,
            },
            diagnostics_dir: self.diagnostics_dir,
        };
        let e2e = E2eEnvironment::attach(env.runner(), env.settings(), &stack, options)
            .await
            .context(format!(
                "Unable to find the end-to-end environment for '{}'",
                stack.suite
            ))?;
        let report = e2e
            .teardown(self.coverage_dir.as_deref())
            .await
            .context("Teardown did not finish. (Some resources may be left behind)")?;
        if let Some(report) = report {
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .context("Could not create string from coverage report.")?
            );
        }
        Ok(())
    }
}
