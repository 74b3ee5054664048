use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use testenv_harness::diagnostics::must_gather;

/// Dumps pod logs, `kubectl describe pods` and events of a namespace into a directory.
#[derive(Debug, Parser)]
pub(crate) struct MustGather {
    /// Kubeconfig of the cluster. Defaults to kubectl's own resolution.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,

    /// Namespace to gather. Defaults to the stack file's kind namespace.
    #[clap(long)]
    namespace: Option<String>,

    /// Directory to write into.
    #[clap(long)]
    out: PathBuf,
}

impl MustGather {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let namespace = match self.namespace {
            Some(namespace) => namespace,
            None => env.stack()?.kind_or_default().namespace,
        };
        let written = must_gather(&env.kubectl(self.kubeconfig), &namespace, &self.out)
            .await
            .context(format!("Unable to gather diagnostics for '{}'", namespace))?;
        println!("Wrote {} file(s) to '{}'.", written, self.out.display());
        Ok(())
    }
}
