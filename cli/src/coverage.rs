use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use testenv_harness::coverage::{
    bundle, collect_host_dir, extract_from_node, extract_from_pod, flush_by_scale_down,
    CoverageReport,
};
use testenv_model::constants::COVERAGE_MOUNT_PATH;

/// Copy coverage data written by instrumented workloads to the local machine.
///
/// Without `--flush-deployment` the coverage directory is streamed out of every running pod that
/// matches `--selector`. With it, the deployment is scaled to zero first so its binaries flush
/// their counters, and the data is copied from the kind node instead.
#[derive(Debug, Parser)]
pub(crate) struct Coverage {
    /// Kubeconfig of the cluster. Defaults to kubectl's own resolution.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,

    /// Namespace of the workloads. Defaults to the stack file's kind namespace.
    #[clap(long)]
    namespace: Option<String>,

    /// Label selector for the pods to copy from, e.g. `app=gateway`. Not used with
    /// `--flush-deployment`.
    #[clap(long, short = 'l')]
    selector: Option<String>,

    /// Local directory to copy into.
    #[clap(long)]
    out: PathBuf,

    /// Container within each pod.
    #[clap(long, short = 'c')]
    container: Option<String>,

    /// Coverage directory inside the pods or on the node.
    #[clap(long = "remote-dir", default_value = COVERAGE_MOUNT_PATH)]
    remote_dir: String,

    /// Scale this deployment to zero first and copy from the node.
    #[clap(long = "flush-deployment")]
    flush_deployment: Option<String>,

    /// Also pack the output directory into this `.tar.gz`.
    #[clap(long)]
    bundle: Option<PathBuf>,
}

impl Coverage {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let kind_spec = stack.kind_or_default();
        let namespace = self
            .namespace
            .clone()
            .unwrap_or_else(|| kind_spec.namespace.clone());
        let kubectl = env.kubectl(self.kubeconfig.clone());
        tokio::fs::create_dir_all(&self.out)
            .await
            .context(format!("Unable to create '{}'", self.out.display()))?;

        let report = match &self.flush_deployment {
            Some(deployment) => {
                flush_by_scale_down(&kubectl, &namespace, deployment, &env.poll()?)
                    .await
                    .context(format!("Unable to stop '{}'", deployment))?;
                match &kind_spec.coverage_host_dir {
                    Some(host_dir) => collect_host_dir(host_dir, &self.out)
                        .context(format!("Unable to copy '{}'", host_dir.display()))?,
                    None => {
                        let node = format!("{}-control-plane", kind_spec.cluster_name);
                        extract_from_node(&env.podman(), &node, &self.remote_dir, &self.out)
                            .await
                            .context(format!("Unable to copy coverage from node '{}'", node))?
                    }
                }
            }
            None => {
                let selector = self.pod_selector()?;
                let pods = kubectl
                    .pod_names(&namespace, Some(selector))
                    .await
                    .context(format!("Unable to list pods matching '{}'", selector))?;
                let mut report = CoverageReport::default();
                for pod in pods {
                    let extracted = extract_from_pod(
                        &kubectl,
                        &namespace,
                        &pod,
                        self.container.as_deref(),
                        &self.remote_dir,
                        &self.out,
                    )
                    .await
                    .context(format!("Unable to copy coverage from pod '{}'", pod))?;
                    report.merge(extracted);
                }
                report
            }
        };
        report
            .write_manifest(&self.out)
            .await
            .context("Unable to write the coverage manifest")?;
        if let Some(archive) = &self.bundle {
            bundle(&self.out, archive)
                .context(format!("Unable to write '{}'", archive.display()))?;
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .context("Could not create string from coverage report.")?
        );
        Ok(())
    }

    fn pod_selector(&self) -> Result<&str> {
        self.selector
            .as_deref()
            .context("--selector is required unless --flush-deployment is given")
    }
}
