use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use testenv_harness::{ClusterOptions, KindCluster};
use testenv_model::KindClusterConfig;

/// Manage the kind cluster named in the stack file.
#[derive(Debug, Parser)]
pub(crate) struct Cluster {
    #[clap(subcommand)]
    command: ClusterCommand,
}

#[derive(Debug, Parser)]
enum ClusterCommand {
    /// Create the cluster with the suite's port mappings and mounts.
    Create(Create),
    /// Delete the cluster.
    Delete(Delete),
    /// Copy local images into the cluster's nodes.
    LoadImage(LoadImage),
}

impl Cluster {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        match self.command {
            ClusterCommand::Create(create) => create.run(env).await,
            ClusterCommand::Delete(delete) => delete.run(env).await,
            ClusterCommand::LoadImage(load_image) => load_image.run(env).await,
        }
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Create {
    /// Write the cluster's kubeconfig here instead of a temporary directory.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,

    /// Keep an existing cluster of the same name instead of recreating it.
    #[clap(long)]
    reuse: bool,
}

impl Create {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let ports = stack
            .resolved_ports()
            .context("Unable to determine the suite's ports")?;
        let kind_spec = stack.kind_or_default();
        let config = KindClusterConfig::for_stack(&stack, &ports);
        let cluster = KindCluster::create(
            env.kind(),
            env.podman(),
            &kind_spec.cluster_name,
            &config,
            ClusterOptions {
                kubeconfig: self.kubeconfig,
                keep: true,
                reuse: self.reuse,
            },
        )
        .await
        .context(format!(
            "Unable to create kind cluster '{}'",
            kind_spec.cluster_name
        ))?;
        println!("{}", cluster.kubeconfig().display());
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Delete {}

impl Delete {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let name = env.stack()?.kind_or_default().cluster_name;
        env.kind()
            .delete_cluster(&name)
            .await
            .context(format!("Unable to delete kind cluster '{}'", name))?;
        println!("Kind cluster '{}' was deleted.", name);
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub(crate) struct LoadImage {
    /// The images to load, e.g. `localhost/gateway:e2e`.
    #[clap(required = true)]
    images: Vec<String>,
}

impl LoadImage {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let name = env.stack()?.kind_or_default().cluster_name;
        let cluster = KindCluster::attach(
            env.kind(),
            env.podman(),
            &name,
            ClusterOptions {
                keep: true,
                ..Default::default()
            },
        )
        .await
        .context(format!("Unable to find kind cluster '{}'", name))?;
        for image in &self.images {
            cluster
                .load_image(image)
                .await
                .context(format!("Unable to load '{}' into '{}'", image, name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_image_needs_an_image() {
        assert!(Cluster::try_parse_from(["cluster", "load-image"]).is_err());
        let cluster =
            Cluster::try_parse_from(["cluster", "load-image", "localhost/a:e2e", "localhost/b:e2e"])
                .unwrap();
        assert!(matches!(
            cluster.command,
            ClusterCommand::LoadImage(LoadImage { ref images }) if images.len() == 2
        ));
    }
}
