use crate::error::{self, Result};
use crate::podman::Podman;
use crate::process::{path_arg, run_checked, CommandRunner, Invocation};
use log::{debug, info, warn};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use testenv_model::KindClusterConfig;

pub const KUBECONFIG_FILENAME: &str = "kubeconfig.yaml";
const KIND_CONFIG_FILENAME: &str = "kind-config.yaml";
const IMAGE_ARCHIVE_FILENAME: &str = "image.tar";
const PROVIDER_ENV: &str = "KIND_EXPERIMENTAL_PROVIDER";
const CREATE_WAIT: &str = "60s";

/// Drives the `kind` CLI.
#[derive(Clone)]
pub struct Kind {
    runner: Arc<dyn CommandRunner>,
    program: String,
    provider: String,
}

impl Kind {
    /// `provider` is the container engine running the nodes. kind defaults to docker, anything
    /// else is selected through `KIND_EXPERIMENTAL_PROVIDER`.
    pub fn new<S1, S2>(runner: Arc<dyn CommandRunner>, program: S1, provider: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            runner,
            program: program.into(),
            provider: provider.into(),
        }
    }

    fn provider_env(&self) -> Option<(&str, &str)> {
        (self.provider != "docker").then(|| (PROVIDER_ENV, self.provider.as_str()))
    }

    fn command(&self) -> Invocation {
        let invocation = Invocation::new(&self.program);
        match self.provider_env() {
            Some((key, value)) => invocation.env(key, value),
            None => invocation,
        }
    }

    async fn checked(&self, invocation: Invocation) -> Result<String> {
        run_checked(self.runner.as_ref(), &invocation).await
    }

    pub async fn clusters(&self) -> Result<Vec<String>> {
        let stdout = self.checked(self.command().args(["get", "clusters"])).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("No kind clusters"))
            .map(str::to_string)
            .collect())
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.clusters().await?.iter().any(|cluster| cluster == name))
    }

    pub async fn create_cluster(&self, name: &str, config: &Path, kubeconfig: &Path) -> Result<()> {
        info!("Creating kind cluster '{}'", name);
        self.checked(
            self.command()
                .args(["create", "cluster", "--name", name, "--config"])
                .arg(path_arg(config)?)
                .arg("--kubeconfig")
                .arg(path_arg(kubeconfig)?)
                .args(["--wait", CREATE_WAIT]),
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        info!("Deleting kind cluster '{}'", name);
        self.checked(self.command().args(["delete", "cluster", "--name", name]))
            .await
            .map(|_| ())
    }

    pub async fn export_kubeconfig(&self, name: &str, kubeconfig: &Path) -> Result<()> {
        self.checked(
            self.command()
                .args(["export", "kubeconfig", "--name", name, "--kubeconfig"])
                .arg(path_arg(kubeconfig)?),
        )
        .await
        .map(|_| ())
    }

    pub async fn load_image_archive(&self, name: &str, archive: &Path) -> Result<()> {
        self.checked(
            self.command()
                .args(["load", "image-archive"])
                .arg(path_arg(archive)?)
                .args(["--name", name]),
        )
        .await
        .map(|_| ())
    }

    /// Blocking delete for use from `Drop`.
    fn delete_cluster_blocking(&self, name: &str) -> std::result::Result<(), String> {
        use std::process::Command;
        let mut command = Command::new(&self.program);
        command.args(["delete", "cluster", "--name", name]);
        if let Some((key, value)) = self.provider_env() {
            command.env(key, value);
        }
        let output = command.output().map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!(
                "'kind delete cluster' failed with exit status '{}'\n\n{}\n\n{}",
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterOptions {
    /// Where to write the kubeconfig. A temporary directory is used when unset.
    pub kubeconfig: Option<PathBuf>,
    /// Leave the cluster running when the `KindCluster` is dropped.
    pub keep: bool,
    /// Use an existing cluster with the same name instead of recreating it.
    pub reuse: bool,
}

/// A kind cluster. Dropping it deletes the cluster unless it was created with `keep`, or was
/// already deleted with [`KindCluster::delete`].
pub struct KindCluster {
    name: String,
    kind: Kind,
    podman: Podman,
    kubeconfig: PathBuf,
    kubeconfig_dir: Option<TempDir>,
    keep: bool,
    deleted: bool,
}

impl std::fmt::Debug for KindCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindCluster")
            .field("name", &self.name)
            .field("kubeconfig", &self.kubeconfig)
            .field("keep", &self.keep)
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl KindCluster {
    /// Creates a cluster named `name`. An existing cluster with that name is deleted first unless
    /// `options.reuse` is set, in which case it is used as is.
    pub async fn create(
        kind: Kind,
        podman: Podman,
        name: &str,
        config: &KindClusterConfig,
        options: ClusterOptions,
    ) -> Result<Self> {
        let (kubeconfig, kubeconfig_dir) = kubeconfig_location(options.kubeconfig)?;
        let exists = kind.exists(name).await?;
        if exists && options.reuse {
            info!("Reusing kind cluster '{}'", name);
            kind.export_kubeconfig(name, &kubeconfig).await?;
        } else {
            if exists {
                kind.delete_cluster(name).await?;
            }
            let config_dir = TempDir::new().context(error::IoSnafu {
                action: "create temp dir for kind config",
            })?;
            let config_path = config_dir.path().join(KIND_CONFIG_FILENAME);
            let yaml = config.to_yaml()?;
            debug!("kind config:\n{}", yaml);
            tokio::fs::write(&config_path, yaml)
                .await
                .context(error::IoSnafu {
                    action: "write kind config",
                })?;
            kind.create_cluster(name, &config_path, &kubeconfig).await?;
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            podman,
            kubeconfig,
            kubeconfig_dir,
            keep: options.keep,
            deleted: false,
        })
    }

    /// Binds to a cluster that is already running, e.g. one created by an earlier process.
    pub async fn attach(
        kind: Kind,
        podman: Podman,
        name: &str,
        options: ClusterOptions,
    ) -> Result<Self> {
        let (kubeconfig, kubeconfig_dir) = kubeconfig_location(options.kubeconfig)?;
        if kubeconfig_dir.is_some() || !kubeconfig.exists() {
            kind.export_kubeconfig(name, &kubeconfig).await?;
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            podman,
            kubeconfig,
            kubeconfig_dir,
            keep: options.keep,
            deleted: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    /// Copies a local image into the cluster's nodes through a docker-archive, which works for
    /// both podman and docker providers.
    pub async fn load_image(&self, image: &str) -> Result<()> {
        info!("Loading '{}' into kind cluster '{}'", image, self.name);
        let dir = TempDir::new().context(error::IoSnafu {
            action: "create temp dir for image archive",
        })?;
        let archive = dir.path().join(IMAGE_ARCHIVE_FILENAME);
        self.podman.save(image, &archive).await?;
        self.kind.load_image_archive(&self.name, &archive).await
    }

    pub async fn delete(&mut self) -> Result<()> {
        self.kind.delete_cluster(&self.name).await?;
        self.deleted = true;
        Ok(())
    }
}

fn kubeconfig_location(kubeconfig: Option<PathBuf>) -> Result<(PathBuf, Option<TempDir>)> {
    match kubeconfig {
        Some(path) => Ok((path, None)),
        None => {
            let dir = TempDir::new().context(error::IoSnafu {
                action: "create temp dir for kubeconfig",
            })?;
            Ok((dir.path().join(KUBECONFIG_FILENAME), Some(dir)))
        }
    }
}

impl Drop for KindCluster {
    fn drop(&mut self) {
        if self.deleted {
            return;
        }
        if self.keep {
            // The kubeconfig must outlive the process for the kept cluster to be usable.
            if let Some(dir) = self.kubeconfig_dir.take() {
                let _ = dir.into_path();
            }
            info!(
                "Keeping kind cluster '{}', kubeconfig at '{}'",
                self.name,
                self.kubeconfig.display()
            );
            return;
        }
        if let Err(e) = self.kind.delete_cluster_blocking(&self.name) {
            warn!("Unable to delete kind cluster '{}': {}", self.name, e)
        }
    }
}
