use crate::error::{self, Result};
use crate::kind::Kind;
use crate::kubectl::Kubectl;
use crate::podman::Podman;
use crate::process::CommandRunner;
use serde::Deserialize;
use snafu::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;

pub const ENV_PREFIX: &str = "TESTENV_";

/// Settings passed to the harness through `TESTENV_` prefixed environment variables.
///
/// # Example
///
/// ```text
/// TESTENV_PODMAN_PATH=/usr/local/bin/podman
/// TESTENV_KEEP_CLUSTER=true
/// TESTENV_POLL_ATTEMPTS=120
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// The path or name of the `podman` binary. Defaults to `podman` (i.e. found via `$PATH`).
    #[serde(default = "podman")]
    pub podman_path: String,

    /// The path or name of the [kind] binary. Defaults to `kind`.
    ///
    /// [kind]: https://kind.sigs.k8s.io/
    #[serde(default = "kind")]
    pub kind_path: String,

    /// The path or name of the `kubectl` binary. Defaults to `kubectl`.
    #[serde(default = "kubectl")]
    pub kubectl_path: String,

    /// The container engine kind runs its nodes on. Anything other than `docker` is passed to
    /// kind as `KIND_EXPERIMENTAL_PROVIDER`.
    #[serde(default = "podman")]
    pub kind_provider: String,

    /// Leave the kind cluster running when the environment is dropped so it can be inspected.
    #[serde(default)]
    pub keep_cluster: bool,

    /// Time between readiness checks.
    #[serde(default = "poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Readiness checks before giving up.
    #[serde(default = "poll_attempts")]
    pub poll_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            podman_path: podman(),
            kind_path: kind(),
            kubectl_path: kubectl(),
            kind_provider: podman(),
            keep_cluster: false,
            poll_interval_ms: poll_interval_ms(),
            poll_attempts: poll_attempts(),
        }
    }
}

impl Settings {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Settings>()
            .context(error::SettingsSnafu)
    }

    /// Reads the settings from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Settings>(vars)
            .context(error::SettingsSnafu)
    }

    pub fn podman(&self, runner: Arc<dyn CommandRunner>) -> Podman {
        Podman::new(runner, &self.podman_path)
    }

    pub fn kind(&self, runner: Arc<dyn CommandRunner>) -> Kind {
        Kind::new(runner, &self.kind_path, &self.kind_provider)
    }

    pub fn kubectl(&self, runner: Arc<dyn CommandRunner>, kubeconfig: Option<PathBuf>) -> Kubectl {
        Kubectl::new(runner, &self.kubectl_path, kubeconfig)
    }
}

// Defaults for serde.
fn podman() -> String {
    String::from("podman")
}

fn kind() -> String {
    String::from("kind")
}

fn kubectl() -> String {
    String::from("kubectl")
}

fn poll_interval_ms() -> u64 {
    2000
}

fn poll_attempts() -> u32 {
    60
}
