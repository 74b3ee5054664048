use crate::error::Result;
use crate::process::{
    check, path_arg, run_checked, run_checked_bytes, CommandOutput, CommandRunner, Invocation,
};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A detached container for `podman run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    /// `(host, container)` port pairs.
    pub ports: Vec<(u16, u16)>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<VolumeMount>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl ContainerSpec {
    pub fn new<S1, S2>(name: S1, image: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn network<S: Into<String>>(mut self, network: S) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push((host, container));
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn volume<P: Into<PathBuf>, S: Into<String>>(
        mut self,
        host: P,
        container: S,
        read_only: bool,
    ) -> Self {
        self.volumes.push(VolumeMount {
            host: host.into(),
            container: container.into(),
            read_only,
        });
        self
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The arguments following `podman`.
    fn run_args(&self) -> Result<Vec<String>> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for (host, container) in &self.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host, container));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for volume in &self.volumes {
            // `z` relabels the content for SELinux hosts.
            let options = if volume.read_only { "ro,z" } else { "z" };
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}:{}",
                path_arg(&volume.host)?,
                volume.container,
                options
            ));
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        Ok(args)
    }
}

/// Drives the `podman` CLI.
#[derive(Clone)]
pub struct Podman {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl Podman {
    pub fn new<S: Into<String>>(runner: Arc<dyn CommandRunner>, program: S) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.program)
    }

    async fn checked(&self, invocation: Invocation) -> Result<String> {
        run_checked(self.runner.as_ref(), &invocation).await
    }

    /// Runs and reports only whether the command exited zero.
    async fn status(&self, invocation: Invocation) -> Result<bool> {
        Ok(self.runner.run(&invocation).await?.success())
    }

    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        self.status(self.command().args(["network", "exists", name]))
            .await
    }

    /// Creates the network unless it already exists.
    pub async fn network_create(&self, name: &str) -> Result<()> {
        if self.network_exists(name).await? {
            debug!("Network '{}' already exists", name);
            return Ok(());
        }
        info!("Creating network '{}'", name);
        self.checked(self.command().args(["network", "create", name]))
            .await
            .map(|_| ())
    }

    pub async fn network_remove(&self, name: &str) -> Result<()> {
        if !self.network_exists(name).await? {
            return Ok(());
        }
        self.checked(self.command().args(["network", "rm", "--force", name]))
            .await
            .map(|_| ())
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        self.status(self.command().args(["container", "exists", name]))
            .await
    }

    /// Starts a detached container and returns its id.
    pub async fn run(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Starting container '{}' from '{}'", spec.name, spec.image);
        self.checked(self.command().args(spec.run_args()?))
            .await
            .map(|id| id.trim().to_string())
    }

    /// Force-removes a container. A container that does not exist is not an error.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.checked(self.command().args(["rm", "--force", "--ignore", name]))
            .await
            .map(|_| ())
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.checked(self.command().args(["stop", "--ignore", name]))
            .await
            .map(|_| ())
    }

    fn exec_invocation(&self, name: &str, cmd: &[&str], stdin: Option<&[u8]>) -> Invocation {
        let mut invocation = self.command().arg("exec");
        if let Some(data) = stdin {
            invocation = invocation.arg("-i").stdin(data);
        }
        invocation.arg(name).args(cmd.iter().copied())
    }

    /// Runs `cmd` in the container and returns its stdout, failing on a non-zero exit.
    pub async fn exec(&self, name: &str, cmd: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        self.checked(self.exec_invocation(name, cmd, stdin)).await
    }

    /// Like [`Podman::exec`] but keeps stdout as raw bytes.
    pub async fn exec_bytes(&self, name: &str, cmd: &[&str]) -> Result<Vec<u8>> {
        run_checked_bytes(
            self.runner.as_ref(),
            &self.exec_invocation(name, cmd, None),
        )
        .await
    }

    /// Runs `cmd` in the container and returns the raw output whatever the exit code.
    pub async fn exec_output(&self, name: &str, cmd: &[&str]) -> Result<CommandOutput> {
        self.runner.run(&self.exec_invocation(name, cmd, None)).await
    }

    /// Both output streams of the container; podman writes the container's stderr to its own.
    pub async fn logs(&self, name: &str) -> Result<String> {
        let invocation = self.command().args(["logs", name]);
        let output = self.runner.run(&invocation).await?;
        let stderr = output.stderr_lossy();
        let stdout = String::from_utf8_lossy(&check(&invocation, output)?).to_string();
        Ok(format!("{}{}", stdout, stderr))
    }

    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        self.status(self.command().args(["image", "exists", image]))
            .await
    }

    pub async fn pull(&self, image: &str) -> Result<()> {
        info!("Pulling '{}'", image);
        self.checked(self.command().args(["pull", image]))
            .await
            .map(|_| ())
    }

    /// Pulls the image unless it is already present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            return Ok(());
        }
        self.pull(image).await
    }

    pub async fn build<I, K, V>(
        &self,
        tag: &str,
        context: &Path,
        dockerfile: &Path,
        build_args: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        info!("Building '{}' from '{}'", tag, dockerfile.display());
        let mut invocation = self
            .command()
            .args(["build", "-t", tag, "-f"])
            .arg(path_arg(dockerfile)?);
        for (key, value) in build_args {
            invocation = invocation
                .arg("--build-arg")
                .arg(format!("{}={}", key.as_ref(), value.as_ref()));
        }
        self.checked(invocation.arg(path_arg(context)?))
            .await
            .map(|_| ())
    }

    /// Writes the image to a docker-archive at `archive`.
    pub async fn save(&self, image: &str, archive: &Path) -> Result<()> {
        self.checked(
            self.command()
                .args(["save", "--format", "docker-archive", "-o"])
                .arg(path_arg(archive)?)
                .arg(image),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::FakeRunner;
    use crate::Error;

    fn podman(runner: &Arc<FakeRunner>) -> Podman {
        Podman::new(runner.clone(), "podman")
    }

    #[test]
    fn run_args_in_order() {
        let spec = ContainerSpec::new("gateway_postgres_test", "postgres:16-alpine")
            .network("gateway-test-network")
            .port(15437, 5432)
            .env("POSTGRES_USER", "slm_user")
            .volume("/tmp/config.yaml", "/etc/datastorage/config.yaml", true)
            .arg("-c")
            .arg("max_connections=200");
        assert_eq!(
            spec.run_args().unwrap(),
            vec![
                "run",
                "-d",
                "--name",
                "gateway_postgres_test",
                "--network",
                "gateway-test-network",
                "-p",
                "15437:5432",
                "-e",
                "POSTGRES_USER=slm_user",
                "-v",
                "/tmp/config.yaml:/etc/datastorage/config.yaml:ro,z",
                "postgres:16-alpine",
                "-c",
                "max_connections=200",
            ]
        );
    }

    #[tokio::test]
    async fn network_create_is_idempotent() {
        let runner = Arc::new(FakeRunner::new().ok("podman network exists", ""));
        podman(&runner).network_create("n").await.unwrap();
        assert!(!runner.ran("podman network create"));

        let runner = Arc::new(FakeRunner::new().fail("podman network exists", 1, ""));
        podman(&runner).network_create("n").await.unwrap();
        assert!(runner.ran("podman network create n"));
    }

    #[tokio::test]
    async fn exec_with_stdin_is_interactive() {
        let runner = Arc::new(FakeRunner::new());
        podman(&runner)
            .exec("db", &["psql", "-q"], Some(b"SELECT 1;"))
            .await
            .unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].to_string(), "podman exec -i db psql -q");
        assert_eq!(calls[0].stdin_data(), Some(&b"SELECT 1;"[..]));
    }

    #[tokio::test]
    async fn run_returns_container_id() {
        let runner = Arc::new(FakeRunner::new().ok("podman run", "abc123\n"));
        let id = podman(&runner)
            .run(&ContainerSpec::new("r", "redis"))
            .await
            .unwrap();
        assert_eq!(id, "abc123");
    }

    #[tokio::test]
    async fn failures_carry_output() {
        let runner = Arc::new(
            FakeRunner::new()
                .fail("podman image exists", 1, "")
                .fail("podman pull", 125, "manifest unknown"),
        );
        let err = podman(&runner).ensure_image("nope").await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommandFailed { code: 125, ref stderr, .. } if stderr == "manifest unknown"
        ));
    }

    #[tokio::test]
    async fn build_passes_args_before_context() {
        let runner = Arc::new(FakeRunner::new());
        podman(&runner)
            .build(
                "localhost/datastorage:e2e",
                Path::new("."),
                Path::new("docker/ds.Dockerfile"),
                [("GOFLAGS", "-cover")],
            )
            .await
            .unwrap();
        assert_eq!(
            runner.lines()[0],
            "podman build -t localhost/datastorage:e2e -f docker/ds.Dockerfile \
             --build-arg GOFLAGS=-cover ."
        );
    }

    #[tokio::test]
    async fn container_exists_reads_exit_code() {
        let runner = Arc::new(
            FakeRunner::new()
                .fail("podman container exists gone", 1, "")
                .ok("podman container exists", ""),
        );
        let podman = podman(&runner);
        assert!(podman.container_exists("gateway_redis_test").await.unwrap());
        assert!(!podman.container_exists("gone").await.unwrap());
        assert_eq!(
            runner.lines(),
            vec![
                "podman container exists gateway_redis_test",
                "podman container exists gone",
            ]
        );
    }

    #[tokio::test]
    async fn stop_ignores_missing_containers() {
        let runner = Arc::new(FakeRunner::new());
        podman(&runner).stop("gateway_redis_test").await.unwrap();
        assert_eq!(runner.lines(), vec!["podman stop --ignore gateway_redis_test"]);

        let runner = Arc::new(FakeRunner::new().fail("podman stop", 125, "engine down"));
        let err = podman(&runner).stop("gateway_redis_test").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: 125, .. }));
    }

    #[tokio::test]
    async fn logs_merge_both_streams() {
        let runner = Arc::new(FakeRunner::new().respond(
            "podman logs",
            vec![CommandOutput {
                code: Some(0),
                stdout: b"listening on :8080\n".to_vec(),
                stderr: b"config loaded\n".to_vec(),
            }],
        ));
        let logs = podman(&runner).logs("gateway_datastorage_test").await.unwrap();
        assert_eq!(runner.lines(), vec!["podman logs gateway_datastorage_test"]);
        assert_eq!(logs, "listening on :8080\nconfig loaded\n");

        let runner = Arc::new(FakeRunner::new().fail("podman logs", 125, "no such container"));
        assert!(podman(&runner).logs("missing").await.is_err());
    }
}
