/*!

Every external tool the harness drives (`podman`, `kind`, `kubectl`, `psql` through `exec`) is
described as an [`Invocation`] and executed by a [`CommandRunner`]. [`SystemRunner`] spawns real
processes; tests substitute a scripted runner.

!*/

use crate::error::{self, Result};
use async_trait::async_trait;
use log::{debug, trace};
use snafu::{OptionExt, ResultExt};
use std::fmt::{self, Display};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// A single external command: the program, its arguments, extra environment variables and
/// optionally bytes to feed to its stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin<B: Into<Vec<u8>>>(mut self, data: B) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn stdin_data(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Runs invocations. Implementations return `Ok` for any process that ran, whatever its exit
/// code; only failing to run the process at all is an error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs invocations as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let command_line = invocation.to_string();
        debug!("Running '{}'", command_line);
        let mut command = tokio::process::Command::new(invocation.program());
        command
            .args(invocation.arguments())
            .envs(invocation.environment().iter().cloned())
            .stdin(if invocation.stdin_data().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().context(error::SpawnSnafu {
            command: &command_line,
        })?;

        // Feed stdin while the output is being collected so a chatty child cannot block on a
        // full pipe.
        let writer = match (invocation.stdin_data(), child.stdin.take()) {
            (Some(data), Some(mut stdin)) => {
                let data = data.to_vec();
                Some(tokio::spawn(async move {
                    let result = stdin.write_all(&data).await;
                    drop(stdin);
                    result
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await.context(error::SpawnSnafu {
            command: &command_line,
        })?;
        let output = CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        trace!(
            "'{}' exited with {:?}\nstdout:\n{}\nstderr:\n{}",
            command_line,
            output.code,
            output.stdout_lossy(),
            output.stderr_lossy()
        );

        // A failed command explains itself better than the broken pipe it caused.
        if let (Some(writer), true) = (writer, output.success()) {
            writer
                .await
                .unwrap_or_else(|e| Err(std::io::Error::new(std::io::ErrorKind::Other, e)))
                .context(error::StdinWriteSnafu {
                    command: &command_line,
                })?;
        }
        Ok(output)
    }
}

/// Runs `invocation` and returns its stdout, or a `CommandFailed` error carrying the exit code
/// and both output streams when it exits non-zero.
pub async fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<String> {
    run_checked_bytes(runner, invocation)
        .await
        .map(|stdout| String::from_utf8_lossy(&stdout).to_string())
}

/// Like [`run_checked`] but keeps stdout as raw bytes, e.g. for a tar stream.
pub async fn run_checked_bytes(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<Vec<u8>> {
    let output = runner.run(invocation).await?;
    check(invocation, output)
}

/// Converts an unsuccessful output into a `CommandFailed` error.
pub fn check(invocation: &Invocation, output: CommandOutput) -> Result<Vec<u8>> {
    if output.success() {
        return Ok(output.stdout);
    }
    error::CommandFailedSnafu {
        command: invocation.to_string(),
        code: output.code.unwrap_or(-1),
        stdout: output.stdout_lossy(),
        stderr: output.stderr_lossy(),
    }
    .fail()
}

/// Paths are passed to external tools as strings, so they must be valid utf-8.
pub fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .context(error::NonUtf8PathSnafu { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn display_quotes_whitespace() {
        let invocation = Invocation::new("kubectl")
            .args(["exec", "-n", "e2e"])
            .arg("psql -c 'SELECT 1'")
            .arg("");
        assert_eq!(
            invocation.to_string(),
            "kubectl exec -n e2e 'psql -c 'SELECT 1'' ''"
        );
    }

    #[test]
    fn check_reports_streams() {
        let invocation = Invocation::new("podman").arg("ps");
        let output = CommandOutput {
            code: Some(125),
            stdout: b"out".to_vec(),
            stderr: b"boom".to_vec(),
        };
        let err = check(&invocation, output).unwrap_err();
        assert!(matches!(
            err,
            Error::CommandFailed { ref command, code: 125, ref stdout, ref stderr }
                if command == "podman ps" && stdout == "out" && stderr == "boom"
        ));
    }

    #[tokio::test]
    async fn system_runner_runs_processes() {
        let output = SystemRunner
            .run(&Invocation::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout_lossy(), "hello\n");
        assert_eq!(output.stderr_lossy(), "oops\n");
    }

    #[tokio::test]
    async fn system_runner_feeds_stdin() {
        let stdout = run_checked(&SystemRunner, &Invocation::new("cat").stdin("piped"))
            .await
            .unwrap();
        assert_eq!(stdout, "piped");
    }

    #[tokio::test]
    async fn system_runner_passes_env() {
        let stdout = run_checked(
            &SystemRunner,
            &Invocation::new("sh")
                .args(["-c", "printf %s \"$TESTENV_PROBE\""])
                .env("TESTENV_PROBE", "set"),
        )
        .await
        .unwrap();
        assert_eq!(stdout, "set");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = SystemRunner
            .run(&Invocation::new("testenv-no-such-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
