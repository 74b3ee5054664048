/*!

This is the command line interface for standing up and tearing down the dependency stacks that
integration and end-to-end test suites run against.

!*/

mod cluster;
mod coverage;
mod down;
mod e2e;
mod migrate;
mod must_gather;
mod ports;
mod up;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use testenv_harness::{CommandRunner, Kind, Kubectl, Podman, Poll, Settings, SystemRunner};
use testenv_model::StackSpec;

/// The command line interface for testenv dependency stacks.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    /// Path to the stack file describing the suite.
    #[clap(long = "stack", default_value = "testenv.yaml")]
    stack: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Start the suite's integration stack with podman.
    Up(up::Up),
    /// Remove the suite's integration stack.
    Down(down::Down),
    /// Set up or tear down the suite's end-to-end environment in kind.
    E2e(e2e::E2e),
    /// Manage the suite's kind cluster.
    Cluster(cluster::Cluster),
    /// Apply the suite's database migrations.
    Migrate(migrate::Migrate),
    /// Copy coverage data out of the cluster.
    Coverage(coverage::Coverage),
    /// Dump logs, pod descriptions and events of a namespace.
    MustGather(must_gather::MustGather),
    /// Print host port allocations and check them for conflicts.
    Ports(ports::Ports),
}

/// Shared by every subcommand: the environment settings, the runner for external commands and
/// the stack file location.
pub(crate) struct Env {
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    stack_path: PathBuf,
}

impl Env {
    pub(crate) fn stack(&self) -> Result<StackSpec> {
        StackSpec::from_path(&self.stack_path).context(format!(
            "Unable to load stack file '{}'",
            self.stack_path.display()
        ))
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }

    pub(crate) fn poll(&self) -> Result<Poll> {
        Poll::from_settings(&self.settings).context("Invalid poll settings")
    }

    pub(crate) fn podman(&self) -> Podman {
        self.settings.podman(self.runner())
    }

    pub(crate) fn kind(&self) -> Kind {
        self.settings.kind(self.runner())
    }

    pub(crate) fn kubectl(&self, kubeconfig: Option<PathBuf>) -> Kubectl {
        self.settings.kubectl(self.runner(), kubeconfig)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let env = Env {
        settings: Settings::from_env().context("Unable to read TESTENV_ settings")?,
        runner: Arc::new(SystemRunner),
        stack_path: args.stack,
    };
    match args.command {
        Command::Up(up) => up.run(&env).await,
        Command::Down(down) => down.run(&env).await,
        Command::E2e(e2e) => e2e.run(&env).await,
        Command::Cluster(cluster) => cluster.run(&env).await,
        Command::Migrate(migrate) => migrate.run(&env).await,
        Command::Coverage(coverage) => coverage.run(&env).await,
        Command::MustGather(must_gather) => must_gather.run(&env).await,
        Command::Ports(ports) => ports.run(&env),
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use the default log level for our own crates only.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("testenv_harness"), level)
                .filter(Some("testenv_model"), level)
                .init();
        }
    }
}
