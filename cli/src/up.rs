use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use testenv_harness::IntegrationStack;

/// Starts PostgreSQL, Redis and DataStorage for the suite and prints how to reach them as JSON.
#[derive(Debug, Parser)]
pub(crate) struct Up {
    /// Leave whatever was started in place when a service fails to come up.
    #[clap(long)]
    keep_on_failure: bool,
}

impl Up {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let mut integration = IntegrationStack::new(env.podman(), env.poll()?, &stack)
            .context("Unable to plan the integration stack")?;
        let connection = match integration.up().await {
            Ok(connection) => connection,
            Err(e) => {
                if !self.keep_on_failure {
                    if let Err(cleanup) = integration.down().await {
                        warn!("Cleanup after failed start did not finish: {}", cleanup);
                    }
                }
                return Err(e).context(format!(
                    "Unable to start the integration stack for '{}'",
                    stack.suite
                ));
            }
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&connection)
                .context("Could not create string from connection info.")?
        );
        Ok(())
    }
}
