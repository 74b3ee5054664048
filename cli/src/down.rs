use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use testenv_harness::IntegrationStack;

/// Removes the suite's containers and network.
#[derive(Debug, Parser)]
pub(crate) struct Down {}

impl Down {
    pub(crate) async fn run(self, env: &Env) -> Result<()> {
        let stack = env.stack()?;
        let mut integration = IntegrationStack::new(env.podman(), env.poll()?, &stack)
            .context("Unable to plan the integration stack")?;
        integration.down().await.context(format!(
            "Unable to remove the integration stack for '{}'. (Some containers may be left behind)",
            stack.suite
        ))?;
        println!("Integration stack for '{}' was removed.", stack.suite);
        Ok(())
    }
}
