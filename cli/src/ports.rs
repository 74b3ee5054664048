use crate::Env;
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::Write;
use testenv_model::{default_allocations, validate_disjoint, PortAllocation};

/// Prints the host ports a suite binds and fails if any port is claimed twice, either within the
/// built-in table or between the table and the stack file.
#[derive(Debug, Parser)]
pub(crate) struct Ports {
    /// Print the whole built-in table instead of reading the stack file.
    #[clap(long)]
    all: bool,

    /// Output the allocations in JSON format.
    #[clap(long = "json")]
    json: bool,
}

impl Ports {
    pub(crate) fn run(self, env: &Env) -> Result<()> {
        let mut allocations = default_allocations();
        let rows = if self.all {
            allocations.clone()
        } else {
            let stack = env.stack()?;
            let ports = stack
                .resolved_ports()
                .context("Unable to determine the suite's ports")?;
            // The stack's own allocation replaces the built-in row for the same suite.
            allocations.retain(|(suite, _)| suite != &stack.suite);
            allocations.push((stack.suite.clone(), ports));
            vec![(stack.suite, ports)]
        };
        validate_disjoint(&allocations).context("Port allocations overlap")?;

        if self.json {
            let map: BTreeMap<String, PortAllocation> = rows.into_iter().collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&map)
                    .context("Could not create string from port allocations.")?
            );
        } else {
            print!("{}", table(&rows));
        }
        Ok(())
    }
}

fn table(rows: &[(String, PortAllocation)]) -> String {
    let width = rows
        .iter()
        .map(|(suite, _)| suite.len())
        .chain(std::iter::once("SUITE".len()))
        .max()
        .unwrap_or_default();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:>8}  {:>5}  {:>11}  {:>7}",
        "SUITE",
        "POSTGRES",
        "REDIS",
        "DATASTORAGE",
        "METRICS",
        width = width
    );
    for (suite, ports) in rows {
        let _ = writeln!(
            out,
            "{:<width$}  {:>8}  {:>5}  {:>11}  {:>7}",
            suite,
            ports.postgres,
            ports.redis,
            ports.datastorage,
            ports.datastorage_metrics,
            width = width
        );
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_aligned() {
        let rows = vec![(
            "gateway".to_string(),
            PortAllocation {
                postgres: 15437,
                redis: 16380,
                datastorage: 18091,
                datastorage_metrics: 19091,
            },
        )];
        let table = table(&rows);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(
            lines[0],
            "SUITE    POSTGRES  REDIS  DATASTORAGE  METRICS"
        );
        assert_eq!(lines[1], "gateway     15437  16380        18091    19091");
    }

    #[test]
    fn built_in_table_has_no_conflicts() {
        assert!(validate_disjoint(&default_allocations()).is_ok());
    }
}
