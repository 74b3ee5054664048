use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The host ports a suite binds for its dependency stack. Every suite gets its own set so that
/// several suites can run side by side on one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub postgres: u16,
    pub redis: u16,
    pub datastorage: u16,
    pub datastorage_metrics: u16,
}

impl PortAllocation {
    /// Each host port paired with the name of the service that binds it.
    pub fn named(&self) -> [(&'static str, u16); 4] {
        [
            ("postgres", self.postgres),
            ("redis", self.redis),
            ("datastorage", self.datastorage),
            ("datastorage-metrics", self.datastorage_metrics),
        ]
    }
}

/// Suites with a well-known allocation. Integration suites that are not in this table must
/// declare their ports in the stack file.
const DEFAULT_ALLOCATIONS: &[(&str, PortAllocation)] = &[
    (
        "datastorage",
        PortAllocation {
            postgres: 15433,
            redis: 16379,
            datastorage: 18090,
            datastorage_metrics: 19090,
        },
    ),
    (
        "gateway",
        PortAllocation {
            postgres: 15437,
            redis: 16380,
            datastorage: 18091,
            datastorage_metrics: 19091,
        },
    ),
    (
        "remediationorchestrator",
        PortAllocation {
            postgres: 15435,
            redis: 16381,
            datastorage: 18093,
            datastorage_metrics: 19093,
        },
    ),
    (
        "signalprocessing",
        PortAllocation {
            postgres: 15436,
            redis: 16382,
            datastorage: 18094,
            datastorage_metrics: 19094,
        },
    ),
    (
        "aianalysis",
        PortAllocation {
            postgres: 15438,
            redis: 16384,
            datastorage: 18095,
            datastorage_metrics: 19095,
        },
    ),
    (
        "notification",
        PortAllocation {
            postgres: 15439,
            redis: 16385,
            datastorage: 18096,
            datastorage_metrics: 19096,
        },
    ),
    (
        "workflowexecution",
        PortAllocation {
            postgres: 15441,
            redis: 16388,
            datastorage: 18097,
            datastorage_metrics: 19097,
        },
    ),
];

/// Returns the built-in allocation for `suite`, if there is one.
pub fn default_ports(suite: &str) -> Option<PortAllocation> {
    DEFAULT_ALLOCATIONS
        .iter()
        .find(|(name, _)| *name == suite)
        .map(|(_, ports)| *ports)
}

/// All built-in allocations, in table order.
pub fn default_allocations() -> Vec<(String, PortAllocation)> {
    DEFAULT_ALLOCATIONS
        .iter()
        .map(|(name, ports)| (name.to_string(), *ports))
        .collect()
}

/// Fails if any host port is used twice, whether by two suites or by two services of the same
/// suite.
pub fn validate_disjoint<S>(allocations: &[(S, PortAllocation)]) -> Result<()>
where
    S: AsRef<str>,
{
    let mut seen: HashMap<u16, String> = HashMap::new();
    for (suite, ports) in allocations {
        for (service, port) in ports.named() {
            let owner = format!("{}/{}", suite.as_ref(), service);
            if let Some(first) = seen.get(&port) {
                return error::PortConflictSnafu {
                    port,
                    first: first.clone(),
                    second: owner,
                }
                .fail();
            }
            seen.insert(port, owner);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn default_table_is_disjoint() {
        validate_disjoint(&default_allocations()).unwrap();
    }

    #[test]
    fn known_suite_has_ports() {
        let ports = default_ports("gateway").unwrap();
        assert_eq!(ports.postgres, 15437);
        assert_eq!(ports.redis, 16380);
        assert!(default_ports("no-such-suite").is_none());
    }

    #[test]
    fn conflict_across_suites_is_reported() {
        let a = default_ports("gateway").unwrap();
        let b = PortAllocation {
            redis: a.redis,
            postgres: 25432,
            datastorage: 28080,
            datastorage_metrics: 29090,
        };
        let err = validate_disjoint(&[("gateway", a), ("custom", b)]).unwrap_err();
        assert!(matches!(
            err,
            Error::PortConflict { port, ref first, ref second }
                if port == a.redis && first == "gateway/redis" && second == "custom/redis"
        ));
    }

    #[test]
    fn conflict_within_suite_is_reported() {
        let ports = PortAllocation {
            postgres: 20000,
            redis: 20001,
            datastorage: 20002,
            datastorage_metrics: 20002,
        };
        assert!(validate_disjoint(&[("solo", ports)]).is_err());
    }
}
