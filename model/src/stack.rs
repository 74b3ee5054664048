use crate::constants::{
    DEFAULT_CLUSTER_NAME, DEFAULT_DATASTORAGE_IMAGE, DEFAULT_NAMESPACE, DEFAULT_POSTGRES_DATABASE,
    DEFAULT_POSTGRES_IMAGE, DEFAULT_POSTGRES_PASSWORD, DEFAULT_POSTGRES_USER, DEFAULT_REDIS_IMAGE,
};
use crate::error::{self, Result};
use crate::ports::{default_ports, PortAllocation};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

lazy_static! {
    static ref DNS_LABEL: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new("^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap()
    };
}

/// A suite's dependency stack as described by a stack file.
///
/// ```yaml
/// suite: gateway
/// postgres:
///   migrationsDir: ./migrations
/// redis: {}
/// datastorage:
///   build:
///     context: .
///     dockerfile: docker/datastorage.Dockerfile
/// kind:
///   clusterName: gateway-e2e
/// workloads:
///   - name: gateway
///     image: localhost/gateway:e2e
///     port: 8080
///     nodePort: 30080
///     coverage: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    pub suite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortAllocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastorage: Option<DataStorageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<KindSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workloads: Vec<WorkloadSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostgresSpec {
    pub image: String,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Directory of `*.sql` migrations applied once the database accepts connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrations_dir: Option<PathBuf>,
}

impl Default for PostgresSpec {
    fn default() -> Self {
        Self {
            image: DEFAULT_POSTGRES_IMAGE.to_string(),
            user: DEFAULT_POSTGRES_USER.to_string(),
            password: DEFAULT_POSTGRES_PASSWORD.to_string(),
            database: DEFAULT_POSTGRES_DATABASE.to_string(),
            migrations_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSpec {
    pub image: String,
}

impl Default for RedisSpec {
    fn default() -> Self {
        Self {
            image: DEFAULT_REDIS_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataStorageSpec {
    pub image: String,
    /// When present the image is built locally before it is started or loaded into kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<ImageBuild>,
    pub log_level: String,
    /// NodePort exposing the API from the kind cluster.
    pub node_port: u16,
}

impl Default for DataStorageSpec {
    fn default() -> Self {
        Self {
            image: DEFAULT_DATASTORAGE_IMAGE.to_string(),
            build: None,
            log_level: "info".to_string(),
            node_port: 30081,
        }
    }
}

/// A `podman build` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuild {
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KindSpec {
    pub cluster_name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_image: Option<String>,
    /// Host directory that receives coverage data through a kind `extraMount`. Without it,
    /// coverage is streamed out of the kind node container when it is collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_host_dir: Option<PathBuf>,
    /// Host ports to map onto NodePorts, in addition to the ones derived from the stack.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_port_mappings: Vec<PortMapping>,
}

impl Default for KindSpec {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            node_image: None,
            coverage_host_dir: None,
            extra_port_mappings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub node_port: u16,
    pub host_port: u16,
}

/// A controller or service under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ImageBuild>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Run with a coverage directory mounted and `GOCOVERDIR` pointing at it.
    #[serde(default)]
    pub coverage: bool,
    /// Create a dedicated service account for the workload.
    #[serde(default)]
    pub service_account: bool,
    /// Cluster role bound to the workload's service account, e.g. `cluster-admin` for controllers
    /// that watch cluster-scoped objects. Implies `service_account`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role: Option<String>,
}

impl WorkloadSpec {
    pub fn needs_service_account(&self) -> bool {
        self.service_account || self.cluster_role.is_some()
    }
}

impl StackSpec {
    /// Reads and validates a stack file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading stack file '{}'", path.display());
        let data = std::fs::read_to_string(path).context(error::FileSnafu { path })?;
        Self::parse(&data)
    }

    /// Parses and validates a stack from a YAML string.
    pub fn parse(data: &str) -> Result<Self> {
        let stack: StackSpec = serde_yaml::from_str(data).context(error::SerdeYamlSnafu {
            action: "parse stack file",
        })?;
        stack.validate()?;
        Ok(stack)
    }

    /// Checks the names used for containers, clusters and kubernetes objects.
    pub fn validate(&self) -> Result<()> {
        validate_name("suite", &self.suite)?;
        if let Some(kind) = &self.kind {
            validate_name("cluster", &kind.cluster_name)?;
            validate_name("namespace", &kind.namespace)?;
        }
        let mut seen = HashSet::new();
        for workload in &self.workloads {
            validate_name("workload", &workload.name)?;
            ensure!(
                seen.insert(workload.name.as_str()),
                error::DuplicateWorkloadSnafu {
                    name: &workload.name
                }
            );
        }
        Ok(())
    }

    /// The explicit port allocation if there is one, otherwise the suite's default allocation.
    pub fn resolved_ports(&self) -> Result<PortAllocation> {
        self.ports
            .or_else(|| default_ports(&self.suite))
            .ok_or_else(|| error::Error::MissingPorts {
                suite: self.suite.clone(),
            })
    }

    /// The kind section, or the defaults when the stack file has none.
    pub fn kind_or_default(&self) -> KindSpec {
        self.kind.clone().unwrap_or_default()
    }

    pub fn wants_coverage(&self) -> bool {
        self.workloads.iter().any(|workload| workload.coverage)
    }
}

/// Fails unless `name` is a lowercase RFC 1123 label, which makes it usable as a container,
/// cluster, namespace and object name.
pub fn validate_name(what: &str, name: &str) -> Result<()> {
    ensure!(
        DNS_LABEL.is_match(name),
        error::InvalidNameSnafu { what, name }
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const STACK: &str = r#"
suite: gateway
postgres:
  migrationsDir: ./migrations
redis: {}
datastorage:
  build:
    context: .
    dockerfile: docker/datastorage.Dockerfile
kind:
  clusterName: gateway-e2e
workloads:
  - name: gateway
    image: localhost/gateway:e2e
    port: 8080
    nodePort: 30080
    coverage: true
    env:
      LOG_LEVEL: debug
"#;

    #[test]
    fn parse_with_defaults() {
        let stack = StackSpec::parse(STACK).unwrap();
        assert_eq!(stack.suite, "gateway");
        let postgres = stack.postgres.as_ref().unwrap();
        assert_eq!(postgres.image, DEFAULT_POSTGRES_IMAGE);
        assert_eq!(postgres.user, DEFAULT_POSTGRES_USER);
        assert_eq!(
            postgres.migrations_dir.as_deref(),
            Some(Path::new("./migrations"))
        );
        assert_eq!(stack.redis.as_ref().unwrap().image, DEFAULT_REDIS_IMAGE);
        let kind = stack.kind_or_default();
        assert_eq!(kind.cluster_name, "gateway-e2e");
        assert_eq!(kind.namespace, DEFAULT_NAMESPACE);
        assert!(stack.wants_coverage());
        assert_eq!(stack.workloads[0].env["LOG_LEVEL"], "debug");
    }

    #[test]
    fn ports_fall_back_to_suite_table() {
        let stack = StackSpec::parse(STACK).unwrap();
        assert_eq!(stack.resolved_ports().unwrap(), default_ports("gateway").unwrap());

        let stack = StackSpec::parse("suite: brand-new").unwrap();
        assert!(stack.resolved_ports().is_err());
    }

    #[test]
    fn explicit_ports_win() {
        let stack = StackSpec::parse(
            r#"
suite: gateway
ports:
  postgres: 1
  redis: 2
  datastorage: 3
  datastorageMetrics: 4
"#,
        )
        .unwrap();
        assert_eq!(stack.resolved_ports().unwrap().datastorage_metrics, 4);
    }

    #[test]
    fn bad_names_are_rejected() {
        assert!(StackSpec::parse("suite: Gateway").is_err());
        assert!(StackSpec::parse("suite: gate_way").is_err());
        assert!(StackSpec::parse("suite: -gateway").is_err());
        assert!(validate_name("suite", "gateway-2").is_ok());
    }

    #[test]
    fn read_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, STACK).unwrap();
        let stack = StackSpec::from_path(&path).unwrap();
        assert_eq!(stack.workloads.len(), 1);
        assert!(StackSpec::from_path(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn duplicate_workloads_are_rejected() {
        let stack = r#"
suite: gateway
workloads:
  - name: gateway
    image: a
    port: 1
  - name: gateway
    image: b
    port: 2
"#;
        assert!(StackSpec::parse(stack).is_err());
    }
}
