use crate::constants::COVERAGE_MOUNT_PATH;
use crate::error::{self, Result};
use crate::ports::PortAllocation;
use crate::stack::{PortMapping, StackSpec};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::PathBuf;

pub const KIND_API_VERSION: &str = "kind.x-k8s.io/v1alpha4";
pub const KIND_CLUSTER_KIND: &str = "Cluster";

/// The `kind create cluster --config` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindClusterConfig {
    pub kind: String,
    pub api_version: String,
    pub nodes: Vec<KindNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindNode {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_port_mappings: Vec<ExtraPortMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<ExtraMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraPortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
}

impl KindClusterConfig {
    /// A single control-plane cluster.
    pub fn single_node(image: Option<String>) -> Self {
        Self {
            kind: KIND_CLUSTER_KIND.to_string(),
            api_version: KIND_API_VERSION.to_string(),
            nodes: vec![KindNode {
                role: "control-plane".to_string(),
                image,
                extra_port_mappings: Vec::new(),
                extra_mounts: Vec::new(),
            }],
        }
    }

    /// Builds the cluster config for a stack: the DataStorage NodePort and every workload
    /// NodePort are reachable from the host, and the coverage directory is mounted into the node
    /// when any workload collects coverage.
    pub fn for_stack(stack: &StackSpec, ports: &PortAllocation) -> Self {
        let kind = stack.kind_or_default();
        let mut config = Self::single_node(kind.node_image.clone());

        let mut mappings = Vec::new();
        if let Some(datastorage) = &stack.datastorage {
            mappings.push(PortMapping {
                node_port: datastorage.node_port,
                host_port: ports.datastorage,
            });
        }
        for workload in &stack.workloads {
            if let Some(node_port) = workload.node_port {
                mappings.push(PortMapping {
                    node_port,
                    host_port: node_port,
                });
            }
        }
        mappings.extend(kind.extra_port_mappings.iter().copied());
        for mapping in mappings {
            config.map_port(mapping);
        }

        if stack.wants_coverage() {
            if let Some(host_dir) = &kind.coverage_host_dir {
                config.mount(host_dir.clone(), PathBuf::from(COVERAGE_MOUNT_PATH));
            }
        }
        config
    }

    /// Maps a NodePort onto a host port on the control-plane node. A NodePort that is already
    /// mapped is left alone.
    pub fn map_port(&mut self, mapping: PortMapping) {
        if let Some(node) = self.nodes.first_mut() {
            let exists = node
                .extra_port_mappings
                .iter()
                .any(|m| m.container_port == mapping.node_port);
            if !exists {
                node.extra_port_mappings.push(ExtraPortMapping {
                    container_port: mapping.node_port,
                    host_port: mapping.host_port,
                    protocol: "TCP".to_string(),
                });
            }
        }
    }

    pub fn mount(&mut self, host_path: PathBuf, container_path: PathBuf) {
        if let Some(node) = self.nodes.first_mut() {
            node.extra_mounts.push(ExtraMount {
                host_path,
                container_path,
            });
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(error::SerdeYamlSnafu {
            action: "render kind cluster config",
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ports::default_ports;

    const STACK: &str = r#"
suite: gateway
datastorage:
  nodePort: 30081
kind:
  clusterName: gateway-e2e
  coverageHostDir: /tmp/coverdata
  extraPortMappings:
    - nodePort: 30090
      hostPort: 9090
workloads:
  - name: gateway
    image: localhost/gateway:e2e
    port: 8080
    nodePort: 30080
    coverage: true
"#;

    #[test]
    fn stack_config_maps_ports_and_mounts_coverage() {
        let stack = StackSpec::parse(STACK).unwrap();
        let ports = default_ports("gateway").unwrap();
        let config = KindClusterConfig::for_stack(&stack, &ports);
        let node = &config.nodes[0];
        assert_eq!(node.role, "control-plane");
        assert_eq!(
            node.extra_port_mappings,
            vec![
                ExtraPortMapping {
                    container_port: 30081,
                    host_port: ports.datastorage,
                    protocol: "TCP".to_string()
                },
                ExtraPortMapping {
                    container_port: 30080,
                    host_port: 30080,
                    protocol: "TCP".to_string()
                },
                ExtraPortMapping {
                    container_port: 30090,
                    host_port: 9090,
                    protocol: "TCP".to_string()
                },
            ]
        );
        assert_eq!(node.extra_mounts[0].host_path, PathBuf::from("/tmp/coverdata"));
        assert_eq!(
            node.extra_mounts[0].container_path,
            PathBuf::from(COVERAGE_MOUNT_PATH)
        );
    }

    #[test]
    fn rendered_yaml_uses_kind_field_names() {
        let mut config = KindClusterConfig::single_node(None);
        config.map_port(PortMapping {
            node_port: 30080,
            host_port: 8080,
        });
        config.map_port(PortMapping {
            node_port: 30080,
            host_port: 8081,
        });
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: kind.x-k8s.io/v1alpha4"));
        assert!(yaml.contains("extraPortMappings"));
        assert!(yaml.contains("containerPort: 30080"));
        assert!(!yaml.contains("8081"));
        assert!(!yaml.contains("extraMounts"));
    }
}
