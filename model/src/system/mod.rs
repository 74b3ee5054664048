/// Encapsulates the K8S object definitions for a suite's end-to-end stack
mod datastorage;
mod namespace;
mod postgres;
mod redis;
mod workload;

pub use datastorage::{datastorage_manifests, DataStorageManifests};
pub use namespace::namespace;
pub use postgres::{postgres_manifests, PostgresManifests};
pub use redis::{redis_manifests, RedisManifests};
pub use workload::{workload_manifests, WorkloadManifests};

use crate::constants::{
    APP_COMPONENT, APP_MANAGED_BY, APP_NAME, APP_PART_OF, LABEL_APP, LABEL_SUITE, TESTENV,
};
use crate::manifest::ManifestSet;
use crate::Result;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, PodSpec, PodTemplateSpec, Probe, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;
use std::collections::BTreeMap;

/// A group of objects that belong to one deployed service.
pub trait Manifests {
    /// The objects in the order they must be applied.
    fn manifest_set(&self) -> Result<ManifestSet>;

    /// The `app` label value selecting the service's pods.
    fn app(&self) -> &str;
}

/// Labels carried by every object the stack creates.
pub(crate) fn labels(suite: &str, app: &str, component: &str) -> BTreeMap<String, String> {
    btreemap! {
        LABEL_APP => app,
        LABEL_SUITE => suite,
        APP_NAME => app,
        APP_COMPONENT => component,
        APP_PART_OF => suite,
        APP_MANAGED_BY => TESTENV,
    }
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub(crate) fn selector(app: &str) -> BTreeMap<String, String> {
    btreemap! { LABEL_APP.to_string() => app.to_string() }
}

pub(crate) fn metadata(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

pub(crate) fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub(crate) fn container_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(port),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// A single-replica deployment whose pods are selected by the `app` label.
pub(crate) fn single_replica_deployment(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    pod_spec: PodSpec,
) -> Deployment {
    Deployment {
        metadata: metadata(name, namespace, labels),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn pod_spec(container: Container) -> PodSpec {
    PodSpec {
        containers: vec![container],
        ..Default::default()
    }
}

/// A `Service` exposing `port`. Setting `node_port` makes it a `NodePort` service, otherwise it is
/// a `ClusterIP` service.
pub(crate) fn service(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    port_name: &str,
    port: u16,
    node_port: Option<u16>,
) -> Service {
    Service {
        metadata: metadata(name, namespace, labels),
        spec: Some(ServiceSpec {
            type_: Some(
                if node_port.is_some() {
                    "NodePort"
                } else {
                    "ClusterIP"
                }
                .to_string(),
            ),
            selector: Some(selector(name)),
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                node_port: node_port.map(i32::from),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn exec_probe(command: &[&str]) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command.iter().map(|s| s.to_string()).collect()),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(5),
        failure_threshold: Some(12),
        ..Default::default()
    }
}
