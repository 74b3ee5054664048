use super::{
    container_port, exec_probe, labels, pod_spec, service, single_replica_deployment, Manifests,
};
use crate::constants::{COMPONENT_DEPENDENCY, REDIS_NAME, REDIS_PORT};
use crate::manifest::ManifestSet;
use crate::stack::RedisSpec;
use crate::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

/// The objects that run Redis inside a kind cluster.
#[derive(Debug, Clone)]
pub struct RedisManifests {
    pub deployment: Deployment,
    pub service: Service,
}

impl Manifests for RedisManifests {
    fn manifest_set(&self) -> Result<ManifestSet> {
        let mut set = ManifestSet::new();
        set.push(&self.deployment)?;
        set.push(&self.service)?;
        Ok(set)
    }

    fn app(&self) -> &str {
        REDIS_NAME
    }
}

/// Defines a single unauthenticated Redis instance.
pub fn redis_manifests(namespace: &str, suite: &str, spec: &RedisSpec) -> RedisManifests {
    let labels = labels(suite, REDIS_NAME, COMPONENT_DEPENDENCY);
    let container = Container {
        name: REDIS_NAME.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![container_port("redis", REDIS_PORT)]),
        readiness_probe: Some(exec_probe(&["redis-cli", "ping"])),
        ..Default::default()
    };
    RedisManifests {
        deployment: single_replica_deployment(REDIS_NAME, namespace, &labels, pod_spec(container)),
        service: service(REDIS_NAME, namespace, &labels, "redis", REDIS_PORT, None),
    }
}
