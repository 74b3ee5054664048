use super::{
    container_port, env_var, labels, metadata, service, single_replica_deployment, Manifests,
};
use crate::constants::{
    COMPONENT_WORKLOAD, COVERAGE_MOUNT_PATH, COVERAGE_VOLUME, ENV_COVERAGE_DIR,
};
use crate::manifest::ManifestSet;
use crate::stack::WorkloadSpec;
use crate::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PodSecurityContext, PodSpec, Service, ServiceAccount, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// The objects that run a controller or service under test.
#[derive(Debug, Clone)]
pub struct WorkloadManifests {
    pub name: String,
    pub service_account: Option<ServiceAccount>,
    pub cluster_role_binding: Option<ClusterRoleBinding>,
    pub deployment: Deployment,
    pub service: Service,
}

impl Manifests for WorkloadManifests {
    fn manifest_set(&self) -> Result<ManifestSet> {
        let mut set = ManifestSet::new();
        if let Some(service_account) = &self.service_account {
            set.push(service_account)?;
        }
        if let Some(binding) = &self.cluster_role_binding {
            set.push(binding)?;
        }
        set.push(&self.deployment)?;
        set.push(&self.service)?;
        Ok(set)
    }

    fn app(&self) -> &str {
        &self.name
    }
}

fn service_account_name(workload: &str) -> String {
    format!("{}-sa", workload)
}

/// Defines a workload. With coverage enabled the container writes to `/coverdata`, which is a
/// `hostPath` on the kind node and therefore survives the pod. The pod runs as root so it can
/// write to that directory.
pub fn workload_manifests(namespace: &str, suite: &str, spec: &WorkloadSpec) -> WorkloadManifests {
    let labels = labels(suite, &spec.name, COMPONENT_WORKLOAD);

    let mut env: Vec<_> = spec
        .env
        .iter()
        .map(|(name, value)| env_var(name, value))
        .collect();
    let mut volume_mounts = Vec::new();
    let mut volumes = Vec::new();
    let mut security_context = None;
    if spec.coverage {
        env.push(env_var(ENV_COVERAGE_DIR, COVERAGE_MOUNT_PATH));
        volume_mounts.push(VolumeMount {
            name: COVERAGE_VOLUME.to_string(),
            mount_path: COVERAGE_MOUNT_PATH.to_string(),
            ..Default::default()
        });
        volumes.push(Volume {
            name: COVERAGE_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: COVERAGE_MOUNT_PATH.to_string(),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        });
        security_context = Some(PodSecurityContext {
            run_as_user: Some(0),
            run_as_group: Some(0),
            ..Default::default()
        });
    }

    let container = Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("Never".to_string()),
        args: (!spec.args.is_empty()).then(|| spec.args.clone()),
        env: (!env.is_empty()).then(|| env),
        ports: Some(vec![container_port("http", spec.port)]),
        volume_mounts: (!volume_mounts.is_empty()).then(|| volume_mounts),
        ..Default::default()
    };

    let (service_account, cluster_role_binding) = if spec.needs_service_account() {
        let account = service_account_name(&spec.name);
        let binding = spec.cluster_role.as_ref().map(|role| ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(format!("{}-{}", namespace, account)),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: account.clone(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
        });
        (
            Some(ServiceAccount {
                metadata: metadata(&account, namespace, &labels),
                ..Default::default()
            }),
            binding,
        )
    } else {
        (None, None)
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        service_account_name: service_account
            .as_ref()
            .map(|_| service_account_name(&spec.name)),
        security_context,
        volumes: (!volumes.is_empty()).then(|| volumes),
        // Give instrumented binaries time to flush coverage on shutdown.
        termination_grace_period_seconds: Some(30),
        ..Default::default()
    };

    WorkloadManifests {
        name: spec.name.clone(),
        service_account,
        cluster_role_binding,
        deployment: single_replica_deployment(&spec.name, namespace, &labels, pod_spec),
        service: service(
            &spec.name,
            namespace,
            &labels,
            "http",
            spec.port,
            spec.node_port,
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            name: "gateway".to_string(),
            image: "localhost/gateway:e2e".to_string(),
            build: None,
            port: 8080,
            node_port: Some(30080),
            env: btreemap! { "LOG_LEVEL".to_string() => "debug".to_string() },
            args: vec!["--leader-elect=false".to_string()],
            coverage: false,
            service_account: false,
            cluster_role: None,
        }
    }

    #[test]
    fn plain_workload() {
        let manifests = workload_manifests("e2e", "gateway", &spec());
        assert!(manifests.service_account.is_none());
        assert_eq!(manifests.manifest_set().unwrap().len(), 2);
        let pod = manifests.deployment.spec.unwrap().template.spec.unwrap();
        assert!(pod.volumes.is_none());
        assert!(pod.service_account_name.is_none());
        let container = &pod.containers[0];
        assert_eq!(container.args.as_ref().unwrap()[0], "--leader-elect=false");
        assert_eq!(container.env.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn coverage_mounts_host_path() {
        let mut spec = spec();
        spec.coverage = true;
        let manifests = workload_manifests("e2e", "gateway", &spec);
        let pod = manifests.deployment.spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.unwrap();
        assert_eq!(
            volumes[0].host_path.as_ref().unwrap().path,
            COVERAGE_MOUNT_PATH
        );
        let container = &pod.containers[0];
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|var| var.name == ENV_COVERAGE_DIR
                && var.value.as_deref() == Some(COVERAGE_MOUNT_PATH)));
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            COVERAGE_MOUNT_PATH
        );
        assert_eq!(pod.security_context.unwrap().run_as_user, Some(0));
    }

    #[test]
    fn cluster_role_binds_service_account() {
        let mut spec = spec();
        spec.cluster_role = Some("cluster-admin".to_string());
        let manifests = workload_manifests("e2e", "gateway", &spec);
        let set = manifests.manifest_set().unwrap();
        assert_eq!(set.len(), 4);
        let rendered = set.render().unwrap();
        let account_at = rendered.find("kind: ServiceAccount").unwrap();
        let deployment_at = rendered.find("kind: Deployment").unwrap();
        assert!(account_at < deployment_at);

        let binding = manifests.cluster_role_binding.unwrap();
        assert_eq!(binding.role_ref.name, "cluster-admin");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.name, "gateway-sa");
        assert_eq!(subject.namespace.as_deref(), Some("e2e"));
        let pod = manifests.deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("gateway-sa"));
    }
}
