use super::{
    container_port, env_var, labels, metadata, service, single_replica_deployment, Manifests,
};
use crate::constants::{
    COMPONENT_DEPENDENCY, DATASTORAGE_CONFIG_DIR, DATASTORAGE_CONFIG_FILE,
    DATASTORAGE_DB_SECRETS_FILE, DATASTORAGE_HEALTH_PATH, DATASTORAGE_METRICS_PORT,
    DATASTORAGE_NAME, DATASTORAGE_PORT, DATASTORAGE_REDIS_SECRETS_FILE, DATASTORAGE_SECRETS_DIR,
    ENV_CONFIG_PATH,
};
use crate::datastorage_config::RenderedConfig;
use crate::manifest::ManifestSet;
use crate::stack::DataStorageSpec;
use crate::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, HTTPGetAction, PodSpec, Probe, Secret,
    SecretVolumeSource, Service, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;

const CONFIG_MAP_NAME: &str = "datastorage-config";
const SECRET_NAME: &str = "datastorage-secrets";
const CONFIG_VOLUME: &str = "config";
const SECRETS_VOLUME: &str = "secrets";

/// The objects that run the DataStorage API inside a kind cluster.
#[derive(Debug, Clone)]
pub struct DataStorageManifests {
    pub config_map: ConfigMap,
    pub secret: Secret,
    pub deployment: Deployment,
    pub service: Service,
}

impl Manifests for DataStorageManifests {
    fn manifest_set(&self) -> Result<ManifestSet> {
        let mut set = ManifestSet::new();
        set.push(&self.config_map)?;
        set.push(&self.secret)?;
        set.push(&self.deployment)?;
        set.push(&self.service)?;
        Ok(set)
    }

    fn app(&self) -> &str {
        DATASTORAGE_NAME
    }
}

/// Defines DataStorage with its rendered configuration. `config.yaml` is mounted from a config map
/// and the credential files from a secret; the API is published on `spec.node_port`.
pub fn datastorage_manifests(
    namespace: &str,
    suite: &str,
    spec: &DataStorageSpec,
    config: &RenderedConfig,
) -> DataStorageManifests {
    let labels = labels(suite, DATASTORAGE_NAME, COMPONENT_DEPENDENCY);

    let config_map = ConfigMap {
        metadata: metadata(CONFIG_MAP_NAME, namespace, &labels),
        data: Some(btreemap! {
            DATASTORAGE_CONFIG_FILE.to_string() => config.config_yaml.clone(),
        }),
        ..Default::default()
    };

    let secret = Secret {
        metadata: metadata(SECRET_NAME, namespace, &labels),
        string_data: Some(btreemap! {
            DATASTORAGE_DB_SECRETS_FILE.to_string() => config.db_secrets_yaml.clone(),
            DATASTORAGE_REDIS_SECRETS_FILE.to_string() => config.redis_secrets_yaml.clone(),
        }),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    let container = Container {
        name: DATASTORAGE_NAME.to_string(),
        image: Some(spec.image.clone()),
        // Images are loaded into kind rather than pulled.
        image_pull_policy: Some("Never".to_string()),
        env: Some(vec![env_var(
            ENV_CONFIG_PATH,
            &format!("{}/{}", DATASTORAGE_CONFIG_DIR, DATASTORAGE_CONFIG_FILE),
        )]),
        ports: Some(vec![
            container_port("http", DATASTORAGE_PORT),
            container_port("metrics", DATASTORAGE_METRICS_PORT),
        ]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(DATASTORAGE_HEALTH_PATH.to_string()),
                port: IntOrString::Int(i32::from(DATASTORAGE_PORT)),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            failure_threshold: Some(24),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: format!("{}/{}", DATASTORAGE_CONFIG_DIR, DATASTORAGE_CONFIG_FILE),
                sub_path: Some(DATASTORAGE_CONFIG_FILE.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: SECRETS_VOLUME.to_string(),
                mount_path: DATASTORAGE_SECRETS_DIR.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        volumes: Some(vec![
            Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(CONFIG_MAP_NAME.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: SECRETS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(SECRET_NAME.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    DataStorageManifests {
        config_map,
        secret,
        deployment: single_replica_deployment(DATASTORAGE_NAME, namespace, &labels, pod_spec),
        service: service(
            DATASTORAGE_NAME,
            namespace,
            &labels,
            "http",
            DATASTORAGE_PORT,
            Some(spec.node_port),
        ),
    }
}
