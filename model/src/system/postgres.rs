use super::{
    container_port, exec_probe, labels, metadata, pod_spec, service, single_replica_deployment,
    Manifests,
};
use crate::constants::{COMPONENT_DEPENDENCY, LOOPBACK_HOST, POSTGRES_NAME, POSTGRES_PORT};
use crate::manifest::ManifestSet;
use crate::stack::PostgresSpec;
use crate::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, Secret, SecretKeySelector, Service,
};
use maplit::btreemap;

const CREDENTIALS_SECRET: &str = "postgresql-credentials";

/// The objects that run PostgreSQL inside a kind cluster.
#[derive(Debug, Clone)]
pub struct PostgresManifests {
    pub secret: Secret,
    pub deployment: Deployment,
    pub service: Service,
}

impl Manifests for PostgresManifests {
    fn manifest_set(&self) -> Result<ManifestSet> {
        let mut set = ManifestSet::new();
        set.push(&self.secret)?;
        set.push(&self.deployment)?;
        set.push(&self.service)?;
        Ok(set)
    }

    fn app(&self) -> &str {
        POSTGRES_NAME
    }
}

/// Defines a single PostgreSQL instance. Credentials live in a secret and reach the container
/// through `POSTGRES_*` environment variables. The pod is ready once `pg_isready` succeeds over
/// TCP, which the socket-only init server started by the entrypoint never does.
pub fn postgres_manifests(namespace: &str, suite: &str, spec: &PostgresSpec) -> PostgresManifests {
    let labels = labels(suite, POSTGRES_NAME, COMPONENT_DEPENDENCY);

    let secret = Secret {
        metadata: metadata(CREDENTIALS_SECRET, namespace, &labels),
        string_data: Some(btreemap! {
            "POSTGRES_USER".to_string() => spec.user.clone(),
            "POSTGRES_PASSWORD".to_string() => spec.password.clone(),
            "POSTGRES_DB".to_string() => spec.database.clone(),
        }),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    let env = ["POSTGRES_USER", "POSTGRES_PASSWORD", "POSTGRES_DB"]
        .iter()
        .map(|key| secret_env(key))
        .collect();

    let container = Container {
        name: POSTGRES_NAME.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env),
        ports: Some(vec![container_port("postgres", POSTGRES_PORT)]),
        readiness_probe: Some(exec_probe(&[
            "pg_isready",
            "-h",
            LOOPBACK_HOST,
            "-U",
            &spec.user,
            "-d",
            &spec.database,
        ])),
        ..Default::default()
    };

    PostgresManifests {
        secret,
        deployment: single_replica_deployment(
            POSTGRES_NAME,
            namespace,
            &labels,
            pod_spec(container),
        ),
        service: service(
            POSTGRES_NAME,
            namespace,
            &labels,
            "postgres",
            POSTGRES_PORT,
            None,
        ),
    }
}

fn secret_env(key: &str) -> EnvVar {
    EnvVar {
        name: key.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(CREDENTIALS_SECRET.to_string()),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
