use crate::constants::{
    DATASTORAGE_DB_SECRETS_FILE, DATASTORAGE_METRICS_PORT, DATASTORAGE_PORT,
    DATASTORAGE_REDIS_SECRETS_FILE, DATASTORAGE_SECRETS_DIR, POSTGRES_NAME, POSTGRES_PORT,
    REDIS_NAME, REDIS_PORT,
};
use crate::error::{self, Result};
use crate::stack::{DataStorageSpec, PostgresSpec};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

/// Where DataStorage runs, which decides how it reaches PostgreSQL and Redis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Containers on a shared podman network; peers are addressed by container name.
    Container {
        postgres_host: String,
        redis_host: String,
    },
    /// Pods in a kind cluster; peers are addressed by service DNS name.
    Cluster { namespace: String },
}

impl Placement {
    fn postgres_host(&self) -> String {
        match self {
            Placement::Container { postgres_host, .. } => postgres_host.clone(),
            Placement::Cluster { namespace } => {
                format!("{}.{}.svc.cluster.local", POSTGRES_NAME, namespace)
            }
        }
    }

    fn redis_host(&self) -> String {
        match self {
            Placement::Container { redis_host, .. } => redis_host.clone(),
            Placement::Cluster { namespace } => {
                format!("{}.{}.svc.cluster.local", REDIS_NAME, namespace)
            }
        }
    }
}

/// DataStorage's `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStorageConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
    pub read_timeout: String,
    pub write_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub ssl_mode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: String,
    pub secrets_file: String,
    pub password_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    pub addr: String,
    pub db: u32,
    pub secrets_file: String,
    pub password_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbSecrets {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSecrets {
    pub password: String,
}

/// The three files DataStorage reads at startup, rendered and ready to be written to disk or
/// placed in a ConfigMap/Secret.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedConfig {
    pub config_yaml: String,
    pub db_secrets_yaml: String,
    pub redis_secrets_yaml: String,
}

impl DataStorageConfig {
    pub fn new(spec: &DataStorageSpec, postgres: &PostgresSpec, placement: &Placement) -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DATASTORAGE_PORT,
                metrics_port: DATASTORAGE_METRICS_PORT,
                read_timeout: "30s".to_string(),
                write_timeout: "30s".to_string(),
            },
            database: DatabaseConfig {
                host: placement.postgres_host(),
                port: POSTGRES_PORT,
                name: postgres.database.clone(),
                user: postgres.user.clone(),
                ssl_mode: "disable".to_string(),
                max_open_conns: 25,
                max_idle_conns: 5,
                conn_max_lifetime: "5m".to_string(),
                secrets_file: format!(
                    "{}/{}",
                    DATASTORAGE_SECRETS_DIR, DATASTORAGE_DB_SECRETS_FILE
                ),
                password_key: "password".to_string(),
            },
            redis: RedisConfig {
                addr: format!("{}:{}", placement.redis_host(), REDIS_PORT),
                db: 0,
                secrets_file: format!(
                    "{}/{}",
                    DATASTORAGE_SECRETS_DIR, DATASTORAGE_REDIS_SECRETS_FILE
                ),
                password_key: "password".to_string(),
            },
            logging: LoggingConfig {
                level: spec.log_level.clone(),
                format: "json".to_string(),
            },
        }
    }

    /// Renders `config.yaml` and both secrets files.
    pub fn render(&self, postgres: &PostgresSpec) -> Result<RenderedConfig> {
        let config_yaml = to_yaml(self, "render datastorage config")?;
        let db_secrets_yaml = to_yaml(
            &DbSecrets {
                username: postgres.user.clone(),
                password: postgres.password.clone(),
            },
            "render datastorage database secrets",
        )?;
        // The test Redis runs without auth.
        let redis_secrets_yaml = to_yaml(
            &RedisSecrets {
                password: String::new(),
            },
            "render datastorage redis secrets",
        )?;
        Ok(RenderedConfig {
            config_yaml,
            db_secrets_yaml,
            redis_secrets_yaml,
        })
    }
}

fn to_yaml<T: Serialize>(value: &T, action: &str) -> Result<String> {
    serde_yaml::to_string(value).context(error::SerdeYamlSnafu { action })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn container_placement_uses_container_names() {
        let placement = Placement::Container {
            postgres_host: "gateway_postgres_test".to_string(),
            redis_host: "gateway_redis_test".to_string(),
        };
        let config = DataStorageConfig::new(
            &DataStorageSpec::default(),
            &PostgresSpec::default(),
            &placement,
        );
        assert_eq!(config.database.host, "gateway_postgres_test");
        assert_eq!(config.database.port, POSTGRES_PORT);
        assert_eq!(config.redis.addr, "gateway_redis_test:6379");
    }

    #[test]
    fn cluster_placement_uses_service_dns() {
        let placement = Placement::Cluster {
            namespace: "e2e".to_string(),
        };
        let config = DataStorageConfig::new(
            &DataStorageSpec::default(),
            &PostgresSpec::default(),
            &placement,
        );
        assert_eq!(config.database.host, "postgresql.e2e.svc.cluster.local");
        assert_eq!(config.redis.addr, "redis.e2e.svc.cluster.local:6379");
    }

    #[test]
    fn render_includes_credentials_only_in_secrets() {
        let postgres = PostgresSpec::default();
        let config = DataStorageConfig::new(
            &DataStorageSpec::default(),
            &postgres,
            &Placement::Cluster {
                namespace: "e2e".to_string(),
            },
        );
        let rendered = config.render(&postgres).unwrap();
        assert!(rendered.config_yaml.contains("sslMode: disable"));
        assert!(rendered
            .config_yaml
            .contains("/etc/datastorage/secrets/db-secrets.yaml"));
        assert!(!rendered.config_yaml.contains(&postgres.password));
        let secrets: DbSecrets = serde_yaml::from_str(&rendered.db_secrets_yaml).unwrap();
        assert_eq!(secrets.username, postgres.user);
        assert_eq!(secrets.password, postgres.password);
    }
}
