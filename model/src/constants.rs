/// Helper macro to avoid retyping the base domain-like name of the tool when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name.
/// When given a string literal parameter it adds `/parameter` to the end.
macro_rules! testenv {
    () => {
        "testenv.dev"
    };
    ($s:literal) => {
        concat!(testenv!(), "/", $s)
    };
}

// System identifiers
pub const TESTENV: &str = "testenv";
pub const DEFAULT_NAMESPACE: &str = "testenv-e2e";
pub const DEFAULT_CLUSTER_NAME: &str = "testenv-e2e";

// Label keys
pub const LABEL_APP: &str = "app";
pub const LABEL_SUITE: &str = testenv!("suite");
pub const LABEL_COMPONENT: &str = testenv!("component");

// Standard tags https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
pub const APP_NAME: &str = "app.kubernetes.io/name";
pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const APP_PART_OF: &str = "app.kubernetes.io/part-of";
pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// Component values
pub const COMPONENT_DEPENDENCY: &str = "dependency";
pub const COMPONENT_WORKLOAD: &str = "workload";

// Images
pub const DEFAULT_POSTGRES_IMAGE: &str = "docker.io/library/postgres:16-alpine";
pub const DEFAULT_REDIS_IMAGE: &str = "docker.io/library/redis:7-alpine";
pub const DEFAULT_DATASTORAGE_IMAGE: &str = "localhost/datastorage:e2e";

// PostgreSQL
pub const POSTGRES_NAME: &str = "postgresql";
pub const POSTGRES_PORT: u16 = 5432;
/// Readiness checks connect here so that the entrypoint's socket-only init server does not count.
pub const LOOPBACK_HOST: &str = "127.0.0.1";
pub const DEFAULT_POSTGRES_USER: &str = "slm_user";
pub const DEFAULT_POSTGRES_PASSWORD: &str = "test_password";
pub const DEFAULT_POSTGRES_DATABASE: &str = "action_history";

// Redis
pub const REDIS_NAME: &str = "redis";
pub const REDIS_PORT: u16 = 6379;

// DataStorage
pub const DATASTORAGE_NAME: &str = "datastorage";
pub const DATASTORAGE_PORT: u16 = 8080;
pub const DATASTORAGE_METRICS_PORT: u16 = 9090;
pub const DATASTORAGE_HEALTH_PATH: &str = "/health";
pub const DATASTORAGE_CONFIG_DIR: &str = "/etc/datastorage";
pub const DATASTORAGE_SECRETS_DIR: &str = "/etc/datastorage/secrets";
pub const DATASTORAGE_CONFIG_FILE: &str = "config.yaml";
pub const DATASTORAGE_DB_SECRETS_FILE: &str = "db-secrets.yaml";
pub const DATASTORAGE_REDIS_SECRETS_FILE: &str = "redis-secrets.yaml";

// Environment variables
pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
pub const ENV_COVERAGE_DIR: &str = "GOCOVERDIR";

// Paths
pub const COVERAGE_MOUNT_PATH: &str = "/coverdata";
pub const COVERAGE_VOLUME: &str = "coverdata";
pub const COVERAGE_MANIFEST_FILE: &str = "coverage-manifest.json";
