use super::{container_name, prepare_image};
use crate::error::{self, Result};
use crate::health::wait_for_http_ok;
use crate::podman::{ContainerSpec, Podman};
use crate::wait::Poll;
use log::{info, warn};
use snafu::ResultExt;
use std::path::Path;
use tempfile::TempDir;
use testenv_model::constants::{
    DATASTORAGE_CONFIG_DIR, DATASTORAGE_CONFIG_FILE, DATASTORAGE_DB_SECRETS_FILE,
    DATASTORAGE_HEALTH_PATH, DATASTORAGE_METRICS_PORT, DATASTORAGE_NAME, DATASTORAGE_PORT,
    DATASTORAGE_REDIS_SECRETS_FILE, DATASTORAGE_SECRETS_DIR, ENV_CONFIG_PATH,
};
use testenv_model::{DataStorageConfig, DataStorageSpec, Placement, PostgresSpec, RenderedConfig};

/// The DataStorage API in a podman container, configured to reach its PostgreSQL and Redis
/// peers by container name.
pub struct DataStorageContainer {
    podman: Podman,
    name: String,
    network: String,
    port: u16,
    metrics_port: u16,
    spec: DataStorageSpec,
    rendered: RenderedConfig,
    /// Holds the mounted config files while the container runs.
    config_dir: Option<TempDir>,
}

impl DataStorageContainer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        podman: Podman,
        suite: &str,
        network: &str,
        (port, metrics_port): (u16, u16),
        spec: DataStorageSpec,
        postgres: &PostgresSpec,
        postgres_host: &str,
        redis_host: &str,
    ) -> Result<Self> {
        let placement = Placement::Container {
            postgres_host: postgres_host.to_string(),
            redis_host: redis_host.to_string(),
        };
        let rendered = DataStorageConfig::new(&spec, postgres, &placement).render(postgres)?;
        Ok(Self {
            podman,
            name: container_name(suite, DATASTORAGE_NAME),
            network: network.to_string(),
            port,
            metrics_port,
            spec,
            rendered,
            config_dir: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Builds the image if requested, writes the config files and starts the container.
    pub async fn start(&mut self) -> Result<()> {
        prepare_image(&self.podman, &self.spec.image, self.spec.build.as_ref()).await?;
        let dir = TempDir::new().context(error::IoSnafu {
            action: "create temp dir for datastorage config",
        })?;
        write_config(dir.path(), &self.rendered).await?;

        self.podman.remove(&self.name).await?;
        let spec = ContainerSpec::new(&self.name, &self.spec.image)
            .network(&self.network)
            .port(self.port, DATASTORAGE_PORT)
            .port(self.metrics_port, DATASTORAGE_METRICS_PORT)
            .env(
                ENV_CONFIG_PATH,
                format!("{}/{}", DATASTORAGE_CONFIG_DIR, DATASTORAGE_CONFIG_FILE),
            )
            .volume(
                dir.path().join(DATASTORAGE_CONFIG_FILE),
                format!("{}/{}", DATASTORAGE_CONFIG_DIR, DATASTORAGE_CONFIG_FILE),
                true,
            )
            .volume(dir.path().join("secrets"), DATASTORAGE_SECRETS_DIR, true);
        self.config_dir = Some(dir);
        self.podman.run(&spec).await.map(|_| ())
    }

    /// Waits for `/health`; on timeout the container's logs are logged before the error returns.
    pub async fn wait_ready(&self, poll: &Poll) -> Result<()> {
        let url = format!("{}{}", self.url(), DATASTORAGE_HEALTH_PATH);
        if let Err(e) = wait_for_http_ok(&url, poll).await {
            match self.podman.logs(&self.name).await {
                Ok(logs) => warn!("DataStorage '{}' did not become healthy:\n{}", self.name, logs),
                Err(logs_err) => warn!("Unable to get logs of '{}': {}", self.name, logs_err),
            }
            return Err(e);
        }
        info!("DataStorage '{}' is ready at {}", self.name, self.url());
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.podman.remove(&self.name).await?;
        self.config_dir = None;
        Ok(())
    }

    #[cfg(test)]
    fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_ref().map(TempDir::path)
    }
}

/// Lays out `config.yaml` and `secrets/` the way the container expects them.
async fn write_config(dir: &Path, rendered: &RenderedConfig) -> Result<()> {
    let secrets = dir.join("secrets");
    tokio::fs::create_dir_all(&secrets)
        .await
        .context(error::IoSnafu {
            action: "create datastorage secrets dir",
        })?;
    for (path, contents) in [
        (dir.join(DATASTORAGE_CONFIG_FILE), &rendered.config_yaml),
        (
            secrets.join(DATASTORAGE_DB_SECRETS_FILE),
            &rendered.db_secrets_yaml,
        ),
        (
            secrets.join(DATASTORAGE_REDIS_SECRETS_FILE),
            &rendered.redis_secrets_yaml,
        ),
    ] {
        tokio::fs::write(&path, contents)
            .await
            .context(error::IoSnafu {
                action: format!("write '{}'", path.display()),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::FakeRunner;
    use std::sync::Arc;

    fn datastorage(runner: &Arc<FakeRunner>) -> DataStorageContainer {
        DataStorageContainer::new(
            Podman::new(runner.clone(), "podman"),
            "gateway",
            "gateway-test-network",
            (18091, 19091),
            DataStorageSpec::default(),
            &PostgresSpec::default(),
            "gateway_postgres_test",
            "gateway_redis_test",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_mounts_rendered_config() {
        let runner = Arc::new(FakeRunner::new());
        let mut ds = datastorage(&runner);
        ds.start().await.unwrap();

        let dir = ds.config_dir().unwrap().to_path_buf();
        let config = std::fs::read_to_string(dir.join(DATASTORAGE_CONFIG_FILE)).unwrap();
        assert!(config.contains("host: gateway_postgres_test"));
        assert!(config.contains("gateway_redis_test:6379"));
        let secrets =
            std::fs::read_to_string(dir.join("secrets").join(DATASTORAGE_DB_SECRETS_FILE))
                .unwrap();
        assert!(secrets.contains("username: slm_user"));

        let run = runner
            .lines()
            .into_iter()
            .find(|line| line.starts_with("podman run"))
            .unwrap();
        assert!(run.contains("-p 18091:8080 -p 19091:9090"));
        assert!(run.contains("-e CONFIG_PATH=/etc/datastorage/config.yaml"));
        assert!(run.contains(&format!(
            "-v {}:/etc/datastorage/config.yaml:ro,z",
            dir.join(DATASTORAGE_CONFIG_FILE).display()
        )));
        assert!(run.ends_with("localhost/datastorage:e2e"));
        assert_eq!(ds.url(), "http://localhost:18091");

        ds.stop().await.unwrap();
        assert!(!dir.exists());
    }
}
