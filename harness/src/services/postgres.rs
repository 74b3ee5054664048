use super::container_name;
use crate::migrations::{apply_migrations, load_migrations, SqlTarget};
use crate::podman::{ContainerSpec, Podman};
use crate::wait::Poll;
use crate::Result;
use log::info;
use testenv_model::constants::{LOOPBACK_HOST, POSTGRES_PORT};
use testenv_model::PostgresSpec;

/// PostgreSQL in a podman container.
#[derive(Clone)]
pub struct PostgresContainer {
    podman: Podman,
    name: String,
    network: String,
    host_port: u16,
    spec: PostgresSpec,
}

impl PostgresContainer {
    pub fn new(
        podman: Podman,
        suite: &str,
        network: &str,
        host_port: u16,
        spec: PostgresSpec,
    ) -> Self {
        Self {
            podman,
            name: container_name(suite, "postgres"),
            network: network.to_string(),
            host_port,
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &PostgresSpec {
        &self.spec
    }

    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec::new(&self.name, &self.spec.image)
            .network(&self.network)
            .port(self.host_port, POSTGRES_PORT)
            .env("POSTGRES_USER", &self.spec.user)
            .env("POSTGRES_PASSWORD", &self.spec.password)
            .env("POSTGRES_DB", &self.spec.database)
    }

    /// Replaces any leftover container from an earlier run and starts a fresh one.
    pub async fn start(&self) -> Result<()> {
        self.podman.remove(&self.name).await?;
        self.podman.run(&self.container_spec()).await.map(|_| ())
    }

    /// The entrypoint runs its init scripts against a temporary server that only listens on the
    /// unix socket, so both checks go over TCP. `pg_isready` alone also passes before the server
    /// accepts queries.
    pub async fn is_ready(&self) -> Result<bool> {
        let user = self.spec.user.as_str();
        let database = self.spec.database.as_str();
        let isready = self
            .podman
            .exec_output(
                &self.name,
                &["pg_isready", "-h", LOOPBACK_HOST, "-U", user, "-d", database],
            )
            .await?;
        if !isready.success() {
            return Ok(false);
        }
        let query = self
            .podman
            .exec_output(
                &self.name,
                &[
                    "psql", "-h", LOOPBACK_HOST, "-U", user, "-d", database, "-c", "SELECT 1",
                ],
            )
            .await?;
        Ok(query.success())
    }

    pub async fn wait_ready(&self, poll: &Poll) -> Result<()> {
        poll.until(&self.name, || self.is_ready()).await?;
        info!("PostgreSQL '{}' is ready", self.name);
        Ok(())
    }

    /// Applies the stack's migrations, if it has any. Returns how many were applied.
    pub async fn migrate(&self) -> Result<usize> {
        let dir = match &self.spec.migrations_dir {
            Some(dir) => dir,
            None => return Ok(0),
        };
        let migrations = load_migrations(dir)?;
        let target = SqlTarget::Container {
            podman: self.podman.clone(),
            container: self.name.clone(),
        };
        apply_migrations(&target, &self.spec.user, &self.spec.database, &migrations).await
    }

    /// Connection string for tests running on the host.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@localhost:{}/{}?sslmode=disable",
            self.spec.user, self.spec.password, self.host_port, self.spec.database
        )
    }

    pub async fn stop(&self) -> Result<()> {
        self.podman.remove(&self.name).await
    }
}
