use super::container_name;
use crate::podman::{ContainerSpec, Podman};
use crate::wait::Poll;
use crate::Result;
use log::info;
use testenv_model::constants::{REDIS_NAME, REDIS_PORT};
use testenv_model::RedisSpec;

/// Redis in a podman container.
#[derive(Clone)]
pub struct RedisContainer {
    podman: Podman,
    name: String,
    network: String,
    host_port: u16,
    spec: RedisSpec,
}

impl RedisContainer {
    pub fn new(
        podman: Podman,
        suite: &str,
        network: &str,
        host_port: u16,
        spec: RedisSpec,
    ) -> Self {
        Self {
            podman,
            name: container_name(suite, REDIS_NAME),
            network: network.to_string(),
            host_port,
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &RedisSpec {
        &self.spec
    }

    pub async fn start(&self) -> Result<()> {
        self.podman.remove(&self.name).await?;
        let spec = ContainerSpec::new(&self.name, &self.spec.image)
            .network(&self.network)
            .port(self.host_port, REDIS_PORT);
        self.podman.run(&spec).await.map(|_| ())
    }

    pub async fn is_ready(&self) -> Result<bool> {
        let output = self
            .podman
            .exec_output(&self.name, &["redis-cli", "ping"])
            .await?;
        Ok(output.success() && output.stdout_lossy().trim() == "PONG")
    }

    pub async fn wait_ready(&self, poll: &Poll) -> Result<()> {
        poll.until(&self.name, || self.is_ready()).await?;
        info!("Redis '{}' is ready", self.name);
        Ok(())
    }

    /// `host:port` for tests running on the host.
    pub fn addr(&self) -> String {
        format!("localhost:{}", self.host_port)
    }

    pub async fn stop(&self) -> Result<()> {
        self.podman.remove(&self.name).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::{ok, FakeRunner};
    use crate::Error;
    use std::sync::Arc;
    use std::time::Duration;

    fn redis(runner: &Arc<FakeRunner>) -> RedisContainer {
        RedisContainer::new(
            Podman::new(runner.clone(), "podman"),
            "gateway",
            "gateway-test-network",
            16380,
            RedisSpec::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_pong() {
        let runner = Arc::new(FakeRunner::new().respond(
            "podman exec gateway_redis_test redis-cli ping",
            vec![ok("LOADING\n"), ok("PONG\n")],
        ));
        redis(&runner)
            .wait_ready(&Poll::new(3, Duration::from_secs(1)).unwrap())
            .await
            .unwrap();
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_pong() {
        let runner = Arc::new(FakeRunner::new().ok("podman exec", "LOADING\n"));
        let err = redis(&runner)
            .wait_ready(&Poll::new(2, Duration::from_secs(1)).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn start_publishes_port() {
        let runner = Arc::new(FakeRunner::new());
        let redis = redis(&runner);
        redis.start().await.unwrap();
        assert_eq!(
            runner.lines()[1],
            "podman run -d --name gateway_redis_test --network gateway-test-network \
             -p 16380:6379 docker.io/library/redis:7-alpine"
        );
        assert_eq!(redis.addr(), "localhost:16380");
    }
}
