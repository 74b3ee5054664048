//! Container lifecycles for the integration stack. Each service runs as a podman container named
//! `<suite>_<service>_test` on the suite's network, publishing its port on the suite's host port.

mod datastorage;
mod postgres;
mod redis;

pub use datastorage::DataStorageContainer;
pub use postgres::PostgresContainer;
pub use redis::RedisContainer;

use crate::podman::Podman;
use crate::Result;
use testenv_model::ImageBuild;

pub fn container_name(suite: &str, service: &str) -> String {
    format!("{}_{}_test", suite, service)
}

pub fn network_name(suite: &str) -> String {
    format!("{}-test-network", suite)
}

/// Builds `image` when the stack asks for a local build, otherwise makes sure it is present.
pub async fn prepare_image(podman: &Podman, image: &str, build: Option<&ImageBuild>) -> Result<()> {
    match build {
        Some(build) => {
            podman
                .build(image, &build.context, &build.dockerfile, &build.build_args)
                .await
        }
        None => podman.ensure_image(image).await,
    }
}
