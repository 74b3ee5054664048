/*!

An end-to-end environment: a kind cluster with a suite's dependencies and workloads deployed into
one namespace. PostgreSQL and Redis come up first, then migrations run through `kubectl exec`,
then DataStorage, then the workloads under test.

!*/

use crate::coverage::{collect_host_dir, extract_from_node, flush_by_scale_down, CoverageReport};
use crate::diagnostics::must_gather;
use crate::error::{self, Result};
use crate::kind::{ClusterOptions, KindCluster};
use crate::kubectl::Kubectl;
use crate::migrations::{apply_migrations, load_migrations, SqlTarget};
use crate::podman::Podman;
use crate::process::CommandRunner;
use crate::services::prepare_image;
use crate::settings::Settings;
use crate::wait::Poll;
use log::{info, warn};
use snafu::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testenv_model::constants::{COVERAGE_MOUNT_PATH, LABEL_APP, POSTGRES_NAME};
use testenv_model::system::{
    datastorage_manifests, namespace, postgres_manifests, redis_manifests, workload_manifests,
    Manifests,
};
use testenv_model::{
    render_documents, DataStorageConfig, ImageBuild, KindClusterConfig, KindSpec, Placement,
    PortAllocation, StackSpec,
};

#[derive(Debug, Clone, Default)]
pub struct E2eOptions {
    pub cluster: ClusterOptions,
    /// Where to dump pod logs, descriptions and events when setup or teardown fails.
    pub diagnostics_dir: Option<PathBuf>,
}

pub struct E2eEnvironment {
    stack: StackSpec,
    kind_spec: KindSpec,
    ports: PortAllocation,
    cluster: KindCluster,
    podman: Podman,
    kubectl: Kubectl,
    poll: Poll,
    diagnostics_dir: Option<PathBuf>,
}

fn app_selector(app: &str) -> String {
    format!("{}={}", LABEL_APP, app)
}

impl E2eEnvironment {
    /// Creates the cluster and deploys the whole stack. When anything fails, diagnostics are
    /// gathered (if a directory was given) and the cluster is deleted unless it is kept.
    pub async fn setup(
        runner: Arc<dyn CommandRunner>,
        settings: &Settings,
        stack: &StackSpec,
        options: E2eOptions,
    ) -> Result<Self> {
        stack.validate()?;
        let ports = stack.resolved_ports()?;
        let kind_spec = stack.kind_or_default();
        if stack.wants_coverage() {
            match &kind_spec.coverage_host_dir {
                Some(dir) => tokio::fs::create_dir_all(dir).await.context(error::IoSnafu {
                    action: format!("create coverage dir '{}'", dir.display()),
                })?,
                None => warn!(
                    "Coverage is enabled without a coverage host dir, it will be copied from the \
                     kind node instead"
                ),
            }
        }

        let podman = settings.podman(runner.clone());
        let config = KindClusterConfig::for_stack(stack, &ports);
        let mut cluster_options = options.cluster;
        cluster_options.keep |= settings.keep_cluster;
        let cluster = KindCluster::create(
            settings.kind(runner.clone()),
            podman.clone(),
            &kind_spec.cluster_name,
            &config,
            cluster_options,
        )
        .await?;
        let kubectl = settings.kubectl(runner, Some(cluster.kubeconfig().to_path_buf()));

        let env = Self {
            stack: stack.clone(),
            kind_spec,
            ports,
            cluster,
            podman,
            kubectl,
            poll: Poll::from_settings(settings)?,
            diagnostics_dir: options.diagnostics_dir,
        };
        if let Err(e) = env.provision().await {
            env.gather_diagnostics().await;
            return Err(e);
        }
        info!(
            "End-to-end environment for '{}' is ready in namespace '{}'",
            env.stack.suite,
            env.namespace()
        );
        Ok(env)
    }

    /// Binds to an environment created earlier, e.g. by `testenv e2e setup` in another process.
    pub async fn attach(
        runner: Arc<dyn CommandRunner>,
        settings: &Settings,
        stack: &StackSpec,
        options: E2eOptions,
    ) -> Result<Self> {
        stack.validate()?;
        let kind_spec = stack.kind_or_default();
        let podman = settings.podman(runner.clone());
        let mut cluster_options = options.cluster;
        cluster_options.keep |= settings.keep_cluster;
        let cluster = KindCluster::attach(
            settings.kind(runner.clone()),
            podman.clone(),
            &kind_spec.cluster_name,
            cluster_options,
        )
        .await?;
        let kubectl = settings.kubectl(runner, Some(cluster.kubeconfig().to_path_buf()));
        Ok(Self {
            stack: stack.clone(),
            ports: stack.resolved_ports()?,
            kind_spec,
            cluster,
            podman,
            kubectl,
            poll: Poll::from_settings(settings)?,
            diagnostics_dir: options.diagnostics_dir,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.kind_spec.namespace
    }

    pub fn kubeconfig(&self) -> &Path {
        self.cluster.kubeconfig()
    }

    pub fn kubectl(&self) -> &Kubectl {
        &self.kubectl
    }

    pub fn cluster(&self) -> &KindCluster {
        &self.cluster
    }

    /// DataStorage as reached from the host through the kind port mapping.
    pub fn datastorage_url(&self) -> Option<String> {
        self.stack
            .datastorage
            .as_ref()
            .map(|_| format!("http://localhost:{}", self.ports.datastorage))
    }

    /// The kind node container, where `hostPath` volumes live.
    fn node_name(&self) -> String {
        format!("{}-control-plane", self.cluster.name())
    }

    async fn provision(&self) -> Result<()> {
        self.load_images().await?;
        let ns = self.namespace();
        let suite = &self.stack.suite;
        self.kubectl
            .apply_manifest(&render_documents(&[namespace(ns, suite)])?)
            .await?;

        let postgres = self
            .stack
            .postgres
            .as_ref()
            .map(|spec| postgres_manifests(ns, suite, spec));
        let redis = self
            .stack
            .redis
            .as_ref()
            .map(|spec| redis_manifests(ns, suite, spec));
        if let Some(postgres) = &postgres {
            self.apply(postgres).await?;
        }
        if let Some(redis) = &redis {
            self.apply(redis).await?;
        }
        let wait_postgres = async {
            match &postgres {
                Some(postgres) => self.wait_for(postgres.app()).await,
                None => Ok(()),
            }
        };
        let wait_redis = async {
            match &redis {
                Some(redis) => self.wait_for(redis.app()).await,
                None => Ok(()),
            }
        };
        tokio::try_join!(wait_postgres, wait_redis)?;

        let applied = self.migrate().await?;
        info!("Applied {} migration(s)", applied);

        if let Some(spec) = &self.stack.datastorage {
            let postgres_spec = self.stack.postgres.as_ref().context(
                error::MissingDependencySnafu {
                    service: "datastorage",
                    needs: "postgres",
                },
            )?;
            self.stack
                .redis
                .as_ref()
                .context(error::MissingDependencySnafu {
                    service: "datastorage",
                    needs: "redis",
                })?;
            let placement = Placement::Cluster {
                namespace: ns.to_string(),
            };
            let rendered =
                DataStorageConfig::new(spec, postgres_spec, &placement).render(postgres_spec)?;
            let manifests = datastorage_manifests(ns, suite, spec, &rendered);
            self.apply(&manifests).await?;
            self.wait_for(manifests.app()).await?;
        }

        let workloads: Vec<_> = self
            .stack
            .workloads
            .iter()
            .map(|spec| workload_manifests(ns, suite, spec))
            .collect();
        for workload in &workloads {
            self.apply(workload).await?;
        }
        for workload in &workloads {
            self.kubectl
                .wait_for_rollout(ns, workload.app(), &self.poll)
                .await?;
        }
        Ok(())
    }

    /// Makes every image the stack runs available inside the cluster.
    async fn load_images(&self) -> Result<()> {
        let mut images: Vec<(&str, Option<&ImageBuild>)> = Vec::new();
        if let Some(postgres) = &self.stack.postgres {
            images.push((postgres.image.as_str(), None));
        }
        if let Some(redis) = &self.stack.redis {
            images.push((redis.image.as_str(), None));
        }
        if let Some(datastorage) = &self.stack.datastorage {
            images.push((datastorage.image.as_str(), datastorage.build.as_ref()));
        }
        for workload in &self.stack.workloads {
            images.push((workload.image.as_str(), workload.build.as_ref()));
        }
        for (image, build) in images {
            prepare_image(&self.podman, image, build).await?;
            self.cluster.load_image(image).await?;
        }
        Ok(())
    }

    async fn apply(&self, manifests: &dyn Manifests) -> Result<()> {
        info!("Deploying '{}'", manifests.app());
        self.kubectl
            .apply_manifest(&manifests.manifest_set()?.render()?)
            .await
    }

    async fn wait_for(&self, app: &str) -> Result<()> {
        self.kubectl
            .wait_for_pods_ready(self.namespace(), &app_selector(app), &self.poll)
            .await
    }

    /// Applies the stack's migrations inside the running PostgreSQL pod.
    pub async fn migrate(&self) -> Result<usize> {
        let postgres = match &self.stack.postgres {
            Some(postgres) => postgres,
            None => return Ok(0),
        };
        let dir = match &postgres.migrations_dir {
            Some(dir) => dir,
            None => return Ok(0),
        };
        let migrations = load_migrations(dir)?;
        let pod = self
            .kubectl
            .ready_pod(self.namespace(), &app_selector(POSTGRES_NAME))
            .await?;
        let target = SqlTarget::Pod {
            kubectl: self.kubectl.clone(),
            namespace: self.namespace().to_string(),
            pod,
        };
        apply_migrations(&target, &postgres.user, &postgres.database, &migrations).await
    }

    /// Stops every coverage-enabled workload and copies what they wrote into `out_dir`.
    pub async fn collect_coverage(&self, out_dir: &Path) -> Result<CoverageReport> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .context(error::IoSnafu {
                action: format!("create '{}'", out_dir.display()),
            })?;
        for workload in self.stack.workloads.iter().filter(|w| w.coverage) {
            flush_by_scale_down(&self.kubectl, self.namespace(), &workload.name, &self.poll)
                .await?;
        }
        let report = match &self.kind_spec.coverage_host_dir {
            Some(host_dir) => collect_host_dir(host_dir, out_dir)?,
            None => {
                extract_from_node(&self.podman, &self.node_name(), COVERAGE_MOUNT_PATH, out_dir)
                    .await?
            }
        };
        report.write_manifest(out_dir).await?;
        Ok(report)
    }

    /// Writes diagnostics to the configured directory, if any. Failures are only logged.
    pub async fn gather_diagnostics(&self) {
        if let Some(dir) = &self.diagnostics_dir {
            if let Err(e) = must_gather(&self.kubectl, self.namespace(), dir).await {
                warn!("Unable to gather diagnostics: {}", e);
            }
        }
    }

    /// Optionally collects coverage, then deletes the namespace and the cluster (unless the
    /// cluster is kept). Every step runs; the first failure is returned.
    pub async fn teardown(mut self, coverage_to: Option<&Path>) -> Result<Option<CoverageReport>> {
        let mut first = None;
        let report = match coverage_to {
            Some(dir) => match self.collect_coverage(dir).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Unable to collect coverage: {}", e);
                    self.gather_diagnostics().await;
                    first = Some(e);
                    None
                }
            },
            None => None,
        };
        if let Err(e) = self.kubectl.delete_namespace(self.namespace()).await {
            warn!("Unable to delete namespace '{}': {}", self.namespace(), e);
            first.get_or_insert(e);
        }
        if !self.cluster.keep() {
            if let Err(e) = self.cluster.delete().await {
                warn!("Unable to delete cluster '{}': {}", self.cluster.name(), e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
