use crate::error::{self, Result};
use crate::process::{path_arg, run_checked, run_checked_bytes, CommandRunner, Invocation};
use crate::wait::Poll;
use k8s_openapi::api::core::v1::Pod;
use log::{debug, info};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The subset of `kubectl get pods -o json` output the harness reads.
#[derive(Debug, Default, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

/// Drives `kubectl` against one cluster.
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    program: String,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new<S: Into<String>>(
        runner: Arc<dyn CommandRunner>,
        program: S,
        kubeconfig: Option<PathBuf>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            kubeconfig,
        }
    }

    fn command(&self) -> Result<Invocation> {
        let invocation = Invocation::new(&self.program);
        Ok(match &self.kubeconfig {
            Some(path) => invocation.arg("--kubeconfig").arg(path_arg(path)?),
            None => invocation,
        })
    }

    async fn checked(&self, invocation: Invocation) -> Result<String> {
        run_checked(self.runner.as_ref(), &invocation).await
    }

    /// Applies multi-document YAML through stdin.
    pub async fn apply_manifest(&self, yaml: &str) -> Result<()> {
        debug!("Applying:\n{}", yaml);
        let stdout = self
            .checked(self.command()?.args(["apply", "-f", "-"]).stdin(yaml))
            .await?;
        debug!("{}", stdout.trim_end());
        Ok(())
    }

    pub async fn apply_path(&self, path: &Path) -> Result<()> {
        self.checked(self.command()?.args(["apply", "-f"]).arg(path_arg(path)?))
            .await
            .map(|_| ())
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let output = self
            .runner
            .run(
                &self
                    .command()?
                    .args(["get", "namespace", namespace, "-o", "name"]),
            )
            .await?;
        Ok(output.success())
    }

    /// Creates the namespace unless it exists.
    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespace_exists(namespace).await? {
            return Ok(());
        }
        info!("Creating namespace '{}'", namespace);
        self.checked(self.command()?.args(["create", "namespace", namespace]))
            .await
            .map(|_| ())
    }

    /// Starts deleting the namespace without waiting for its contents to go away.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        info!("Deleting namespace '{}'", namespace);
        self.checked(self.command()?.args([
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found",
            "--wait=false",
        ]))
        .await
        .map(|_| ())
    }

    pub async fn get_pods(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<Pod>> {
        let mut invocation = self.command()?.args(["get", "pods", "-n", namespace]);
        if let Some(selector) = selector {
            invocation = invocation.args(["-l", selector]);
        }
        let stdout = self.checked(invocation.args(["-o", "json"])).await?;
        let list: PodList = serde_json::from_str(&stdout).context(error::JsonParseSnafu {
            what: "kubectl pod list",
        })?;
        Ok(list.items)
    }

    /// Names of the pods matching `selector`.
    pub async fn pod_names(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .get_pods(namespace, selector)
            .await?
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    /// The first ready pod matching `selector`.
    pub async fn ready_pod(&self, namespace: &str, selector: &str) -> Result<String> {
        let pods = self.get_pods(namespace, Some(selector)).await?;
        pods.iter()
            .filter(|pod| pod_ready(pod))
            .find_map(|pod| pod.metadata.name.clone())
            .context(error::NoPodSnafu { namespace, selector })
    }

    /// Waits until at least one pod matches and every matching pod is ready.
    pub async fn wait_for_pods_ready(
        &self,
        namespace: &str,
        selector: &str,
        poll: &Poll,
    ) -> Result<()> {
        info!("Waiting for pods '{}' in '{}'", selector, namespace);
        poll.until(&format!("pods '{}' ready", selector), || async move {
            Ok(pods_ready(&self.get_pods(namespace, Some(selector)).await?))
        })
        .await
    }

    pub async fn wait_for_pods_gone(
        &self,
        namespace: &str,
        selector: &str,
        poll: &Poll,
    ) -> Result<()> {
        poll.until(&format!("pods '{}' gone", selector), || async move {
            Ok(self.get_pods(namespace, Some(selector)).await?.is_empty())
        })
        .await
    }

    /// Blocks on `kubectl rollout status` for at most the poll's budget.
    pub async fn wait_for_rollout(
        &self,
        namespace: &str,
        deployment: &str,
        poll: &Poll,
    ) -> Result<()> {
        self.checked(
            self.command()?
                .args(["rollout", "status"])
                .arg(format!("deployment/{}", deployment))
                .args(["-n", namespace])
                .arg(format!("--timeout={}s", poll.budget().as_secs().max(1))),
        )
        .await
        .map(|_| ())
    }

    pub async fn scale(&self, namespace: &str, deployment: &str, replicas: u32) -> Result<()> {
        info!(
            "Scaling deployment '{}' in '{}' to {}",
            deployment, namespace, replicas
        );
        self.checked(
            self.command()?
                .arg("scale")
                .arg(format!("deployment/{}", deployment))
                .args(["-n", namespace])
                .arg(format!("--replicas={}", replicas)),
        )
        .await
        .map(|_| ())
    }

    fn exec_invocation(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        cmd: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<Invocation> {
        let mut invocation = self.command()?.arg("exec");
        if let Some(data) = stdin {
            invocation = invocation.arg("-i").stdin(data);
        }
        invocation = invocation.args(["-n", namespace, pod]);
        if let Some(container) = container {
            invocation = invocation.args(["-c", container]);
        }
        Ok(invocation.arg("--").args(cmd.iter().copied()))
    }

    pub async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        cmd: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<String> {
        self.checked(self.exec_invocation(namespace, pod, container, cmd, stdin)?)
            .await
    }

    /// Like [`Kubectl::exec`] but returns stdout as raw bytes.
    pub async fn exec_bytes(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        cmd: &[&str],
    ) -> Result<Vec<u8>> {
        run_checked_bytes(
            self.runner.as_ref(),
            &self.exec_invocation(namespace, pod, container, cmd, None)?,
        )
        .await
    }

    /// Logs of every container in the pod.
    pub async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
    ) -> Result<String> {
        let mut invocation = self.command()?.args(["logs", "-n", namespace, pod]);
        invocation = match container {
            Some(container) => invocation.args(["-c", container]),
            None => invocation.arg("--all-containers=true"),
        };
        self.checked(invocation).await
    }

    /// `kubectl describe <kind>` for every object of that kind in the namespace.
    pub async fn describe(&self, namespace: &str, kind: &str) -> Result<String> {
        self.checked(self.command()?.args(["describe", kind, "-n", namespace]))
            .await
    }

    pub async fn events(&self, namespace: &str) -> Result<String> {
        self.checked(self.command()?.args([
            "get",
            "events",
            "-n",
            namespace,
            "--sort-by=.lastTimestamp",
        ]))
        .await
    }
}

/// Whether a single pod is running with every container ready and is not being deleted.
pub fn pod_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let status = match &pod.status {
        Some(status) => status,
        None => return false,
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    match &status.container_statuses {
        Some(containers) if !containers.is_empty() => containers.iter().all(|c| c.ready),
        _ => false,
    }
}

/// At least one pod, and all of them ready.
pub fn pods_ready(pods: &[Pod]) -> bool {
    !pods.is_empty() && pods.iter().all(pod_ready)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::{failed, ok, FakeRunner};
    use std::time::Duration;

    fn pod_json(name: &str, phase: &str, ready: bool) -> String {
        format!(
            r#"{{
  "apiVersion": "v1",
  "kind": "Pod",
  "metadata": {{ "name": "{}", "namespace": "e2e" }},
  "status": {{
    "phase": "{}",
    "containerStatuses": [
      {{ "name": "c", "image": "i", "imageID": "", "ready": {}, "restartCount": 0 }}
    ]
  }}
}}"#,
            name, phase, ready
        )
    }

    fn list_json(pods: &[String]) -> String {
        format!(
            r#"{{ "apiVersion": "v1", "kind": "List", "items": [{}] }}"#,
            pods.join(",")
        )
    }

    fn kubectl(runner: &Arc<FakeRunner>) -> Kubectl {
        Kubectl::new(
            runner.clone(),
            "kubectl",
            Some(PathBuf::from("/tmp/kubeconfig.yaml")),
        )
    }

    #[tokio::test]
    async fn get_pods_parses_list() {
        let runner = Arc::new(FakeRunner::new().ok(
            "kubectl --kubeconfig /tmp/kubeconfig.yaml get pods -n e2e -l app=redis -o json",
            &list_json(&[pod_json("redis-1", "Running", true)]),
        ));
        let pods = kubectl(&runner)
            .get_pods("e2e", Some("app=redis"))
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert!(pods_ready(&pods));
    }

    #[test]
    fn readiness_rules() {
        let parse = |json: String| -> Pod { serde_json::from_str(&json).unwrap() };
        assert!(!pods_ready(&[]));
        assert!(pod_ready(&parse(pod_json("a", "Running", true))));
        assert!(!pod_ready(&parse(pod_json("a", "Running", false))));
        assert!(!pod_ready(&parse(pod_json("a", "Pending", true))));
        let mut terminating = parse(pod_json("a", "Running", true));
        terminating.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Default::default()),
        );
        assert!(!pod_ready(&terminating));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_ready() {
        let runner = Arc::new(FakeRunner::new().respond(
            "kubectl --kubeconfig /tmp/kubeconfig.yaml get pods",
            vec![
                failed(1, "connection refused"),
                ok(&list_json(&[])),
                ok(&list_json(&[pod_json("p", "Pending", false)])),
                ok(&list_json(&[pod_json("p", "Running", true)])),
            ],
        ));
        let poll = Poll::new(10, Duration::from_secs(1)).unwrap();
        kubectl(&runner)
            .wait_for_pods_ready("e2e", "app=postgresql", &poll)
            .await
            .unwrap();
        assert_eq!(runner.calls().len(), 4);
    }

    #[tokio::test]
    async fn exec_places_container_before_command() {
        let runner = Arc::new(FakeRunner::new());
        kubectl(&runner)
            .exec(
                "e2e",
                "postgresql-0",
                Some("postgresql"),
                &["psql", "-U", "slm_user"],
                Some(b"SELECT 1;"),
            )
            .await
            .unwrap();
        assert_eq!(
            runner.lines()[0],
            "kubectl --kubeconfig /tmp/kubeconfig.yaml exec -i -n e2e postgresql-0 \
             -c postgresql -- psql -U slm_user"
        );
    }

    #[tokio::test]
    async fn create_namespace_skips_existing() {
        let runner = Arc::new(FakeRunner::new());
        kubectl(&runner).create_namespace("e2e").await.unwrap();
        assert!(!runner.ran("kubectl --kubeconfig /tmp/kubeconfig.yaml create"));
    }

    #[tokio::test]
    async fn ready_pod_requires_a_match() {
        let runner = Arc::new(FakeRunner::new().ok("kubectl", &list_json(&[])));
        let err = kubectl(&runner)
            .ready_pod("e2e", "app=postgresql")
            .await
            .unwrap_err();
        assert!(matches!(err, error::Error::NoPod { .. }));
    }

    #[tokio::test]
    async fn apply_pipes_yaml() {
        let runner = Arc::new(FakeRunner::new());
        kubectl(&runner)
            .apply_manifest("kind: Namespace\n")
            .await
            .unwrap();
        let call = &runner.calls()[0];
        assert!(call.to_string().ends_with("apply -f -"));
        assert_eq!(call.stdin_data(), Some(&b"kind: Namespace\n"[..]));
    }

    #[tokio::test]
    async fn apply_path_passes_file() {
        let runner = Arc::new(FakeRunner::new());
        kubectl(&runner)
            .apply_path(Path::new("/tmp/manifests/gateway.yaml"))
            .await
            .unwrap();
        assert_eq!(
            runner.lines(),
            vec!["kubectl --kubeconfig /tmp/kubeconfig.yaml apply -f /tmp/manifests/gateway.yaml"]
        );
        assert!(runner.calls()[0].stdin_data().is_none());
    }

    #[tokio::test]
    async fn rollout_timeout_is_the_poll_budget() {
        let runner = Arc::new(FakeRunner::new());
        let poll = Poll::new(31, Duration::from_secs(2)).unwrap();
        kubectl(&runner)
            .wait_for_rollout("e2e", "gateway", &poll)
            .await
            .unwrap();
        assert_eq!(
            runner.lines(),
            vec![
                "kubectl --kubeconfig /tmp/kubeconfig.yaml rollout status deployment/gateway \
                 -n e2e --timeout=60s"
            ]
        );

        // A single attempt has no budget; kubectl still gets a whole second.
        let runner = Arc::new(FakeRunner::new().fail("kubectl", 1, "timed out waiting"));
        let poll = Poll::new(1, Duration::from_secs(2)).unwrap();
        let err = kubectl(&runner)
            .wait_for_rollout("e2e", "gateway", &poll)
            .await
            .unwrap_err();
        assert!(runner.lines()[0].ends_with("--timeout=1s"));
        assert!(matches!(err, error::Error::CommandFailed { code: 1, .. }));
    }
}
