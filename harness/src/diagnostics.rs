use crate::error::{self, Result};
use crate::kubectl::Kubectl;
use log::{info, warn};
use snafu::ResultExt;
use std::path::Path;

/// Dumps pod logs, `describe pods` and events of `namespace` into `out_dir`. Every step is best
/// effort; only failing to create `out_dir` is an error. Returns how many files were written.
pub async fn must_gather(kubectl: &Kubectl, namespace: &str, out_dir: &Path) -> Result<usize> {
    info!(
        "Gathering diagnostics for '{}' into '{}'",
        namespace,
        out_dir.display()
    );
    tokio::fs::create_dir_all(out_dir)
        .await
        .context(error::IoSnafu {
            action: format!("create '{}'", out_dir.display()),
        })?;

    let mut written = 0;
    match kubectl.pod_names(namespace, None).await {
        Ok(pods) => {
            for pod in pods {
                let logs = kubectl.logs(namespace, &pod, None).await;
                written += save(out_dir, &format!("{}.log", pod), logs).await;
            }
        }
        Err(e) => warn!("Unable to list pods in '{}': {}", namespace, e),
    }
    written += save(
        out_dir,
        "describe-pods.txt",
        kubectl.describe(namespace, "pods").await,
    )
    .await;
    written += save(out_dir, "events.txt", kubectl.events(namespace).await).await;
    Ok(written)
}

async fn save(out_dir: &Path, file_name: &str, contents: Result<String>) -> usize {
    let contents = match contents {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Unable to gather '{}': {}", file_name, e);
            return 0;
        }
    };
    let path = out_dir.join(file_name);
    match tokio::fs::write(&path, contents).await {
        Ok(()) => 1,
        Err(e) => {
            warn!("Unable to write '{}': {}", path.display(), e);
            0
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fake::FakeRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    const PODS: &str = r#"{"items": [
        {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "postgresql-0"}},
        {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "redis-0"}}
    ]}"#;

    #[tokio::test]
    async fn writes_what_it_can() {
        let runner = Arc::new(
            FakeRunner::new()
                .ok("kubectl get pods", PODS)
                .ok("kubectl logs -n e2e postgresql-0", "ready to accept connections")
                .fail("kubectl logs -n e2e redis-0", 1, "container not started")
                .ok("kubectl describe pods", "Name: postgresql-0")
                .ok("kubectl get events", "LAST SEEN"),
        );
        let kubectl = Kubectl::new(runner.clone(), "kubectl", None);
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("must-gather");
        let written = must_gather(&kubectl, "e2e", &out).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            std::fs::read_to_string(out.join("postgresql-0.log")).unwrap(),
            "ready to accept connections"
        );
        assert!(!out.join("redis-0.log").exists());
        assert!(out.join("describe-pods.txt").is_file());
        assert!(out.join("events.txt").is_file());
    }

    #[tokio::test]
    async fn unreachable_cluster_still_succeeds() {
        let runner = Arc::new(FakeRunner::new().fail("kubectl", 1, "connection refused"));
        let kubectl = Kubectl::new(runner.clone(), "kubectl", None);
        let dir = TempDir::new().unwrap();
        assert_eq!(must_gather(&kubectl, "e2e", dir.path()).await.unwrap(), 0);
    }
}
