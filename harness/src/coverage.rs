/*!

Coverage artifacts written by instrumented binaries (`GOCOVERDIR`). A binary only writes its
counters on a clean exit, so a workload is first scaled to zero and the files are then copied out,
either from the host directory mounted into the kind node or by streaming a tar from the node
container.

!*/

use crate::error::{self, Result};
use crate::kubectl::Kubectl;
use crate::podman::Podman;
use crate::wait::Poll;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use serde::Serialize;
use snafu::ResultExt;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType};
use testenv_model::constants::{COVERAGE_MANIFEST_FILE, LABEL_APP};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageFile {
    /// Path relative to the output directory.
    pub path: String,
    pub bytes: u64,
}

/// What was copied and where from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub source: String,
    pub files: Vec<CoverageFile>,
    pub total_bytes: u64,
}

impl CoverageReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Adds the files of another extraction, e.g. from a second pod.
    pub fn merge(&mut self, other: CoverageReport) {
        if self.source.is_empty() {
            self.source = other.source;
        } else if !other.source.is_empty() {
            self.source = format!("{}, {}", self.source, other.source);
        }
        self.total_bytes += other.total_bytes;
        self.files.extend(other.files);
    }

    /// Writes the report as `coverage-manifest.json` in `dir`.
    pub async fn write_manifest(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(COVERAGE_MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self).context(error::JsonSerializeSnafu {
            what: "coverage report",
        })?;
        tokio::fs::write(&path, json).await.context(error::IoSnafu {
            action: format!("write '{}'", path.display()),
        })?;
        Ok(path)
    }
}

/// Scales `deployment` to zero and waits for its pods to exit so that coverage is flushed.
pub async fn flush_by_scale_down(
    kubectl: &Kubectl,
    namespace: &str,
    deployment: &str,
    poll: &Poll,
) -> Result<()> {
    kubectl.scale(namespace, deployment, 0).await?;
    kubectl
        .wait_for_pods_gone(namespace, &format!("{}={}", LABEL_APP, deployment), poll)
        .await?;
    info!("'{}' stopped, coverage flushed", deployment);
    Ok(())
}

fn tar_command(remote_dir: &str) -> [&str; 5] {
    ["tar", "-cf", "-", "-C", remote_dir]
}

/// Streams `remote_dir` out of a running pod into `local_dir/<pod>`.
pub async fn extract_from_pod(
    kubectl: &Kubectl,
    namespace: &str,
    pod: &str,
    container: Option<&str>,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<CoverageReport> {
    let mut cmd = tar_command(remote_dir).to_vec();
    cmd.push(".");
    let bytes = kubectl.exec_bytes(namespace, pod, container, &cmd).await?;
    unpack(
        &bytes,
        local_dir,
        Path::new(pod),
        format!("pod {}/{}:{}", namespace, pod, remote_dir),
    )
}

/// Streams `remote_dir` out of a kind node container, where `hostPath` volumes live.
pub async fn extract_from_node(
    podman: &Podman,
    node: &str,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<CoverageReport> {
    let mut cmd = tar_command(remote_dir).to_vec();
    cmd.push(".");
    let bytes = podman.exec_bytes(node, &cmd).await?;
    unpack(
        &bytes,
        local_dir,
        Path::new(""),
        format!("node {}:{}", node, remote_dir),
    )
}

/// Copies the files the kind node wrote into a mounted host directory.
pub fn collect_host_dir(host_dir: &Path, local_dir: &Path) -> Result<CoverageReport> {
    let mut builder = Builder::new(Vec::new());
    builder
        .append_dir_all(".", host_dir)
        .context(error::ArchiveSnafu { action: "create" })?;
    let bytes = builder
        .into_inner()
        .context(error::ArchiveSnafu { action: "create" })?;
    unpack(
        &bytes,
        local_dir,
        Path::new(""),
        format!("host {}", host_dir.display()),
    )
}

/// Unpacks regular files from a tar stream into `local_dir/prefix`.
fn unpack(bytes: &[u8], local_dir: &Path, prefix: &Path, source: String) -> Result<CoverageReport> {
    let dest = local_dir.join(prefix);
    std::fs::create_dir_all(&dest).context(error::IoSnafu {
        action: format!("create '{}'", dest.display()),
    })?;
    let mut archive = Archive::new(Cursor::new(bytes));
    let mut report = CoverageReport {
        source,
        ..Default::default()
    };
    let entries = archive
        .entries()
        .context(error::ArchiveSnafu { action: "read" })?;
    for entry in entries {
        let mut entry = entry.context(error::ArchiveSnafu { action: "read" })?;
        let entry_type = entry.header().entry_type();
        if entry_type != EntryType::Regular && entry_type != EntryType::Directory {
            continue;
        }
        let relative = entry
            .path()
            .context(error::ArchiveSnafu { action: "read" })?
            .components()
            .filter(|c| !matches!(c, std::path::Component::CurDir))
            .collect::<PathBuf>();
        // `unpack_in` refuses entries that would land outside `dest`.
        let unpacked = entry
            .unpack_in(&dest)
            .context(error::ArchiveSnafu { action: "unpack" })?;
        if unpacked && entry_type == EntryType::Regular {
            let bytes = entry.header().size().unwrap_or(0);
            report.total_bytes += bytes;
            report.files.push(CoverageFile {
                path: prefix.join(relative).to_string_lossy().to_string(),
                bytes,
            });
        }
    }
    report.files.sort_by(|a, b| a.path.cmp(&b.path));
    if report.is_empty() {
        warn!("No coverage files found in {}", report.source);
    } else {
        info!(
            "Copied {} coverage file(s), {} bytes, from {}",
            report.files.len(),
            report.total_bytes,
            report.source
        );
    }
    Ok(report)
}

/// Packs `dir` into a gzipped tarball at `archive`.
pub fn bundle(dir: &Path, archive: &Path) -> Result<()> {
    let file = File::create(archive).context(error::IoSnafu {
        action: format!("create '{}'", archive.display()),
    })?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all("coverage", dir)
        .context(error::ArchiveSnafu { action: "create" })?;
    builder
        .into_inner()
        .context(error::ArchiveSnafu { action: "create" })?
        .finish()
        .context(error::ArchiveSnafu { action: "compress" })?;
    Ok(())
}

/// Unpacks a bundle written by [`bundle`].
pub fn unbundle(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).context(error::IoSnafu {
        action: format!("open '{}'", archive.display()),
    })?;
    Archive::new(GzDecoder::new(file))
        .unpack(dest)
        .context(error::ArchiveSnafu { action: "unpack" })
}
