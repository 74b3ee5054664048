/*!

Schema migrations for the PostgreSQL dependency. Migration files follow goose conventions: a
numeric version prefix (`001_create_tables.sql`) and optional `-- +goose Up` / `-- +goose Down`
sections. Only the Up section is applied.

!*/

use crate::error::{self, Result};
use crate::kubectl::Kubectl;
use crate::podman::Podman;
use log::{debug, info};
use snafu::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};

const UP_MARKER: &str = "-- +goose Up";
const DOWN_MARKER: &str = "-- +goose Down";
const STATEMENT_MARKER: &str = "-- +goose Statement";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub path: PathBuf,
    /// The SQL to apply.
    pub up_sql: String,
}

/// Reads every `*.sql` file in `dir`, ordered by version and then file name.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>> {
    let entries = std::fs::read_dir(dir).context(error::IoSnafu {
        action: format!("read migrations dir '{}'", dir.display()),
    })?;
    let mut migrations = Vec::new();
    for entry in entries {
        let path = entry
            .context(error::IoSnafu {
                action: format!("read migrations dir '{}'", dir.display()),
            })?
            .path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context(error::NonUtf8PathSnafu { path: &path })?
            .to_string();
        let version = version_of(&name).context(error::MigrationNameSnafu { path: &path })?;
        let sql = std::fs::read_to_string(&path).context(error::IoSnafu {
            action: format!("read migration '{}'", path.display()),
        })?;
        migrations.push(Migration {
            version,
            name,
            path,
            up_sql: up_section(&sql),
        });
    }
    migrations.sort_by(|a, b| (a.version, &a.name).cmp(&(b.version, &b.name)));
    for pair in migrations.windows(2) {
        if pair[0].version == pair[1].version {
            return error::DuplicateMigrationSnafu {
                version: pair[0].version,
                first: &pair[0].path,
                second: &pair[1].path,
            }
            .fail();
        }
    }
    Ok(migrations)
}

fn version_of(file_name: &str) -> Option<u64> {
    let digits: String = file_name.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// The text between the Up and Down markers without statement markers, or the whole file when
/// it has no Up marker.
pub fn up_section(sql: &str) -> String {
    let has_up = sql.lines().any(|line| line.trim() == UP_MARKER);
    let mut in_up = !has_up;
    let mut out = String::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed == UP_MARKER {
            in_up = true;
            continue;
        }
        if trimmed == DOWN_MARKER {
            if has_up {
                break;
            }
            in_up = false;
            continue;
        }
        if trimmed.starts_with(STATEMENT_MARKER) {
            continue;
        }
        if in_up {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Where `psql` runs.
#[derive(Clone)]
pub enum SqlTarget {
    /// `podman exec` into a PostgreSQL container.
    Container { podman: Podman, container: String },
    /// `kubectl exec` into a PostgreSQL pod.
    Pod {
        kubectl: Kubectl,
        namespace: String,
        pod: String,
    },
}

impl SqlTarget {
    fn describe(&self) -> String {
        match self {
            SqlTarget::Container { container, .. } => format!("container '{}'", container),
            SqlTarget::Pod { namespace, pod, .. } => format!("pod '{}/{}'", namespace, pod),
        }
    }

    /// Runs `psql` in the target, feeding `sql` through stdin.
    pub async fn psql(&self, user: &str, database: &str, sql: &str) -> Result<String> {
        let cmd = ["psql", "-U", user, "-d", database, "-v", "ON_ERROR_STOP=1", "-q"];
        match self {
            SqlTarget::Container { podman, container } => {
                podman.exec(container, &cmd, Some(sql.as_bytes())).await
            }
            SqlTarget::Pod {
                kubectl,
                namespace,
                pod,
            } => {
                kubectl
                    .exec(namespace, pod, None, &cmd, Some(sql.as_bytes()))
                    .await
            }
        }
    }
}

/// Applies `migrations` in order, stopping at the first failure. Returns how many were applied.
pub async fn apply_migrations(
    target: &SqlTarget,
    user: &str,
    database: &str,
    migrations: &[Migration],
) -> Result<usize> {
    info!(
        "Applying {} migration(s) to {}",
        migrations.len(),
        target.describe()
    );
    let mut applied = 0;
    for migration in migrations {
        if migration.up_sql.trim().is_empty() {
            debug!("Skipping '{}', it has no Up statements", migration.name);
            continue;
        }
        debug!("Applying '{}'", migration.name);
        target
            .psql(user, database, &migration.up_sql)
            .await
            .context(error::ApplyMigrationSnafu {
                name: &migration.name,
            })?;
        applied += 1;
    }
    Ok(applied)
}
