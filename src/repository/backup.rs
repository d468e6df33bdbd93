//! Timestamped copies of the sources file taken before every rewrite.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::runtime::Runtime;

/// How long backups of the sources file are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupRetention {
    /// Keep older backups at all. When false only the newest one survives.
    pub keep: bool,
    /// Delete backups older than this many days. `None` keeps them forever.
    pub max_age_days: Option<u64>,
}

impl Default for BackupRetention {
    fn default() -> Self {
        Self {
            keep: true,
            max_age_days: None,
        }
    }
}

pub(super) fn backup_name(live: &Path) -> String {
    let file_name = file_name(live);
    format!(
        "{}.{}.bak",
        file_name,
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
    )
}

fn file_name(live: &Path) -> String {
    live.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sources".to_string())
}

/// Copies `live` into `backup_dir`. Returns `None` when there is nothing to back up.
pub(super) fn create<R: Runtime>(
    runtime: &R,
    live: &Path,
    backup_dir: &Path,
) -> Result<Option<PathBuf>> {
    if !runtime.exists(live) {
        return Ok(None);
    }
    runtime
        .create_dir_all(backup_dir)
        .context("Failed to create backup directory")?;
    let backup = backup_dir.join(backup_name(live));
    runtime
        .copy(live, &backup)
        .with_context(|| format!("Failed to back up {}", live.display()))?;
    debug!("Backed up {} to {}", live.display(), backup.display());
    Ok(Some(backup))
}

/// Applies `retention` to the backups of `live`, never touching `newest`.
/// Failures are logged; the rewrite they follow already succeeded.
pub(super) fn prune<R: Runtime>(
    runtime: &R,
    live: &Path,
    backup_dir: &Path,
    newest: Option<&Path>,
    retention: BackupRetention,
) -> Vec<PathBuf> {
    if retention.keep && retention.max_age_days.is_none() {
        return Vec::new();
    }
    if !runtime.is_dir(backup_dir) {
        return Vec::new();
    }

    let prefix = format!("{}.", file_name(live));
    let candidates = match runtime.read_dir(backup_dir) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Failed to list backups in {}: {}", backup_dir.display(), e);
            return Vec::new();
        }
    };
    let max_age = retention
        .max_age_days
        .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60)));
    let now = SystemTime::now();

    let mut pruned = Vec::new();
    for path in candidates {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.starts_with(&prefix) || !name.ends_with(".bak") {
            continue;
        }
        if Some(path.as_path()) == newest {
            continue;
        }

        let expired = !retention.keep
            || match (max_age, runtime.modified(&path)) {
                (Some(max_age), Ok(modified)) => now
                    .duration_since(modified)
                    .is_ok_and(|age| age > max_age),
                _ => false,
            };
        if !expired {
            continue;
        }

        match runtime.remove_file(&path) {
            Ok(()) => {
                debug!("Pruned backup {}", path.display());
                pruned.push(path);
            }
            Err(e) => warn!("Failed to prune backup {}: {}", path.display(), e),
        }
    }
    pruned
}
