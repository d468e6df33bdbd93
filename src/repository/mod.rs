//! Management of the tooldeck APT sources file.
//!
//! Every change goes through the same sequence: the signing key is imported
//! first, the current file is copied into the backup directory, the new
//! content is written next to the live file and then renamed over it. A
//! failure at any step leaves the live file as it was.

mod backup;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{debug, info, warn};
use thiserror::Error;

use crate::history::{HistoryRecord, InstallHistory, Operation};
use crate::keystore::{KeyError, KeyStore};
use crate::runtime::{CommandRunner, Runtime};
use crate::source::{
    KeySource, RepositoryDescriptor, SourceEntry, SourceParseError, parse_sources,
    serialize_sources,
};

pub use backup::BackupRetention;

pub const DEFAULT_SOURCES_FILE: &str = "/etc/apt/sources.list.d/tooldeck.sources";

/// Default timeout for package manager commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

/// Upper bound on the stderr carried by [`RepoError::IndexRefreshFailed`].
pub const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository {0:?} is already configured")]
    AlreadyConfigured(String),
    #[error("repository {0:?} is not configured")]
    NotFound(String),
    #[error("signing key rejected: {0}")]
    KeyImportFailed(#[source] KeyError),
    #[error("package index refresh failed (exit status {status:?}): {stderr_tail}")]
    IndexRefreshFailed {
        status: Option<i32>,
        stderr_tail: String,
    },
    #[error("invalid repository descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: SourceParseError,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// The repository enabled when nothing else is requested.
pub fn default_repository() -> RepositoryDescriptor {
    RepositoryDescriptor::new(
        "kali",
        "http://http.kali.org/kali",
        "kali-rolling",
        &["main", "contrib", "non-free"],
    )
    .with_key(KeySource::Url {
        url: "https://archive.kali.org/archive-key.asc".to_string(),
        fingerprint: Some("827C8569F2518CC677FECA1AED65462EC8D5E4C5".to_string()),
    })
}

fn same_url(a: &str, b: &str) -> bool {
    a.trim_end_matches('/')
        .eq_ignore_ascii_case(b.trim_end_matches('/'))
}

pub struct RepositoryManager<'a, R: Runtime> {
    runtime: &'a R,
    runner: &'a dyn CommandRunner,
    keys: KeyStore<'a, R>,
    history: Option<&'a InstallHistory<'a, R>>,
    sources_file: PathBuf,
    backup_dir: PathBuf,
    retention: BackupRetention,
    command_timeout: Duration,
}

impl<'a, R: Runtime> RepositoryManager<'a, R> {
    pub fn new(
        runtime: &'a R,
        runner: &'a dyn CommandRunner,
        keys: KeyStore<'a, R>,
        sources_file: PathBuf,
        backup_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            runner,
            keys,
            history: None,
            sources_file,
            backup_dir,
            retention: BackupRetention::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_history(mut self, history: &'a InstallHistory<'a, R>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn retention(mut self, retention: BackupRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn sources_file(&self) -> &Path {
        &self.sources_file
    }

    /// Configured repositories, read from the live file.
    pub fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, RepoError> {
        Ok(self
            .list_entries()?
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect())
    }

    pub fn list_entries(&self) -> Result<Vec<SourceEntry>, RepoError> {
        if !self.runtime.exists(&self.sources_file) {
            return Ok(Vec::new());
        }
        let content = self
            .runtime
            .read_to_string(&self.sources_file)
            .with_context(|| format!("Failed to read {}", self.sources_file.display()))?;
        parse_sources(&content).map_err(|source| RepoError::Parse {
            path: self.sources_file.clone(),
            source,
        })
    }

    #[tracing::instrument(skip(self, desc), fields(repo = %desc.name))]
    pub async fn add_repository(
        &mut self,
        desc: &RepositoryDescriptor,
    ) -> Result<SourceEntry, RepoError> {
        let result = self.try_add(desc).await;
        self.record(Operation::AddRepo, &desc.name, result.as_ref().err());
        result
    }

    async fn try_add(&mut self, desc: &RepositoryDescriptor) -> Result<SourceEntry, RepoError> {
        desc.validate().map_err(RepoError::InvalidDescriptor)?;
        let desc = &RepositoryDescriptor {
            key_source: desc.key_source.normalized(),
            ..desc.clone()
        };

        let mut entries = self.list_entries()?;
        if entries
            .iter()
            .any(|e| e.name() == desc.name || same_url(&e.descriptor.url, &desc.url))
        {
            return Err(RepoError::AlreadyConfigured(desc.name.clone()));
        }

        let key = self
            .keys
            .import_key(desc)
            .await
            .map_err(RepoError::KeyImportFailed)?;
        let imported = key.is_some();

        let entry = SourceEntry::new(desc.clone()).signed_by(key.map(|k| k.path));
        entries.push(entry.clone());

        if let Err(e) = self.commit(&entries) {
            if imported && let Err(release) = self.keys.release_key(&desc.name) {
                warn!("Failed to release key for {}: {}", desc.name, release);
            }
            return Err(e);
        }

        info!("Added repository {} ({})", desc.name, desc.url);
        Ok(entry)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_repository(&mut self, name: &str) -> Result<(), RepoError> {
        let result = self.try_remove(name);
        self.record(Operation::RemoveRepo, name, result.as_ref().err());
        result
    }

    fn try_remove(&mut self, name: &str) -> Result<(), RepoError> {
        let mut entries = self.list_entries()?;
        let index = entries
            .iter()
            .position(|e| e.name() == name)
            .ok_or_else(|| RepoError::NotFound(name.to_string()))?;
        entries.remove(index);

        self.commit(&entries)?;
        // The stanza is already gone from the live file
        if let Err(e) = self.keys.release_key(name) {
            warn!("Failed to release signing key of {}: {}", name, e);
        }

        info!("Removed repository {}", name);
        Ok(())
    }

    /// Runs `apt-get update`.
    #[tracing::instrument(skip(self))]
    pub async fn update_index(&self) -> Result<(), RepoError> {
        info!("Refreshing package index...");
        let args = vec!["update".to_string()];
        let output = self
            .runner
            .run("apt-get", &args, self.command_timeout)
            .await
            .map_err(|e| RepoError::IndexRefreshFailed {
                status: None,
                stderr_tail: format!("{:#}", e),
            })?;

        if !output.success() {
            return Err(RepoError::IndexRefreshFailed {
                status: output.status,
                stderr_tail: output.stderr_tail(STDERR_TAIL_BYTES),
            });
        }
        Ok(())
    }

    fn commit(&self, entries: &[SourceEntry]) -> Result<(), RepoError> {
        let dir = self
            .sources_file
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", self.sources_file.display()))?;
        let file_name = self
            .sources_file
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", self.sources_file.display()))?;
        self.runtime.create_dir_all(dir)?;

        let newest = backup::create(self.runtime, &self.sources_file, &self.backup_dir)?;

        let tmp = dir.join(format!(".{}.tmp", file_name.to_string_lossy()));
        let content = serialize_sources(entries);
        self.runtime
            .write(&tmp, content.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        self.runtime.set_permissions(&tmp, 0o644)?;

        if let Err(e) = self.runtime.rename(&tmp, &self.sources_file) {
            if let Err(cleanup) = self.runtime.remove_file(&tmp) {
                debug!("Failed to remove {}: {}", tmp.display(), cleanup);
            }
            return Err(e
                .context(format!("Failed to replace {}", self.sources_file.display()))
                .into());
        }

        backup::prune(
            self.runtime,
            &self.sources_file,
            &self.backup_dir,
            newest.as_deref(),
            self.retention,
        );
        Ok(())
    }

    fn record(&self, operation: Operation, name: &str, error: Option<&RepoError>) {
        let Some(history) = self.history else {
            return;
        };
        let record = HistoryRecord::new(operation, vec![name.to_string()])
            .error(error.map(|e| e.to_string()));
        if let Err(e) = history.append(&record) {
            warn!("Failed to record {} in history: {:#}", operation, e);
        }
    }
}
