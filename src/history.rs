//! Append-only operation log, one JSON object per line.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::engine::InstallResult;
use crate::runtime::Runtime;

pub const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Update,
    Remove,
    AddRepo,
    RemoveRepo,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::Remove => "remove",
            Operation::AddRepo => "add_repo",
            Operation::RemoveRepo => "remove_repo",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub targets: Vec<String>,
    #[serde(default)]
    pub results: Vec<InstallResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn new(operation: Operation, targets: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            targets,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn results(mut self, results: Vec<InstallResult>) -> Self {
        self.results = results;
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

pub struct InstallHistory<'a, R: Runtime> {
    runtime: &'a R,
    path: PathBuf,
    // Serializes appends from concurrent callers.
    lock: Mutex<()>,
}

impl<'a, R: Runtime> InstallHistory<'a, R> {
    pub fn new(runtime: &'a R, state_dir: &Path) -> Self {
        Self {
            runtime,
            path: state_dir.join(HISTORY_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[tracing::instrument(skip(self, record), fields(operation = %record.operation))]
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to serialize history record")?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        self.runtime
            .append(&self.path, line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        debug!("Recorded {} of {:?}", record.operation, record.targets);
        Ok(())
    }

    /// All readable records, oldest first. Lines that fail to parse are skipped.
    pub fn records(&self) -> Result<Vec<HistoryRecord>> {
        if !self.runtime.exists(&self.path) {
            return Ok(Vec::new());
        }
        let content = self.runtime.read_to_string(&self.path)?;
        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed history line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let mut records = self.records()?;
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}
