use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to one package in one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Installed,
    AlreadyPresent,
    Failed,
    Removed,
    Updated,
    UpToDate,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        self == Outcome::Failed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Installed => "installed",
            Outcome::AlreadyPresent => "already present",
            Outcome::Failed => "failed",
            Outcome::Removed => "removed",
            Outcome::Updated => "updated",
            Outcome::UpToDate => "up to date",
        };
        f.write_str(s)
    }
}

/// Failure categories carried as the prefix of a failed result's detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ChecksumMismatch,
    PackageManagerInvocationFailed,
    InvalidPackageName,
    NotInstalled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ChecksumMismatch => "ChecksumMismatch",
            FailureKind::PackageManagerInvocationFailed => "PackageManagerInvocationFailed",
            FailureKind::InvalidPackageName => "InvalidPackageName",
            FailureKind::NotInstalled => "NotInstalled",
        };
        f.write_str(s)
    }
}

/// Readable cause of a failed package manager call, recognised from its
/// error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    PackageNotFound,
    DependencyConflict,
    BrokenDependencies,
    HeldPackages,
    PermissionDenied,
    LockHeld,
    NetworkError,
    DiskFull,
}

impl FailureReason {
    /// First matching reason, checked from most to least specific.
    pub fn classify(output: &str) -> Option<FailureReason> {
        let lower = output.to_lowercase();
        let reason = if output.contains("Unable to locate package")
            || output.contains("has no installation candidate")
        {
            FailureReason::PackageNotFound
        } else if output.contains("pkgProblemResolver::Resolve generated breaks")
            || (lower.contains("depend") && lower.contains("conflict"))
        {
            FailureReason::DependencyConflict
        } else if output.contains("caused by held packages") {
            FailureReason::HeldPackages
        } else if lower.contains("broken") || output.contains("unmet dependencies") {
            FailureReason::BrokenDependencies
        } else if output.contains("Could not get lock") {
            FailureReason::LockHeld
        } else if output.contains("Permission denied") || output.contains("are you root?") {
            FailureReason::PermissionDenied
        } else if output.contains("Could not resolve")
            || output.contains("Failed to fetch")
            || output.contains("Temporary failure resolving")
        {
            FailureReason::NetworkError
        } else if output.contains("No space left on device") {
            FailureReason::DiskFull
        } else {
            return None;
        };
        Some(reason)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::PackageNotFound => "package not found in repositories",
            FailureReason::DependencyConflict => "dependency conflict",
            FailureReason::BrokenDependencies => "broken dependencies",
            FailureReason::HeldPackages => "blocked by held packages",
            FailureReason::PermissionDenied => "permission denied",
            FailureReason::LockHeld => "package database locked by another process",
            FailureReason::NetworkError => "network error",
            FailureReason::DiskFull => "insufficient disk space",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub package_name: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl InstallResult {
    pub fn new(package_name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            package_name: package_name.into(),
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn failed(package_name: impl Into<String>, kind: FailureKind, detail: impl fmt::Display) -> Self {
        Self::new(package_name, Outcome::Failed).with_detail(format!("{}: {}", kind, detail))
    }

    /// A failed package manager call. The detail leads with the classified
    /// reason when the error output is recognised.
    pub fn invocation_failed(package_name: impl Into<String>, error: &str) -> Self {
        let detail = match FailureReason::classify(error) {
            Some(reason) => format!("{} ({})", reason, error),
            None => error.to_string(),
        };
        Self::failed(package_name, FailureKind::PackageManagerInvocationFailed, detail)
    }

    /// The failure category, parsed back from the detail prefix.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.outcome != Outcome::Failed {
            return None;
        }
        let prefix = self.detail.as_deref()?.split(':').next()?;
        [
            FailureKind::ChecksumMismatch,
            FailureKind::PackageManagerInvocationFailed,
            FailureKind::InvalidPackageName,
            FailureKind::NotInstalled,
        ]
        .into_iter()
        .find(|kind| kind.to_string() == prefix)
    }
}

impl fmt::Display for InstallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.package_name, self.outcome)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Results of one batch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<InstallResult>,
    /// Set when the batch stopped early; `results` then only holds the
    /// packages that finished.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failure())
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}
