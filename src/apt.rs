//! Package manager access.
//!
//! [`Apt`] drives `apt-get` and `dpkg-query` through a [`CommandRunner`], one
//! package per invocation, always with an argument vector.

use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::debug;

use crate::runtime::{CommandOutput, CommandRunner};

const APT_GET: &str = "apt-get";
const DPKG_QUERY: &str = "dpkg-query";
const INSTALLED: &str = "install ok installed";

/// Debian policy: lowercase alphanumerics plus `+ - .`, at least two
/// characters, starting with an alphanumeric.
pub fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() >= 2
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn is_installed(&self, package: &str) -> Result<bool>;

    async fn installed_version(&self, package: &str) -> Result<Option<String>>;

    async fn install(&self, package: &str) -> Result<()>;

    async fn remove(&self, package: &str) -> Result<()>;

    async fn autoremove(&self) -> Result<()>;

    /// Whether a newer version than the installed one is available.
    async fn upgrade_available(&self, package: &str) -> Result<bool>;

    async fn upgrade(&self, package: &str) -> Result<()>;

    async fn refresh_index(&self) -> Result<()>;

    /// Names of all installed packages.
    async fn list_installed(&self) -> Result<Vec<String>>;

    /// Whether mutating calls may overlap. dpkg holds a global lock, so apt
    /// cannot.
    fn supports_concurrent_mutation(&self) -> bool {
        false
    }
}

pub struct Apt<'a> {
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> Apt<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(program, &args, self.timeout).await
    }

    async fn mutate(&self, args: &[&str]) -> Result<()> {
        let output = self.run(APT_GET, args).await?;
        if !output.success() {
            bail!(
                "apt-get {} exited with status {}: {}",
                args.join(" "),
                output
                    .status
                    .map_or_else(|| "signal".to_string(), |s| s.to_string()),
                output.stderr_tail(512)
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PackageManager for Apt<'_> {
    async fn is_installed(&self, package: &str) -> Result<bool> {
        Ok(self.installed_version(package).await?.is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn installed_version(&self, package: &str) -> Result<Option<String>> {
        let output = self
            .run(DPKG_QUERY, &["-W", "-f=${Status}\t${Version}", package])
            .await?;
        // dpkg-query exits non-zero for packages it has never seen
        if !output.success() {
            return Ok(None);
        }
        let stdout = output.stdout_str();
        let Some((status, version)) = stdout.trim_end().split_once('\t') else {
            return Ok(None);
        };
        if status != INSTALLED || version.is_empty() {
            return Ok(None);
        }
        Ok(Some(version.to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn install(&self, package: &str) -> Result<()> {
        debug!("Installing {}", package);
        self.mutate(&["install", "-y", package]).await
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, package: &str) -> Result<()> {
        debug!("Removing {}", package);
        self.mutate(&["remove", "-y", package]).await
    }

    async fn autoremove(&self) -> Result<()> {
        self.mutate(&["autoremove", "-y"]).await
    }

    #[tracing::instrument(skip(self))]
    async fn upgrade_available(&self, package: &str) -> Result<bool> {
        let output = self
            .run(
                APT_GET,
                &["--simulate", "--quiet", "install", "--only-upgrade", package],
            )
            .await?;
        if !output.success() {
            bail!(
                "apt-get --simulate failed for {}: {}",
                package,
                output.stderr_tail(512)
            );
        }
        let marker = format!("Inst {} ", package);
        Ok(output
            .stdout_str()
            .lines()
            .any(|line| line.starts_with(&marker)))
    }

    #[tracing::instrument(skip(self))]
    async fn upgrade(&self, package: &str) -> Result<()> {
        self.mutate(&["install", "--only-upgrade", "-y", package]).await
    }

    async fn refresh_index(&self) -> Result<()> {
        self.mutate(&["update"]).await
    }

    async fn list_installed(&self) -> Result<Vec<String>> {
        let output = self
            .run(DPKG_QUERY, &["-W", "-f=${Package}\t${Status}\n"])
            .await?;
        if !output.success() {
            bail!("dpkg-query failed: {}", output.stderr_tail(512));
        }
        Ok(output
            .stdout_str()
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .filter(|(_, status)| *status == INSTALLED)
            .map(|(name, _)| name.to_string())
            .collect())
    }
}
