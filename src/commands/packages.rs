use anyhow::{Result, bail};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::apt::{Apt, PackageManager};
use crate::category::{CategoryRegistry, Selection};
use crate::config::Config;
use crate::engine::{BatchReport, ChecksumVerifier, InstallationEngine, Outcome, UpdateTarget};
use crate::history::InstallHistory;
use crate::runtime::{CommandRunner, Runtime};

use super::load_catalog;

/// Packages named on the command line plus the tools of any selected
/// categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRequest {
    pub categories: Option<String>,
    pub packages: Vec<String>,
}

impl PackageRequest {
    pub fn is_empty(&self) -> bool {
        self.categories.is_none() && self.packages.is_empty()
    }

    /// Category tools first, in registry order, then explicit packages.
    fn resolve(&self, registry: &CategoryRegistry) -> Result<Vec<String>> {
        let mut packages = Vec::new();
        if let Some(selection) = &self.categories {
            let selection: Selection = selection.parse()?;
            packages.extend(
                registry
                    .resolve(&selection)?
                    .into_iter()
                    .map(|entry| entry.package_name),
            );
        }
        packages.extend(self.packages.iter().cloned());
        if packages.is_empty() {
            bail!("No packages selected");
        }
        Ok(packages)
    }
}

enum Action {
    Install(Vec<String>),
    Remove { packages: Vec<String>, purge: bool },
    Update { target: UpdateTarget, refresh: bool },
}

async fn run<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    cancel: CancellationToken,
    action: Action,
) -> Result<BatchReport> {
    let apt = Apt::new(runner, config.command_timeout());
    let history = InstallHistory::new(runtime, &config.state_dir);
    let checksums = ChecksumVerifier::new(
        runtime,
        config.checksum_dir.clone(),
        config.install_root.clone(),
    );
    let engine = InstallationEngine::new(&apt, &history, checksums).with_cancellation(cancel);

    let report = match action {
        Action::Install(packages) => engine.install(&packages, config.parallelism).await,
        Action::Remove { packages, purge } => {
            engine.remove(&packages, purge, config.parallelism).await
        }
        Action::Update { target, refresh } => {
            if refresh {
                apt.refresh_index().await?;
            }
            engine.update(target, config.parallelism).await?
        }
    };
    print_report(&report);
    Ok(report)
}

fn print_report(report: &BatchReport) {
    for result in &report.results {
        println!("{}", result);
    }
    if report.cancelled {
        println!("Cancelled; remaining packages were not processed.");
    }
}

fn finish(report: &BatchReport) -> Result<()> {
    let failed = report.count(Outcome::Failed);
    if failed > 0 {
        bail!("{} of {} packages failed", failed, report.results.len());
    }
    if report.cancelled {
        bail!("Operation cancelled");
    }
    Ok(())
}

#[tracing::instrument(skip(runtime, runner, config, cancel))]
pub async fn install<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    request: &PackageRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let (registry, _) = load_catalog(runtime, config);
    let packages = request.resolve(&registry)?;
    if !runtime.is_privileged() {
        warn!("Not running as root; apt-get will probably refuse to install");
    }
    info!("Installing {} packages", packages.len());

    let report = run(runtime, runner, config, cancel, Action::Install(packages)).await?;
    finish(&report)
}

#[tracing::instrument(skip(runtime, runner, config, cancel))]
pub async fn remove<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    request: &PackageRequest,
    purge: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let (registry, _) = load_catalog(runtime, config);
    let packages = request.resolve(&registry)?;
    let report = run(
        runtime,
        runner,
        config,
        cancel,
        Action::Remove { packages, purge },
    )
    .await?;
    finish(&report)
}

/// Upgrade the requested packages, or every installed package when the
/// request is empty.
#[tracing::instrument(skip(runtime, runner, config, cancel))]
pub async fn update<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    request: &PackageRequest,
    refresh: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let target = if request.is_empty() {
        UpdateTarget::All
    } else {
        let (registry, _) = load_catalog(runtime, config);
        UpdateTarget::Packages(request.resolve(&registry)?)
    };
    let report = run(
        runtime,
        runner,
        config,
        cancel,
        Action::Update { target, refresh },
    )
    .await?;
    finish(&report)
}

/// Show the installed version of each requested package.
#[tracing::instrument(skip(runtime, runner, config))]
pub async fn status<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    request: &PackageRequest,
) -> Result<()> {
    let (registry, _) = load_catalog(runtime, config);
    let packages = request.resolve(&registry)?;

    let apt = Apt::new(runner, config.command_timeout());
    let history = InstallHistory::new(runtime, &config.state_dir);
    let checksums = ChecksumVerifier::new(
        runtime,
        config.checksum_dir.clone(),
        config.install_root.clone(),
    );
    let engine = InstallationEngine::new(&apt, &history, checksums);

    for status in engine.status(&packages).await {
        let state = match (&status.installed_version, &status.error) {
            (_, Some(error)) => format!("unknown ({})", error),
            (Some(version), None) => version.clone(),
            (None, None) => "not installed".to_string(),
        };
        let category = registry
            .category_of(&status.package_name)
            .map(|c| format!(" [{}]", c.display_name))
            .unwrap_or_default();
        println!("{} {}{}", status.package_name, state, category);
    }
    Ok(())
}
