//! Installation engine.
//!
//! Packages are processed by a bounded pool of futures. Calls that change
//! the system go through a single gate because dpkg cannot run twice at once;
//! read-only queries are not gated. Two requests for the same package while
//! its install is in flight share one invocation and one result.

mod checksum;
mod report;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::apt::{PackageManager, is_valid_package_name};
use crate::history::{HistoryRecord, InstallHistory, Operation};
use crate::runtime::Runtime;

pub use checksum::{ChecksumVerifier, MANIFEST_EXTENSION, Verification};
pub use report::{BatchReport, FailureKind, FailureReason, InstallResult, Outcome};

/// Pool size when none is configured: one per CPU, at least one.
pub fn effective_parallelism(requested: Option<usize>) -> usize {
    requested.unwrap_or_else(num_cpus::get).max(1)
}

fn dedupe(packages: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    packages
        .iter()
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTarget {
    /// Every package the package manager reports as installed.
    All,
    Packages(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStatus {
    pub package_name: String,
    pub installed_version: Option<String>,
    pub error: Option<String>,
}

type InFlight = HashMap<String, Arc<OnceCell<InstallResult>>>;

pub struct InstallationEngine<'a, R: Runtime> {
    pm: &'a dyn PackageManager,
    history: &'a InstallHistory<'a, R>,
    checksums: ChecksumVerifier<'a, R>,
    serialize_mutations: bool,
    gate: AsyncMutex<()>,
    in_flight: Mutex<InFlight>,
    cancel: CancellationToken,
}

impl<'a, R: Runtime> InstallationEngine<'a, R> {
    pub fn new(
        pm: &'a dyn PackageManager,
        history: &'a InstallHistory<'a, R>,
        checksums: ChecksumVerifier<'a, R>,
    ) -> Self {
        Self {
            serialize_mutations: !pm.supports_concurrent_mutation(),
            pm,
            history,
            checksums,
            gate: AsyncMutex::new(()),
            in_flight: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the engine from starting further packages.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[tracing::instrument(skip(self, packages), fields(count = packages.len()))]
    pub async fn install(&self, packages: &[String], parallelism: Option<usize>) -> BatchReport {
        let targets = dedupe(packages);
        let parallelism = effective_parallelism(parallelism);
        info!("Installing {} packages ({} at a time)", targets.len(), parallelism);

        let report = self
            .run_batch(&targets, parallelism, |pkg| self.install_one(pkg))
            .await;
        self.record(Operation::Install, targets, &report, None);
        report
    }

    #[tracing::instrument(skip(self, packages), fields(count = packages.len()))]
    pub async fn remove(
        &self,
        packages: &[String],
        purge_dependencies: bool,
        parallelism: Option<usize>,
    ) -> BatchReport {
        let targets = dedupe(packages);
        let parallelism = effective_parallelism(parallelism);

        let report = self
            .run_batch(&targets, parallelism, |pkg| self.remove_one(pkg))
            .await;

        let mut error = None;
        if purge_dependencies && !report.cancelled {
            let _gate = self.mutation_gate().await;
            if let Err(e) = self.pm.autoremove().await {
                warn!("autoremove failed: {:#}", e);
                error = Some(format!(
                    "{}: autoremove: {:#}",
                    FailureKind::PackageManagerInvocationFailed,
                    e
                ));
            }
        }

        self.record(Operation::Remove, targets, &report, error);
        report
    }

    /// Upgrades packages that have a newer candidate. Fails only when the
    /// installed package list cannot be read for [`UpdateTarget::All`].
    #[tracing::instrument(skip(self))]
    pub async fn update(
        &self,
        target: UpdateTarget,
        parallelism: Option<usize>,
    ) -> Result<BatchReport> {
        let packages = match target {
            UpdateTarget::Packages(packages) => dedupe(&packages),
            UpdateTarget::All => match self.pm.list_installed().await {
                Ok(packages) => packages,
                Err(e) => {
                    let record = HistoryRecord::new(Operation::Update, vec!["all".to_string()])
                        .error(Some(format!("{:#}", e)));
                    self.append(&record);
                    return Err(e.context("Failed to list installed packages"));
                }
            },
        };
        let parallelism = effective_parallelism(parallelism);

        let report = self
            .run_batch(&packages, parallelism, |pkg| self.update_one(pkg))
            .await;
        self.record(Operation::Update, packages, &report, None);
        Ok(report)
    }

    pub async fn status(&self, packages: &[String]) -> Vec<PackageStatus> {
        let targets = dedupe(packages);
        stream::iter(targets)
            .map(|package_name| async move {
                match self.pm.installed_version(&package_name).await {
                    Ok(installed_version) => PackageStatus {
                        package_name,
                        installed_version,
                        error: None,
                    },
                    Err(e) => PackageStatus {
                        package_name,
                        installed_version: None,
                        error: Some(format!("{:#}", e)),
                    },
                }
            })
            .buffered(effective_parallelism(None))
            .collect()
            .await
    }

    /// Runs `op` for every package, at most `parallelism` at a time, and
    /// returns results in input order. `op` yields `None` for packages
    /// skipped because of cancellation.
    async fn run_batch<'s, F, Fut>(
        &'s self,
        packages: &'s [String],
        parallelism: usize,
        op: F,
    ) -> BatchReport
    where
        F: Fn(&'s str) -> Fut,
        Fut: std::future::Future<Output = Option<InstallResult>>,
    {
        let mut indexed: Vec<(usize, Option<InstallResult>)> =
            stream::iter(packages.iter().enumerate())
                .map(|(index, pkg)| {
                    let fut = op(pkg.as_str());
                    async move { (index, fut.await) }
                })
                .buffer_unordered(parallelism)
                .collect()
                .await;
        indexed.sort_by_key(|(index, _)| *index);

        let cancelled = indexed.iter().any(|(_, result)| result.is_none());
        if cancelled {
            let finished = indexed.iter().filter(|(_, r)| r.is_some()).count();
            info!("Cancelled after {} of {} packages", finished, packages.len());
        }
        BatchReport {
            results: indexed.into_iter().filter_map(|(_, result)| result).collect(),
            cancelled,
        }
    }

    async fn mutation_gate(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        if self.serialize_mutations {
            Some(self.gate.lock().await)
        } else {
            None
        }
    }

    async fn install_one(&self, pkg: &str) -> Option<InstallResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        if !is_valid_package_name(pkg) {
            return Some(InstallResult::failed(pkg, FailureKind::InvalidPackageName, pkg));
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(pkg.to_string()).or_default())
        };
        let result = cell.get_or_init(|| self.install_fresh(pkg)).await.clone();

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(pkg).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(pkg);
        }
        Some(result)
    }

    async fn install_fresh(&self, pkg: &str) -> InstallResult {
        match self.pm.is_installed(pkg).await {
            Ok(true) => {
                debug!("{} is already installed", pkg);
                return InstallResult::new(pkg, Outcome::AlreadyPresent);
            }
            Ok(false) => {}
            Err(e) => {
                return InstallResult::invocation_failed(pkg, &format!("{:#}", e));
            }
        }

        let installed = {
            let _gate = self.mutation_gate().await;
            self.pm.install(pkg).await
        };
        if let Err(e) = installed {
            warn!("Failed to install {}: {:#}", pkg, e);
            return InstallResult::invocation_failed(pkg, &format!("{:#}", e));
        }

        match self.checksums.verify(pkg) {
            Ok(Verification::NoManifest) => InstallResult::new(pkg, Outcome::Installed),
            Ok(Verification::Verified(files)) => InstallResult::new(pkg, Outcome::Installed)
                .with_detail(format!("{} files verified", files)),
            Ok(Verification::Mismatch { path, reason }) => {
                warn!("Checksum mismatch for {}: {} ({})", pkg, path.display(), reason);
                InstallResult::failed(
                    pkg,
                    FailureKind::ChecksumMismatch,
                    format!("{} ({})", path.display(), reason),
                )
            }
            Err(e) => InstallResult::failed(pkg, FailureKind::ChecksumMismatch, format!("{:#}", e)),
        }
    }

    async fn remove_one(&self, pkg: &str) -> Option<InstallResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        if !is_valid_package_name(pkg) {
            return Some(InstallResult::failed(pkg, FailureKind::InvalidPackageName, pkg));
        }

        let result = match self.pm.is_installed(pkg).await {
            Ok(false) => InstallResult::new(pkg, Outcome::Removed).with_detail("not installed"),
            Ok(true) => {
                let removed = {
                    let _gate = self.mutation_gate().await;
                    self.pm.remove(pkg).await
                };
                match removed {
                    Ok(()) => InstallResult::new(pkg, Outcome::Removed),
                    Err(e) => InstallResult::invocation_failed(pkg, &format!("{:#}", e)),
                }
            }
            Err(e) => InstallResult::invocation_failed(pkg, &format!("{:#}", e)),
        };
        Some(result)
    }

    async fn update_one(&self, pkg: &str) -> Option<InstallResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        if !is_valid_package_name(pkg) {
            return Some(InstallResult::failed(pkg, FailureKind::InvalidPackageName, pkg));
        }

        let invocation_failed = |e: anyhow::Error| {
            InstallResult::invocation_failed(pkg, &format!("{:#}", e))
        };

        let result = match self.pm.is_installed(pkg).await {
            Err(e) => invocation_failed(e),
            Ok(false) => InstallResult::failed(pkg, FailureKind::NotInstalled, pkg),
            Ok(true) => match self.pm.upgrade_available(pkg).await {
                Err(e) => invocation_failed(e),
                Ok(false) => InstallResult::new(pkg, Outcome::UpToDate),
                Ok(true) => {
                    let upgraded = {
                        let _gate = self.mutation_gate().await;
                        self.pm.upgrade(pkg).await
                    };
                    match upgraded {
                        Ok(()) => InstallResult::new(pkg, Outcome::Updated),
                        Err(e) => invocation_failed(e),
                    }
                }
            },
        };
        Some(result)
    }

    fn record(
        &self,
        operation: Operation,
        targets: Vec<String>,
        report: &BatchReport,
        error: Option<String>,
    ) {
        let error = error.or_else(|| report.cancelled.then(|| "cancelled".to_string()));
        let record = HistoryRecord::new(operation, targets)
            .results(report.results.clone())
            .error(error);
        self.append(&record);
    }

    fn append(&self, record: &HistoryRecord) {
        if let Err(e) = self.history.append(record) {
            warn!("Failed to record {} in history: {:#}", record.operation, e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::apt::MockPackageManager;
    use crate::runtime::RealRuntime;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// In-memory package manager that counts calls and tracks how many
    /// mutations overlap.
    #[derive(Default)]
    struct FakeApt {
        installed: Mutex<BTreeMap<String, String>>,
        upgradable: HashSet<String>,
        broken: HashSet<String>,
        concurrent: bool,
        install_calls: Mutex<HashMap<String, usize>>,
        autoremove_calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        cancel_after_install: Option<CancellationToken>,
    }

    impl FakeApt {
        fn with_installed(packages: &[&str]) -> Self {
            let fake = Self::default();
            {
                let mut installed = fake.installed.lock().unwrap();
                for pkg in packages {
                    installed.insert(pkg.to_string(), "1.0".to_string());
                }
            }
            fake
        }

        fn install_calls(&self, pkg: &str) -> usize {
            self.install_calls.lock().unwrap().get(pkg).copied().unwrap_or(0)
        }

        async fn mutation(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PackageManager for FakeApt {
        async fn is_installed(&self, package: &str) -> Result<bool> {
            Ok(self.installed.lock().unwrap().contains_key(package))
        }

        async fn installed_version(&self, package: &str) -> Result<Option<String>> {
            Ok(self.installed.lock().unwrap().get(package).cloned())
        }

        async fn install(&self, package: &str) -> Result<()> {
            *self
                .install_calls
                .lock()
                .unwrap()
                .entry(package.to_string())
                .or_default() += 1;
            self.mutation().await;
            if let Some(token) = &self.cancel_after_install {
                token.cancel();
            }
            if self.broken.contains(package) {
                return Err(anyhow!("E: Unable to locate package {}", package));
            }
            self.installed
                .lock()
                .unwrap()
                .insert(package.to_string(), "1.0".to_string());
            Ok(())
        }

        async fn remove(&self, package: &str) -> Result<()> {
            self.mutation().await;
            self.installed.lock().unwrap().remove(package);
            Ok(())
        }

        async fn autoremove(&self) -> Result<()> {
            self.autoremove_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn upgrade_available(&self, package: &str) -> Result<bool> {
            Ok(self.upgradable.contains(package))
        }

        async fn upgrade(&self, package: &str) -> Result<()> {
            self.mutation().await;
            self.installed
                .lock()
                .unwrap()
                .insert(package.to_string(), "2.0".to_string());
            Ok(())
        }

        async fn refresh_index(&self) -> Result<()> {
            Ok(())
        }

        async fn list_installed(&self) -> Result<Vec<String>> {
            Ok(self.installed.lock().unwrap().keys().cloned().collect())
        }

        fn supports_concurrent_mutation(&self) -> bool {
            self.concurrent
        }
    }

    fn names(packages: &[&str]) -> Vec<String> {
        packages.iter().map(|p| p.to_string()).collect()
    }

    fn verifier<'a>(runtime: &'a RealRuntime, dir: &Path) -> ChecksumVerifier<'a, RealRuntime> {
        ChecksumVerifier::new(runtime, dir.join("sums"), dir.join("root"))
    }

    struct Fixture {
        dir: TempDir,
        runtime: RealRuntime,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                runtime: RealRuntime,
            }
        }

        fn history(&self) -> InstallHistory<'_, RealRuntime> {
            InstallHistory::new(&self.runtime, &self.dir.path().join("state"))
        }
    }

    #[test]
    fn test_effective_parallelism() {
        assert_eq!(effective_parallelism(Some(4)), 4);
        assert_eq!(effective_parallelism(Some(0)), 1);
        assert!(effective_parallelism(None) >= 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_install_reports_results_in_request_order() {
        // --- Setup ---
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::with_installed(&["sqlmap"]);
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        // --- Execute ---
        let report = engine
            .install(&names(&["nmap", "sqlmap", "nmap", "hydra"]), Some(3))
            .await;

        // --- Verify ---
        let outcomes: Vec<(&str, Outcome)> = report
            .results
            .iter()
            .map(|r| (r.package_name.as_str(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("nmap", Outcome::Installed),
                ("sqlmap", Outcome::AlreadyPresent),
                ("hydra", Outcome::Installed),
            ]
        );
        assert!(!report.cancelled);
        assert_eq!(apt.install_calls("nmap"), 1);
        assert_eq!(apt.install_calls("sqlmap"), 0);
    }

    #[tokio::test]
    async fn test_already_present_packages_never_reach_installer() {
        // --- Setup ---
        let fx = Fixture::new();
        let history = fx.history();
        let mut pm = MockPackageManager::new();
        pm.expect_supports_concurrent_mutation().return_const(false);
        pm.expect_is_installed().returning(|_| Ok(true));
        pm.expect_install().never();

        let engine = InstallationEngine::new(&pm, &history, verifier(&fx.runtime, fx.dir.path()));

        // --- Execute ---
        let report = engine.install(&names(&["nmap", "dnsenum"]), None).await;

        // --- Verify ---
        assert_eq!(report.count(Outcome::AlreadyPresent), 2);
        let records = history.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Install);
        assert_eq!(records[0].targets, vec!["nmap", "dnsenum"]);
        assert_eq!(records[0].results, report.results);
        assert_eq!(records[0].error, None);
    }

    #[tokio::test]
    async fn test_concurrent_installs_of_same_package_are_coalesced() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::default();
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let first = names(&["nmap"]);
        let second = names(&["nmap", "hydra"]);
        let (a, b) = tokio::join!(engine.install(&first, None), engine.install(&second, None));

        assert_eq!(apt.install_calls("nmap"), 1);
        assert_eq!(a.results[0], b.results[0]);
        assert_eq!(a.results[0].outcome, Outcome::Installed);
        assert_eq!(b.results[1].outcome, Outcome::Installed);
        assert_eq!(history.records().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mutations_are_serialized_through_gate() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::default();
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let report = engine
            .install(&names(&["aa", "bb", "cc", "dd"]), Some(4))
            .await;

        assert_eq!(report.count(Outcome::Installed), 4);
        assert_eq!(apt.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_is_skipped_when_mutation_may_overlap() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt {
            concurrent: true,
            ..FakeApt::default()
        };
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        engine
            .install(&names(&["aa", "bb", "cc", "dd"]), Some(4))
            .await;

        assert!(apt.max_active.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_failed_install_does_not_stop_batch() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt {
            broken: HashSet::from(["no-such-tool".to_string()]),
            ..FakeApt::default()
        };
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let report = engine
            .install(&names(&["nmap", "no-such-tool", "hydra", "Bad Name"]), Some(2))
            .await;

        assert_eq!(report.count(Outcome::Installed), 2);
        assert!(report.has_failures());
        assert_eq!(
            report.results[1].failure_kind(),
            Some(FailureKind::PackageManagerInvocationFailed)
        );
        assert!(
            report.results[1]
                .detail
                .as_deref()
                .unwrap()
                .contains("package not found in repositories")
        );
        assert_eq!(
            report.results[3].failure_kind(),
            Some(FailureKind::InvalidPackageName)
        );
        assert_eq!(apt.install_calls("Bad Name"), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_install() {
        // --- Setup ---
        let fx = Fixture::new();
        let root = fx.dir.path().join("root");
        let sums = fx.dir.path().join("sums");
        std::fs::create_dir_all(root.join("usr/bin")).unwrap();
        std::fs::create_dir_all(&sums).unwrap();
        std::fs::write(root.join("usr/bin/nmap"), b"tampered").unwrap();
        std::fs::write(root.join("usr/bin/hydra"), b"hydra").unwrap();
        std::fs::write(
            sums.join("nmap.sha256sums"),
            format!("{}  usr/bin/nmap\n", hex::encode(Sha256::digest(b"original"))),
        )
        .unwrap();
        std::fs::write(
            sums.join("hydra.sha256sums"),
            format!("{}  usr/bin/hydra\n", hex::encode(Sha256::digest(b"hydra"))),
        )
        .unwrap();

        let history = fx.history();
        let apt = FakeApt::default();
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        // --- Execute ---
        let report = engine.install(&names(&["nmap", "hydra"]), None).await;

        // --- Verify ---
        assert_eq!(
            report.results[0].failure_kind(),
            Some(FailureKind::ChecksumMismatch)
        );
        assert_eq!(report.results[1].outcome, Outcome::Installed);
        assert_eq!(report.results[1].detail.as_deref(), Some("1 files verified"));
    }

    #[tokio::test]
    async fn test_cancellation_returns_completed_results() {
        let fx = Fixture::new();
        let history = fx.history();
        let token = CancellationToken::new();
        let apt = FakeApt {
            cancel_after_install: Some(token.clone()),
            ..FakeApt::default()
        };
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()))
            .with_cancellation(token);

        let report = engine.install(&names(&["aa", "bb", "cc"]), Some(1)).await;

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].package_name, "aa");
        assert_eq!(apt.install_calls("bb"), 0);

        let records = history.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::default();
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));
        engine.cancellation().cancel();

        let report = engine.install(&names(&["nmap"]), None).await;

        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(apt.install_calls("nmap"), 0);
    }

    #[tokio::test]
    async fn test_remove_with_single_autoremove() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::with_installed(&["nmap", "sqlmap"]);
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let report = engine
            .remove(&names(&["nmap", "dnsenum", "sqlmap"]), true, Some(2))
            .await;

        assert_eq!(report.count(Outcome::Removed), 3);
        assert_eq!(report.results[1].detail.as_deref(), Some("not installed"));
        assert_eq!(report.results[0].detail, None);
        assert_eq!(apt.autoremove_calls.load(Ordering::SeqCst), 1);
        assert!(!apt.is_installed("nmap").await.unwrap());

        let records = history.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Remove);
    }

    #[tokio::test]
    async fn test_remove_without_purge_skips_autoremove() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::with_installed(&["nmap"]);
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        engine.remove(&names(&["nmap"]), false, None).await;

        assert_eq!(apt.autoremove_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_explicit_packages() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt {
            upgradable: HashSet::from(["nmap".to_string()]),
            ..FakeApt::with_installed(&["nmap", "sqlmap"])
        };
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let report = engine
            .update(
                UpdateTarget::Packages(names(&["nmap", "sqlmap", "ghost"])),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.results[0].outcome, Outcome::Updated);
        assert_eq!(report.results[1].outcome, Outcome::UpToDate);
        assert_eq!(
            report.results[2].failure_kind(),
            Some(FailureKind::NotInstalled)
        );
        assert_eq!(
            apt.installed_version("nmap").await.unwrap().as_deref(),
            Some("2.0")
        );
        assert_eq!(history.records().unwrap()[0].operation, Operation::Update);
    }

    #[tokio::test]
    async fn test_update_all_uses_installed_list() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt {
            upgradable: HashSet::from(["sqlmap".to_string()]),
            ..FakeApt::with_installed(&["nmap", "sqlmap"])
        };
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let report = engine.update(UpdateTarget::All, None).await.unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.count(Outcome::Updated), 1);
        assert_eq!(report.count(Outcome::UpToDate), 1);
    }

    #[tokio::test]
    async fn test_update_all_fails_when_listing_fails() {
        let fx = Fixture::new();
        let history = fx.history();
        let mut pm = MockPackageManager::new();
        pm.expect_supports_concurrent_mutation().return_const(false);
        pm.expect_list_installed()
            .returning(|| Err(anyhow!("dpkg-query failed")));

        let engine = InstallationEngine::new(&pm, &history, verifier(&fx.runtime, fx.dir.path()));
        assert!(engine.update(UpdateTarget::All, None).await.is_err());

        let records = history.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].error.is_some());
    }

    #[tokio::test]
    async fn test_status_reports_versions() {
        let fx = Fixture::new();
        let history = fx.history();
        let apt = FakeApt::with_installed(&["nmap"]);
        let engine = InstallationEngine::new(&apt, &history, verifier(&fx.runtime, fx.dir.path()));

        let status = engine.status(&names(&["nmap", "hydra"])).await;

        assert_eq!(status[0].installed_version.as_deref(), Some("1.0"));
        assert_eq!(status[1].installed_version, None);
        assert!(status.iter().all(|s| s.error.is_none()));
        assert!(history.records().unwrap().is_empty());
    }
}
