//! Repository signing keys.
//!
//! Keys are fetched from a URL or a keyserver, inspected with gpg, and stored
//! as `tooldeck-<fingerprint>.{asc,gpg}` in the keyring directory. A JSON
//! ledger in the state directory records which repositories reference each
//! key so a key is only deleted once nothing uses it.

mod gpg;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{HttpClient, RetryPolicy, with_retry};
use crate::runtime::{CommandRunner, Runtime};
use crate::source::{KeySource, RepositoryDescriptor};

pub use gpg::{is_valid_fingerprint, is_valid_key_id, normalize_fingerprint};

const GPG: &str = "gpg";
const LEDGER_FILE: &str = "keyring.json";
const SCRATCH_HOME: &str = "gnupg";

/// Default time allowed for each key fetch attempt.
pub const DEFAULT_KEY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to fetch signing key from {origin}: {reason}")]
    KeyFetchFailed { origin: String, reason: String },
    #[error("failed to import signing key from {origin}: {reason}")]
    KeyImportFailed { origin: String, reason: String },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    Url(String),
    Keyserver { key_id: String, keyserver: String },
}

/// A key imported into the trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub fingerprint: String,
    pub origin: KeyOrigin,
    pub imported: bool,
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    keys: BTreeMap<String, LedgerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    path: PathBuf,
    repositories: BTreeSet<String>,
}

pub struct KeyStore<'a, R: Runtime> {
    runtime: &'a R,
    runner: &'a dyn CommandRunner,
    http: HttpClient,
    keyring_dir: PathBuf,
    state_dir: PathBuf,
    key_timeout: Duration,
    retry: RetryPolicy,
}

impl<'a, R: Runtime> KeyStore<'a, R> {
    pub fn new(
        runtime: &'a R,
        runner: &'a dyn CommandRunner,
        http: HttpClient,
        keyring_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            runner,
            http,
            keyring_dir,
            state_dir,
            key_timeout: DEFAULT_KEY_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Timeout applied to gpg keyserver commands.
    pub fn key_timeout(mut self, timeout: Duration) -> Self {
        self.key_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.http = self.http.retry_policy(policy);
        self.retry = policy;
        self
    }

    pub fn keyring_dir(&self) -> &Path {
        &self.keyring_dir
    }

    /// Fetches, validates and stores the key described by `desc`, recording
    /// `desc.name` as a reference. Returns `None` when the repository has no key.
    #[tracing::instrument(skip(self, desc), fields(repo = %desc.name))]
    pub async fn import_key(
        &mut self,
        desc: &RepositoryDescriptor,
    ) -> Result<Option<SigningKey>, KeyError> {
        let origin = match &desc.key_source {
            KeySource::None => return Ok(None),
            KeySource::Url { url, .. } => KeyOrigin::Url(url.clone()),
            KeySource::Keyserver {
                key_id, keyserver, ..
            } => KeyOrigin::Keyserver {
                key_id: key_id.clone(),
                keyserver: keyserver.clone(),
            },
        };
        let label = desc.key_source.to_string();

        let material = match &origin {
            KeyOrigin::Url(url) => self.fetch_url(url, &label).await?,
            KeyOrigin::Keyserver { key_id, keyserver } => {
                self.fetch_keyserver(key_id, keyserver, &label).await?
            }
        };

        if material.iter().all(u8::is_ascii_whitespace) {
            return Err(KeyError::KeyImportFailed {
                origin: label,
                reason: "key material is empty".to_string(),
            });
        }

        self.runtime
            .create_dir_all(&self.keyring_dir)
            .context("Failed to create keyring directory")?;
        let scratch = self
            .keyring_dir
            .join(format!(".tooldeck-import-{}.tmp", std::process::id()));
        self.runtime.write(&scratch, &material)?;

        let expected = desc
            .key_source
            .expected_fingerprint()
            .map(normalize_fingerprint);
        let fingerprint = match self.inspect(&scratch, expected.as_deref(), &label).await {
            Ok(fpr) => fpr,
            Err(e) => {
                self.discard(&scratch);
                return Err(e);
            }
        };

        let extension = if gpg::is_armored(&material) { "asc" } else { "gpg" };
        let path = self
            .keyring_dir
            .join(format!("tooldeck-{}.{}", fingerprint, extension));
        if let Err(e) = self.runtime.rename(&scratch, &path) {
            self.discard(&scratch);
            return Err(e.into());
        }
        self.runtime.set_permissions(&path, 0o644)?;

        let mut ledger = self.load_ledger()?;
        ledger
            .keys
            .entry(fingerprint.clone())
            .or_insert_with(|| LedgerEntry {
                path: path.clone(),
                repositories: BTreeSet::new(),
            })
            .repositories
            .insert(desc.name.clone());
        self.save_ledger(&ledger)?;

        info!("Imported signing key {} for {}", fingerprint, desc.name);
        Ok(Some(SigningKey {
            fingerprint,
            origin,
            imported: true,
            path,
        }))
    }

    /// Drops every reference held by `repo_name`. Keys left unreferenced are
    /// deleted; their paths are returned.
    #[tracing::instrument(skip(self))]
    pub fn release_key(&mut self, repo_name: &str) -> Result<Vec<PathBuf>, KeyError> {
        let mut ledger = self.load_ledger()?;
        let mut touched = false;
        for entry in ledger.keys.values_mut() {
            touched |= entry.repositories.remove(repo_name);
        }
        if !touched {
            debug!("No signing key referenced by {}", repo_name);
            return Ok(Vec::new());
        }

        let orphaned: Vec<String> = ledger
            .keys
            .iter()
            .filter(|(_, entry)| entry.repositories.is_empty())
            .map(|(fpr, _)| fpr.clone())
            .collect();

        let mut removed = Vec::new();
        for fpr in orphaned {
            if let Some(entry) = ledger.keys.remove(&fpr) {
                if self.runtime.exists(&entry.path) {
                    self.runtime.remove_file(&entry.path)?;
                }
                info!("Removed signing key {}", fpr);
                removed.push(entry.path);
            }
        }

        self.save_ledger(&ledger)?;
        Ok(removed)
    }

    /// Fingerprints in the trust store with the repositories referencing them.
    #[cfg(test)]
    fn references(&self) -> Result<BTreeMap<String, Vec<String>>, KeyError> {
        Ok(self
            .load_ledger()?
            .keys
            .into_iter()
            .map(|(fpr, entry)| (fpr, entry.repositories.into_iter().collect()))
            .collect())
    }

    async fn fetch_url(&self, url: &str, label: &str) -> Result<Vec<u8>, KeyError> {
        debug!("Fetching signing key from {}", url);
        self.http
            .get_bytes(url)
            .await
            .map_err(|e| KeyError::KeyFetchFailed {
                origin: label.to_string(),
                reason: format!("{:#}", e),
            })
    }

    async fn fetch_keyserver(
        &self,
        key_id: &str,
        keyserver: &str,
        label: &str,
    ) -> Result<Vec<u8>, KeyError> {
        if !is_valid_key_id(key_id) {
            return Err(KeyError::KeyImportFailed {
                origin: label.to_string(),
                reason: format!("invalid key id {:?}", key_id),
            });
        }

        let homedir = self.state_dir.join(SCRATCH_HOME);
        self.runtime.create_dir_all(&homedir)?;
        self.runtime.set_permissions(&homedir, 0o700)?;

        let fetch_failed = |e: anyhow::Error| KeyError::KeyFetchFailed {
            origin: label.to_string(),
            reason: format!("{:#}", e),
        };

        let recv = gpg::recv_keys_args(&homedir, keyserver, key_id);
        with_retry(self.retry, "gpg --recv-keys", || async {
            let output = self.runner.run(GPG, &recv, self.key_timeout).await?;
            if !output.success() {
                bail!(
                    "gpg --recv-keys exited with {:?}: {}",
                    output.status,
                    output.stderr_tail(512)
                );
            }
            Ok(())
        })
        .await
        .map_err(fetch_failed)?;

        let export = gpg::export_args(&homedir, key_id);
        let output = self
            .runner
            .run(GPG, &export, self.key_timeout)
            .await
            .map_err(fetch_failed)?;
        if !output.success() {
            return Err(fetch_failed(anyhow!(
                "gpg --export exited with {:?}: {}",
                output.status,
                output.stderr_tail(512)
            )));
        }
        Ok(output.stdout)
    }

    async fn inspect(
        &self,
        path: &Path,
        expected: Option<&str>,
        label: &str,
    ) -> Result<String, KeyError> {
        let import_failed = |reason: String| KeyError::KeyImportFailed {
            origin: label.to_string(),
            reason,
        };

        let output = self
            .runner
            .run(GPG, &gpg::show_keys_args(path), self.key_timeout)
            .await
            .map_err(|e| import_failed(format!("{:#}", e)))?;
        if !output.success() {
            return Err(import_failed(format!(
                "gpg rejected the key material: {}",
                output.stderr_tail(512)
            )));
        }

        let fingerprint = gpg::primary_fingerprint(&output.stdout_str())
            .ok_or_else(|| import_failed("no fingerprint in key material".to_string()))?;
        if !is_valid_fingerprint(&fingerprint) {
            return Err(import_failed(format!(
                "malformed fingerprint {}",
                fingerprint
            )));
        }
        if let Some(expected) = expected
            && expected != fingerprint
        {
            return Err(import_failed(format!(
                "fingerprint mismatch: expected {}, got {}",
                expected, fingerprint
            )));
        }
        Ok(fingerprint)
    }

    fn discard(&self, scratch: &Path) {
        if self.runtime.exists(scratch)
            && let Err(e) = self.runtime.remove_file(scratch)
        {
            warn!("Failed to remove {}: {}", scratch.display(), e);
        }
    }

    fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE)
    }

    fn load_ledger(&self) -> anyhow::Result<Ledger> {
        let path = self.ledger_path();
        if !self.runtime.exists(&path) {
            return Ok(Ledger::default());
        }
        let content = self.runtime.read_to_string(&path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse key ledger {}", path.display()))
    }

    fn save_ledger(&self, ledger: &Ledger) -> anyhow::Result<()> {
        let path = self.ledger_path();
        self.runtime.create_dir_all(&self.state_dir)?;
        let tmp = self.state_dir.join(format!(".{}.tmp", LEDGER_FILE));
        let json = serde_json::to_string_pretty(ledger)?;
        self.runtime.write(&tmp, json.as_bytes())?;
        self.runtime.rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CommandOutput, MockCommandRunner, RealRuntime};
    use tempfile::tempdir;

    const KALI_FPR: &str = "827C8569F2518CC677FECA1AED65462EC8D5E4C5";
    const ARMORED: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\nmQINBE8\n-----END PGP PUBLIC KEY BLOCK-----\n";

    fn colons(fpr: &str) -> String {
        format!("pub:-:4096:1:ED65462EC8D5E4C5:1328287226:::-:::scSC:\nfpr:::::::::{}:\n", fpr)
    }

    fn show_keys_returns(runner: &mut MockCommandRunner, fpr: &'static str) {
        runner
            .expect_run()
            .withf(|program, args, _| program.to_string() == "gpg" && args.iter().any(|a| a == "--show-keys"))
            .returning(move |_, _, _| Ok(CommandOutput::new(0, colons(fpr), "")));
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn url_descriptor(name: &str, url: String, fingerprint: Option<&str>) -> RepositoryDescriptor {
        RepositoryDescriptor::new(name, "http://http.kali.org/kali", "kali-rolling", &["main"])
            .with_key(KeySource::Url {
                url,
                fingerprint: fingerprint.map(String::from),
            })
    }

    #[tokio::test]
    async fn test_import_key_from_url() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let keyring = dir.path().join("keyrings");
        let state = dir.path().join("state");
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/archive-key.asc")
            .with_status(200)
            .with_body(ARMORED)
            .create_async()
            .await;

        let runtime = RealRuntime;
        let mut runner = MockCommandRunner::new();
        show_keys_returns(&mut runner, KALI_FPR);
        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(&runtime, &runner, http, keyring.clone(), state)
            .retry_policy(fast());

        // --- Execute ---
        let desc = url_descriptor(
            "kali",
            format!("{}/archive-key.asc", server.url()),
            Some("827c 8569 f251 8cc6 77fe ca1a ed65 462e c8d5 e4c5"),
        );
        let key = store.import_key(&desc).await.unwrap().unwrap();

        // --- Verify ---
        assert_eq!(key.fingerprint, KALI_FPR);
        assert!(key.imported);
        assert_eq!(key.path, keyring.join(format!("tooldeck-{}.asc", KALI_FPR)));
        assert_eq!(std::fs::read_to_string(&key.path).unwrap(), ARMORED);
        assert_eq!(
            store.references().unwrap().get(KALI_FPR),
            Some(&vec!["kali".to_string()])
        );
        // No scratch files left behind
        assert_eq!(std::fs::read_dir(&keyring).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_import_key_without_source_is_noop() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let runner = MockCommandRunner::new();
        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(
            &runtime,
            &runner,
            http,
            dir.path().join("k"),
            dir.path().join("s"),
        );

        let desc = RepositoryDescriptor::new("plain", "http://example.com", "stable", &["main"]);
        assert!(store.import_key(&desc).await.unwrap().is_none());
        assert!(!dir.path().join("k").exists());
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let keyring = dir.path().join("keyrings");
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/key.asc")
            .with_status(200)
            .with_body(ARMORED)
            .create_async()
            .await;

        let runtime = RealRuntime;
        let mut runner = MockCommandRunner::new();
        show_keys_returns(&mut runner, "AAAABBBBCCCCDDDDEEEEFFFF0000111122223333");
        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(
            &runtime,
            &runner,
            http,
            keyring.clone(),
            dir.path().join("state"),
        );

        let desc = url_descriptor("kali", format!("{}/key.asc", server.url()), Some(KALI_FPR));
        let err = store.import_key(&desc).await.unwrap_err();

        assert!(matches!(err, KeyError::KeyImportFailed { .. }));
        assert!(err.to_string().contains("mismatch"));
        assert_eq!(std::fs::read_dir(&keyring).unwrap().count(), 0);
        assert!(store.references().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_key_url_is_fetch_failure() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.asc")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let runtime = RealRuntime;
        // gpg must never run
        let runner = MockCommandRunner::new();
        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(
            &runtime,
            &runner,
            http,
            dir.path().join("k"),
            dir.path().join("s"),
        )
        .retry_policy(fast());

        let desc = url_descriptor("kali", format!("{}/missing.asc", server.url()), None);
        let err = store.import_key(&desc).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, KeyError::KeyFetchFailed { .. }));
    }

    #[tokio::test]
    async fn test_import_key_from_keyserver_retries_recv() {
        let dir = tempdir().unwrap();
        let keyring = dir.path().join("keyrings");
        let runtime = RealRuntime;
        let mut runner = MockCommandRunner::new();

        let mut recv_calls = 0;
        runner
            .expect_run()
            .withf(|_, args, _| args.iter().any(|a| a == "--recv-keys"))
            .times(2)
            .returning(move |_, args, _| {
                assert!(args.iter().any(|a| a == "keyserver.ubuntu.com"));
                recv_calls += 1;
                if recv_calls == 1 {
                    Ok(CommandOutput::new(2, "", "keyserver receive failed"))
                } else {
                    Ok(CommandOutput::new(0, "", ""))
                }
            });
        runner
            .expect_run()
            .withf(|_, args, _| args.iter().any(|a| a == "--export"))
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::new(0, ARMORED, "")));
        show_keys_returns(&mut runner, KALI_FPR);

        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(
            &runtime,
            &runner,
            http,
            keyring.clone(),
            dir.path().join("state"),
        )
        .retry_policy(fast());

        let desc = RepositoryDescriptor::new("kali", "http://http.kali.org/kali", "kali-rolling", &["main"])
            .with_key(KeySource::Keyserver {
                key_id: "ED65462EC8D5E4C5".to_string(),
                keyserver: "keyserver.ubuntu.com".to_string(),
                fingerprint: None,
            });
        let key = store.import_key(&desc).await.unwrap().unwrap();

        assert_eq!(key.fingerprint, KALI_FPR);
        assert!(matches!(key.origin, KeyOrigin::Keyserver { .. }));
        assert!(key.path.exists());
    }

    #[tokio::test]
    async fn test_invalid_key_id_spawns_nothing() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let runner = MockCommandRunner::new();
        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(
            &runtime,
            &runner,
            http,
            dir.path().join("k"),
            dir.path().join("s"),
        );

        let desc = RepositoryDescriptor::new("bad", "http://example.com", "stable", &["main"])
            .with_key(KeySource::Keyserver {
                key_id: "--import".to_string(),
                keyserver: "keyserver.ubuntu.com".to_string(),
                fingerprint: None,
            });
        let err = store.import_key(&desc).await.unwrap_err();
        assert!(matches!(err, KeyError::KeyImportFailed { .. }));
    }

    #[tokio::test]
    async fn test_shared_key_removed_with_last_reference() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/key.asc")
            .with_status(200)
            .with_body(ARMORED)
            .create_async()
            .await;

        let runtime = RealRuntime;
        let mut runner = MockCommandRunner::new();
        show_keys_returns(&mut runner, KALI_FPR);
        let http = HttpClient::new(reqwest::Client::new());
        let mut store = KeyStore::new(
            &runtime,
            &runner,
            http,
            dir.path().join("keyrings"),
            dir.path().join("state"),
        );

        let url = format!("{}/key.asc", server.url());
        let first = store
            .import_key(&url_descriptor("kali", url.clone(), None))
            .await
            .unwrap()
            .unwrap();
        store
            .import_key(&url_descriptor("kali-mirror", url, None))
            .await
            .unwrap();

        assert!(store.release_key("kali").unwrap().is_empty());
        assert!(first.path.exists());

        let removed = store.release_key("kali-mirror").unwrap();
        assert_eq!(removed, vec![first.path.clone()]);
        assert!(!first.path.exists());
        assert!(store.references().unwrap().is_empty());

        // Releasing an unknown name is harmless
        assert!(store.release_key("unknown").unwrap().is_empty());
    }
}
