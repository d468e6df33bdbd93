//! Post-install integrity checks against `sha256sum`-style manifests.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::debug;
use sha2::{Digest, Sha256};

use crate::runtime::Runtime;

pub const MANIFEST_EXTENSION: &str = "sha256sums";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The package ships no manifest.
    NoManifest,
    /// Number of files checked.
    Verified(usize),
    Mismatch { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestLine {
    digest: String,
    path: PathBuf,
}

fn parse_manifest(content: &str) -> Result<Vec<ManifestLine>> {
    let mut lines = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((digest, path)) = line.split_once(char::is_whitespace) else {
            bail!("line {}: expected `<sha256>  <path>`", index + 1);
        };
        // sha256sum marks binary mode with a leading `*`
        let path = path.trim_start().trim_start_matches('*');
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) || path.is_empty() {
            bail!("line {}: malformed entry", index + 1);
        }
        lines.push(ManifestLine {
            digest: digest.to_ascii_lowercase(),
            path: PathBuf::from(path),
        });
    }
    Ok(lines)
}

pub struct ChecksumVerifier<'a, R: Runtime> {
    runtime: &'a R,
    manifest_dir: PathBuf,
    install_root: PathBuf,
}

impl<'a, R: Runtime> ChecksumVerifier<'a, R> {
    pub fn new(runtime: &'a R, manifest_dir: PathBuf, install_root: PathBuf) -> Self {
        Self {
            runtime,
            manifest_dir,
            install_root,
        }
    }

    pub fn manifest_path(&self, package: &str) -> PathBuf {
        self.manifest_dir
            .join(format!("{}.{}", package, MANIFEST_EXTENSION))
    }

    /// Checks every file listed in the package's manifest. The first
    /// mismatching file is reported.
    #[tracing::instrument(skip(self))]
    pub fn verify(&self, package: &str) -> Result<Verification> {
        let manifest = self.manifest_path(package);
        if !self.runtime.exists(&manifest) {
            return Ok(Verification::NoManifest);
        }
        let content = self.runtime.read_to_string(&manifest)?;
        let entries = parse_manifest(&content)
            .with_context(|| format!("Invalid checksum manifest {}", manifest.display()))?;

        for entry in &entries {
            let relative = entry.path.strip_prefix("/").unwrap_or(&entry.path);
            let path = self.install_root.join(relative);
            if !self.runtime.exists(&path) {
                return Ok(Verification::Mismatch {
                    path,
                    reason: "missing".to_string(),
                });
            }
            let actual = self.digest(&path)?;
            if actual != entry.digest {
                return Ok(Verification::Mismatch {
                    path,
                    reason: format!("expected {}, got {}", entry.digest, actual),
                });
            }
        }

        debug!("Verified {} files of {}", entries.len(), package);
        Ok(Verification::Verified(entries.len()))
    }

    fn digest(&self, path: &Path) -> Result<String> {
        let mut reader = self.runtime.open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        Ok(hex::encode(hasher.finalize()))
    }
}
