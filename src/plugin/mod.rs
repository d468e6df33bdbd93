//! Plugins contribute extra categories and repositories.
//!
//! Each plugin is loaded on its own: a broken manifest is recorded on that
//! plugin's [`PluginDescriptor`] and discovery moves on. Categories are
//! checked individually, so one bad category does not drop the rest of the
//! plugin.

mod manifest;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::apt::is_valid_package_name;
use crate::category::{Category, CategoryId, RESERVED_MAX_ID};
use crate::runtime::Runtime;
use crate::source::RepositoryDescriptor;

pub use manifest::{CategorySpec, ManifestPlugin, PluginManifest, RepositorySpec};

pub const DEFAULT_PLUGIN_DIR: &str = "/etc/tooldeck/plugins";

const MANIFEST_PATTERN: &str = "*.toml";

/// What a plugin offers to tooldeck.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn categories(&self) -> Vec<Category>;

    fn repositories(&self) -> Vec<RepositoryDescriptor> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },
    #[error("invalid manifest: {0}")]
    Parse(String),
    #[error("manifest has no name")]
    MissingName,
    #[error("category key {0:?} is not an integer")]
    InvalidCategoryKey(String),
    #[error("repository {name:?} is invalid: {reason}")]
    InvalidRepository { name: String, reason: String },
}

/// Outcome of loading one plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    /// Manifest path, `None` for compiled-in plugins.
    pub source: Option<PathBuf>,
    /// Accepted categories only.
    pub categories: Vec<Category>,
    pub repositories: Vec<RepositoryDescriptor>,
    /// Categories or tools that were rejected.
    pub warnings: Vec<String>,
    pub error: Option<PluginLoadError>,
}

impl PluginDescriptor {
    fn failed(name: String, source: Option<PathBuf>, error: PluginLoadError) -> Self {
        Self {
            name,
            source,
            categories: Vec::new(),
            repositories: Vec::new(),
            warnings: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.error.is_none()
    }
}

/// Loads plugins while tracking which category IDs are taken.
pub struct PluginLoader<'a, R: Runtime> {
    runtime: &'a R,
    claimed: HashSet<CategoryId>,
}

impl<'a, R: Runtime> PluginLoader<'a, R> {
    /// `builtins` are the categories plugins may not collide with.
    pub fn new(runtime: &'a R, builtins: &[Category]) -> Self {
        Self {
            runtime,
            claimed: builtins.iter().map(|c| c.id).collect(),
        }
    }

    /// Loads every `*.toml` manifest in `dir`, in file name order. A missing
    /// directory yields no plugins.
    #[tracing::instrument(skip(self))]
    pub fn discover(&mut self, dir: &Path) -> Vec<PluginDescriptor> {
        if !self.runtime.is_dir(dir) {
            debug!("Plugin directory {} does not exist", dir.display());
            return Vec::new();
        }

        let mut manifests = match self.runtime.read_dir(dir) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Failed to list plugins in {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        let pattern = match glob::Pattern::new(MANIFEST_PATTERN) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("Invalid manifest pattern: {}", e);
                return Vec::new();
            }
        };
        manifests.retain(|path| {
            path.file_name()
                .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
                && !self.runtime.is_dir(path)
        });
        manifests.sort();

        manifests
            .into_iter()
            .map(|path| self.load_manifest(path))
            .collect()
    }

    fn load_manifest(&mut self, path: PathBuf) -> PluginDescriptor {
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let loaded = self
            .runtime
            .read_to_string(&path)
            .map_err(|e| PluginLoadError::Read {
                path: path.clone(),
                reason: format!("{:#}", e),
            })
            .and_then(|content| ManifestPlugin::from_toml(&content));

        match loaded {
            Ok(plugin) => self.load(&plugin, Some(path)),
            Err(e) => {
                warn!("Plugin {} ({}) failed to load: {}", fallback_name, path.display(), e);
                PluginDescriptor::failed(fallback_name, Some(path), e)
            }
        }
    }

    /// Validates a plugin's categories and claims the accepted IDs.
    pub fn load(&mut self, plugin: &dyn Plugin, source: Option<PathBuf>) -> PluginDescriptor {
        let name = plugin.name().to_string();
        let mut warnings = Vec::new();
        let mut categories = Vec::new();

        for mut category in plugin.categories() {
            if let Err(reason) = self.check_category(&mut category, &mut warnings) {
                let message = format!("category {} ({}) rejected: {}", category.id, category.name, reason);
                warn!("Plugin {}: {}", name, message);
                warnings.push(message);
                continue;
            }
            self.claimed.insert(category.id);
            categories.push(category);
        }

        let mut repositories = plugin.repositories();
        repositories.retain(|repo| match repo.validate() {
            Ok(()) => true,
            Err(reason) => {
                let message = format!("repository {:?} rejected: {}", repo.name, reason);
                warn!("Plugin {}: {}", name, message);
                warnings.push(message);
                false
            }
        });

        info!(
            "Loaded plugin {} with {} categories",
            name,
            categories.len()
        );
        PluginDescriptor {
            name,
            source,
            categories,
            repositories,
            warnings,
            error: None,
        }
    }

    fn check_category(
        &self,
        category: &mut Category,
        warnings: &mut Vec<String>,
    ) -> Result<(), String> {
        if category.id <= RESERVED_MAX_ID {
            return Err(format!("IDs 1-{} are reserved", RESERVED_MAX_ID));
        }
        if self.claimed.contains(&category.id) {
            return Err("ID already in use".to_string());
        }
        if category.name.trim().is_empty() {
            return Err("name is empty".to_string());
        }

        let id = category.id;
        category.tools.retain(|tool| {
            let valid = is_valid_package_name(tool);
            if !valid {
                warnings.push(format!(
                    "category {}: tool {:?} is not a valid package name",
                    id, tool
                ));
            }
            valid
        });
        if category.tools.is_empty() {
            return Err("no tools".to_string());
        }
        Ok(())
    }
}
