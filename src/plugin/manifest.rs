use std::collections::BTreeMap;

use serde::Deserialize;

use crate::category::{Category, CategoryId};
use crate::source::{DEFAULT_KEYSERVER, KeySource, RepositoryDescriptor};

use super::{Plugin, PluginLoadError};

/// On-disk plugin description.
///
/// ```toml
/// name = "example"
/// description = "Extra tools"
///
/// [categories.100]
/// name = "custom_tools"
/// tools = ["custom-tool1", "custom-tool2"]
///
/// [[repositories]]
/// name = "Example Repository"
/// url = "http://example.com/repo"
/// distribution = "stable"
/// components = ["main"]
/// key_url = "http://example.com/key.gpg"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, CategorySpec>,
    #[serde(default)]
    pub repositories: Vec<RepositorySpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySpec {
    pub name: String,
    pub url: String,
    pub distribution: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub key_url: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub keyserver: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl TryFrom<RepositorySpec> for RepositoryDescriptor {
    type Error = String;

    fn try_from(spec: RepositorySpec) -> Result<Self, Self::Error> {
        let key_source = match (spec.key_url, spec.key_id) {
            (Some(_), Some(_)) => return Err("key_url and key_id are mutually exclusive".to_string()),
            (Some(url), None) => KeySource::Url {
                url,
                fingerprint: spec.fingerprint,
            },
            (None, Some(key_id)) => KeySource::Keyserver {
                key_id,
                keyserver: spec
                    .keyserver
                    .unwrap_or_else(|| DEFAULT_KEYSERVER.to_string()),
                fingerprint: spec.fingerprint,
            },
            (None, None) => KeySource::None,
        };

        let desc = RepositoryDescriptor {
            name: spec.name,
            url: spec.url,
            distribution: spec.distribution,
            components: spec.components,
            key_source,
        };
        desc.validate()?;
        Ok(desc)
    }
}

/// A [`Plugin`] backed by a TOML manifest.
#[derive(Debug, Clone)]
pub struct ManifestPlugin {
    name: String,
    description: Option<String>,
    categories: Vec<Category>,
    repositories: Vec<RepositoryDescriptor>,
}

impl ManifestPlugin {
    pub fn from_toml(content: &str) -> Result<Self, PluginLoadError> {
        let manifest: PluginManifest =
            toml::from_str(content).map_err(|e| PluginLoadError::Parse(e.to_string()))?;

        let name = manifest
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(PluginLoadError::MissingName)?;

        let mut categories = Vec::with_capacity(manifest.categories.len());
        for (key, spec) in manifest.categories {
            let id: CategoryId = key
                .trim()
                .parse()
                .map_err(|_| PluginLoadError::InvalidCategoryKey(key.clone()))?;
            categories.push(Category::new(id, spec.name, spec.tools));
        }

        let repositories = manifest
            .repositories
            .into_iter()
            .map(|spec| {
                let repo = spec.name.clone();
                RepositoryDescriptor::try_from(spec)
                    .map_err(|reason| PluginLoadError::InvalidRepository { name: repo, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            description: manifest.description,
            categories,
            repositories,
        })
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl Plugin for ManifestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn categories(&self) -> Vec<Category> {
        self.categories.clone()
    }

    fn repositories(&self) -> Vec<RepositoryDescriptor> {
        self.repositories.clone()
    }
}
