//! Command implementations behind the CLI.
//!
//! Each command builds the components it needs from a [`Config`], runs one
//! operation and prints plain text to stdout. Errors bubble up to `main`.

mod catalog;
mod history;
mod packages;
mod repo;

pub use catalog::{categories, tools};
pub use history::history;
pub use packages::{PackageRequest, install, remove, status, update};
pub use repo::{RepoAddRequest, repo_add, repo_available, repo_list, repo_refresh, repo_remove};

use log::warn;

use crate::category::{CategoryRegistry, builtin_categories};
use crate::config::Config;
use crate::plugin::{PluginDescriptor, PluginLoader};
use crate::runtime::Runtime;

/// Discovers plugins and builds the category registry from them.
pub(crate) fn load_catalog<R: Runtime>(
    runtime: &R,
    config: &Config,
) -> (CategoryRegistry, Vec<PluginDescriptor>) {
    let builtins = builtin_categories();
    let plugins = PluginLoader::new(runtime, &builtins).discover(&config.plugin_dir);
    for plugin in &plugins {
        if let Some(error) = &plugin.error {
            warn!("Plugin {} was not loaded: {}", plugin.name, error);
        }
    }
    (CategoryRegistry::build(builtins, &plugins), plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use tempfile::tempdir;

    #[test]
    fn test_load_catalog_merges_plugins() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("extra.toml"),
            "name = \"extra\"\n[categories.200]\nname = \"cloud_tools\"\ntools = [\"awscli\"]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "name = [").unwrap();

        let config = Config {
            plugin_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (registry, plugins) = load_catalog(&RealRuntime, &config);

        assert_eq!(plugins.len(), 2);
        assert_eq!(registry.get(200).unwrap().display_name, "Cloud Tools");
        assert_eq!(registry.len(), builtin_categories().len() + 1);
    }
}
