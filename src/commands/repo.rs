use anyhow::{Result, anyhow, bail};
use log::warn;

use crate::config::Config;
use crate::history::InstallHistory;
use crate::http::HttpClient;
use crate::keystore::KeyStore;
use crate::plugin::RepositorySpec;
use crate::repository::{RepositoryManager, default_repository};
use crate::runtime::{CommandRunner, Runtime};
use crate::source::RepositoryDescriptor;

use super::load_catalog;

/// Arguments of `repo add`. Without a URL the name picks one of the known
/// repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoAddRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub distribution: Option<String>,
    pub components: Vec<String>,
    pub key_url: Option<String>,
    pub key_id: Option<String>,
    pub keyserver: Option<String>,
    pub fingerprint: Option<String>,
    pub refresh: bool,
}

/// The built-in default followed by plugin-provided repositories.
fn available<R: Runtime>(runtime: &R, config: &Config) -> Vec<RepositoryDescriptor> {
    let (_, plugins) = load_catalog(runtime, config);
    std::iter::once(default_repository())
        .chain(plugins.into_iter().flat_map(|p| p.repositories))
        .collect()
}

fn descriptor<R: Runtime>(
    runtime: &R,
    config: &Config,
    request: &RepoAddRequest,
) -> Result<RepositoryDescriptor> {
    let Some(url) = &request.url else {
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| default_repository().name);
        let known = available(runtime, config);
        return known
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(&name) || d.slug() == name)
            .cloned()
            .ok_or_else(|| {
                let names: Vec<&str> = known.iter().map(|d| d.name.as_str()).collect();
                anyhow!(
                    "Unknown repository {:?}; available: {}",
                    name,
                    names.join(", ")
                )
            });
    };

    let (Some(name), Some(distribution)) = (&request.name, &request.distribution) else {
        bail!("A repository added by URL needs a name and --distribution");
    };
    let spec = RepositorySpec {
        name: name.clone(),
        url: url.clone(),
        distribution: distribution.clone(),
        components: request.components.clone(),
        key_url: request.key_url.clone(),
        key_id: request.key_id.clone(),
        keyserver: Some(
            request
                .keyserver
                .clone()
                .unwrap_or_else(|| config.default_keyserver.clone()),
        ),
        fingerprint: request.fingerprint.clone(),
    };
    RepositoryDescriptor::try_from(spec).map_err(|reason| anyhow!("Invalid repository: {}", reason))
}

fn build_manager<'a, R: Runtime>(
    runtime: &'a R,
    runner: &'a dyn CommandRunner,
    config: &Config,
    history: &'a InstallHistory<'a, R>,
) -> Result<RepositoryManager<'a, R>> {
    let http = HttpClient::with_timeout(config.key_timeout())?;
    let keys = KeyStore::new(
        runtime,
        runner,
        http,
        config.keyring_dir.clone(),
        config.state_dir.clone(),
    )
    .key_timeout(config.key_timeout());

    Ok(RepositoryManager::new(
        runtime,
        runner,
        keys,
        config.sources_file.clone(),
        config.backup_dir.clone(),
    )
    .with_history(history)
    .retention(config.backup_retention)
    .command_timeout(config.command_timeout()))
}

#[tracing::instrument(skip(runtime, runner, config))]
pub async fn repo_add<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    request: &RepoAddRequest,
) -> Result<()> {
    let desc = descriptor(runtime, config, request)?;
    if !runtime.is_privileged() {
        warn!(
            "Not running as root; writing {} will probably fail",
            config.sources_file.display()
        );
    }

    let history = InstallHistory::new(runtime, &config.state_dir);
    let mut manager = build_manager(runtime, runner, config, &history)?;
    let entry = manager.add_repository(&desc).await?;

    println!("Added repository {} ({})", entry.name(), desc.url);
    if let Some(keyring) = &entry.signed_by {
        println!("Signed by {}", keyring.display());
    }
    if request.refresh {
        manager.update_index().await?;
        println!("Package index refreshed.");
    }
    Ok(())
}

#[tracing::instrument(skip(runtime, runner, config))]
pub fn repo_remove<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
    name: &str,
) -> Result<()> {
    let history = InstallHistory::new(runtime, &config.state_dir);
    let mut manager = build_manager(runtime, runner, config, &history)?;
    manager.remove_repository(name)?;
    println!("Removed repository {}", name);
    Ok(())
}

/// Print the repositories in the managed sources file.
#[tracing::instrument(skip(runtime, runner, config))]
pub fn repo_list<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<()> {
    let history = InstallHistory::new(runtime, &config.state_dir);
    let manager = build_manager(runtime, runner, config, &history)?;
    let entries = manager.list_entries()?;
    if entries.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }

    for entry in entries {
        let desc = &entry.descriptor;
        print!(
            "{}: {} {} {}",
            desc.name,
            desc.url,
            desc.distribution,
            desc.components.join(" ")
        );
        if !entry.enabled {
            print!(" (disabled)");
        }
        println!();
    }
    Ok(())
}

/// Print the repositories `repo add` knows by name.
#[tracing::instrument(skip(runtime, runner, config))]
pub fn repo_available<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<()> {
    let history = InstallHistory::new(runtime, &config.state_dir);
    let configured = build_manager(runtime, runner, config, &history)?.list_repositories()?;

    for desc in available(runtime, config) {
        let marker = if configured.iter().any(|c| c.name == desc.name) {
            " [configured]"
        } else {
            ""
        };
        println!(
            "{}: {} {} (key: {}){}",
            desc.name, desc.url, desc.distribution, desc.key_source, marker
        );
    }
    Ok(())
}

#[tracing::instrument(skip(runtime, runner, config))]
pub async fn repo_refresh<R: Runtime>(
    runtime: &R,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<()> {
    let history = InstallHistory::new(runtime, &config.state_dir);
    build_manager(runtime, runner, config, &history)?
        .update_index()
        .await?;
    println!("Package index refreshed.");
    Ok(())
}
