use anyhow::Result;
use log::debug;

use crate::category::{RegistryError, Selection};
use crate::config::Config;
use crate::runtime::Runtime;

use super::load_catalog;

/// List every category with its tool count.
#[tracing::instrument(skip(runtime, config))]
pub fn categories<R: Runtime>(runtime: &R, config: &Config) -> Result<()> {
    let (registry, plugins) = load_catalog(runtime, config);
    debug!(
        "{} categories, {} plugins",
        registry.len(),
        plugins.iter().filter(|p| p.is_loaded()).count()
    );

    println!("{:>4}  All", 0);
    for category in registry.all() {
        println!(
            "{:>4}  {} ({} tools)",
            category.id,
            category.display_name,
            category.tools.len()
        );
    }
    Ok(())
}

/// List the tools of the selected categories.
#[tracing::instrument(skip(runtime, config))]
pub fn tools<R: Runtime>(runtime: &R, config: &Config, selection: &str) -> Result<()> {
    let selection: Selection = selection.parse()?;
    let (registry, _) = load_catalog(runtime, config);

    let selected = match &selection {
        Selection::All => registry.all(),
        Selection::Ids(ids) => ids
            .iter()
            .map(|id| registry.get(*id).ok_or(RegistryError::UnknownCategory(*id)))
            .collect::<Result<Vec<_>, _>>()?,
    };

    for category in selected {
        println!("{} [{}]", category.display_name, category.id);
        for tool in &category.tools {
            println!("  {}", tool);
        }
    }
    Ok(())
}
