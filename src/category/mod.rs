//! Tool categories.
//!
//! The registry is assembled once at startup from the built-in categories and
//! the categories contributed by plugins, and is read-only afterwards.

mod builtin;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use log::warn;
use thiserror::Error;

use crate::plugin::PluginDescriptor;

pub use builtin::{RESERVED_MAX_ID, builtin_categories};

pub type CategoryId = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown category {0}")]
    UnknownCategory(CategoryId),
    #[error("invalid selection {0:?}: expected `0`, `all`, or category IDs")]
    InvalidSelection(String),
}

/// A single installable tool and the category it was listed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEntry {
    pub package_name: String,
    pub category_id: CategoryId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    /// Slug such as `information_gathering`.
    pub name: String,
    pub display_name: String,
    pub tools: Vec<String>,
}

impl Category {
    pub fn new(
        id: CategoryId,
        name: impl Into<String>,
        tools: impl IntoIterator<Item = String>,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: format_category_name(&name),
            name,
            tools: tools.into_iter().collect(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = ToolEntry> + '_ {
        self.tools.iter().map(|tool| ToolEntry {
            package_name: tool.clone(),
            category_id: self.id,
        })
    }
}

/// `information_gathering` becomes `Information Gathering`.
pub fn format_category_name(slug: &str) -> String {
    slug.split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which categories a user picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Ids(Vec<CategoryId>),
}

impl FromStr for Selection {
    type Err = RegistryError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed == "0" || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Selection::All);
        }

        let ids = trimmed
            .split([',', ' '])
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<CategoryId>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| RegistryError::InvalidSelection(input.to_string()))?;

        if ids.is_empty() {
            return Err(RegistryError::InvalidSelection(input.to_string()));
        }
        if ids.contains(&0) {
            return Ok(Selection::All);
        }
        Ok(Selection::Ids(ids))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str("all"),
            Selection::Ids(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                f.write_str(&ids.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    categories: BTreeMap<CategoryId, Category>,
}

impl CategoryRegistry {
    /// Builds the registry. Plugin categories whose ID is already taken are
    /// skipped with a warning; loader-side validation normally catches these
    /// first.
    pub fn build(builtins: Vec<Category>, plugins: &[PluginDescriptor]) -> Self {
        let mut categories = BTreeMap::new();
        for category in builtins {
            categories.insert(category.id, category);
        }

        for plugin in plugins {
            for category in &plugin.categories {
                if let Some(existing) = categories.get(&category.id) {
                    warn!(
                        "Plugin {}: category {} ({}) collides with {}, skipped",
                        plugin.name, category.id, category.name, existing.name
                    );
                    continue;
                }
                categories.insert(category.id, category.clone());
            }
        }

        Self { categories }
    }

    /// Every category, ordered by ID.
    pub fn all(&self) -> Vec<&Category> {
        self.categories.values().collect()
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// First category (by ID) listing `package`.
    pub fn category_of(&self, package: &str) -> Option<&Category> {
        self.categories
            .values()
            .find(|category| category.tools.iter().any(|tool| tool == package))
    }

    /// Flattens the selection into tool entries, keeping only the first
    /// occurrence of each package name.
    pub fn resolve(&self, selection: &Selection) -> Result<Vec<ToolEntry>, RegistryError> {
        let selected: Vec<&Category> = match selection {
            Selection::All => self.all(),
            Selection::Ids(ids) => ids
                .iter()
                .map(|id| self.get(*id).ok_or(RegistryError::UnknownCategory(*id)))
                .collect::<Result<_, _>>()?,
        };

        let mut seen = HashSet::new();
        Ok(selected
            .into_iter()
            .flat_map(Category::entries)
            .filter(|entry| seen.insert(entry.package_name.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn plugin(name: &str, categories: Vec<Category>) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            source: None,
            categories,
            repositories: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_format_category_name() {
        assert_eq!(format_category_name("information_gathering"), "Information Gathering");
        assert_eq!(format_category_name("extra"), "Extra");
        assert_eq!(format_category_name("sniffing_spoofing"), "Sniffing Spoofing");
        assert_eq!(format_category_name(""), "");
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!("0".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!("ALL".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!("1,3".parse::<Selection>().unwrap(), Selection::Ids(vec![1, 3]));
        assert_eq!("2 5, 7".parse::<Selection>().unwrap(), Selection::Ids(vec![2, 5, 7]));
        assert!(matches!(
            "web".parse::<Selection>(),
            Err(RegistryError::InvalidSelection(_))
        ));
        assert!("".parse::<Selection>().is_err());
    }

    #[test]
    fn test_all_is_sorted_by_id() {
        let registry = CategoryRegistry::build(
            builtin_categories(),
            &[plugin(
                "custom",
                vec![Category::new(100, "custom_tools", tools(&["custom-tool1"]))],
            )],
        );
        let ids: Vec<CategoryId> = registry.all().iter().map(|c| c.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(registry.len(), 15);
        assert_eq!(registry.get(100).unwrap().display_name, "Custom Tools");
    }

    #[test]
    fn test_resolve_deduplicates_in_first_seen_order() {
        let registry = CategoryRegistry::build(
            vec![
                Category::new(1, "one", tools(&["nmap", "dnsenum", "wireshark"])),
                Category::new(2, "two", tools(&["sqlmap", "nmap", "zaproxy"])),
            ],
            &[],
        );

        let names: Vec<String> = registry
            .resolve(&Selection::Ids(vec![2, 1]))
            .unwrap()
            .into_iter()
            .map(|e| e.package_name)
            .collect();
        assert_eq!(names, vec!["sqlmap", "nmap", "zaproxy", "dnsenum", "wireshark"]);

        let all = registry.resolve(&Selection::All).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].package_name, "nmap");
        assert_eq!(all[0].category_id, 1);
    }

    #[test]
    fn test_resolve_unknown_category() {
        let registry = CategoryRegistry::build(builtin_categories(), &[]);
        assert_eq!(
            registry.resolve(&Selection::Ids(vec![1, 42])),
            Err(RegistryError::UnknownCategory(42))
        );
    }

    #[test]
    fn test_colliding_plugin_category_is_skipped() {
        let registry = CategoryRegistry::build(
            builtin_categories(),
            &[
                plugin("a", vec![Category::new(200, "first", tools(&["alpha"]))]),
                plugin("b", vec![Category::new(200, "second", tools(&["beta"]))]),
            ],
        );
        assert_eq!(registry.get(200).unwrap().name, "first");
        assert_eq!(registry.len(), 15);
    }

    #[test]
    fn test_category_of() {
        let registry = CategoryRegistry::build(builtin_categories(), &[]);
        assert_eq!(registry.category_of("nmap").unwrap().id, 1);
        assert_eq!(registry.category_of("john").unwrap().name, "password_attacks");
        assert!(registry.category_of("not-a-tool").is_none());
    }
}
