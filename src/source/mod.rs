//! Package source model.
//!
//! A [`RepositoryDescriptor`] describes a third-party APT repository and how
//! its signing key is obtained. A [`SourceEntry`] is the on-disk stanza that
//! the repository manager derives from it.

mod file;

use std::fmt;
use std::path::PathBuf;

use crate::keystore::normalize_fingerprint;

pub use file::{SourceParseError, parse_sources, serialize_sources};

/// Default keyserver used when a key ID is given without one.
pub const DEFAULT_KEYSERVER: &str = "keyserver.ubuntu.com";

/// Where the signing key of a repository comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeySource {
    #[default]
    None,
    /// Armored or binary key published at a URL.
    Url {
        url: String,
        fingerprint: Option<String>,
    },
    /// Key fetched from a keyserver by ID.
    Keyserver {
        key_id: String,
        keyserver: String,
        fingerprint: Option<String>,
    },
}

impl KeySource {
    /// Expected fingerprint pinned by the descriptor, if any.
    pub fn expected_fingerprint(&self) -> Option<&str> {
        match self {
            KeySource::None => None,
            KeySource::Url { fingerprint, .. } | KeySource::Keyserver { fingerprint, .. } => {
                fingerprint.as_deref()
            }
        }
    }

    /// Same source with the pinned fingerprint in its compact upper-case form.
    pub fn normalized(&self) -> KeySource {
        let compact = |fpr: &Option<String>| fpr.as_deref().map(normalize_fingerprint);
        match self {
            KeySource::None => KeySource::None,
            KeySource::Url { url, fingerprint } => KeySource::Url {
                url: url.clone(),
                fingerprint: compact(fingerprint),
            },
            KeySource::Keyserver {
                key_id,
                keyserver,
                fingerprint,
            } => KeySource::Keyserver {
                key_id: key_id.clone(),
                keyserver: keyserver.clone(),
                fingerprint: compact(fingerprint),
            },
        }
    }

    fn validate(&self) -> Result<(), String> {
        let (fields, fingerprint) = match self {
            KeySource::None => return Ok(()),
            KeySource::Url { url, fingerprint } => (vec![("key url", url)], fingerprint),
            KeySource::Keyserver {
                key_id,
                keyserver,
                fingerprint,
            } => (vec![("key id", key_id), ("keyserver", keyserver)], fingerprint),
        };
        for (field, value) in fields {
            if value.is_empty() {
                return Err(format!("{} is empty", field));
            }
            if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(format!("{} {:?} contains whitespace", field, value));
            }
        }
        if let Some(fpr) = fingerprint {
            if fpr.chars().any(char::is_control) {
                return Err(format!("fingerprint {:?} contains control characters", fpr));
            }
            if normalize_fingerprint(fpr).is_empty() {
                return Err("fingerprint is empty".to_string());
            }
        }
        Ok(())
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::None => write!(f, "none"),
            KeySource::Url { url, .. } => write!(f, "{}", url),
            KeySource::Keyserver {
                key_id, keyserver, ..
            } => write!(f, "{} via {}", key_id, keyserver),
        }
    }
}

/// A third-party package repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub name: String,
    pub url: String,
    pub distribution: String,
    pub components: Vec<String>,
    pub key_source: KeySource,
}

impl RepositoryDescriptor {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        distribution: impl Into<String>,
        components: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            distribution: distribution.into(),
            components: components.iter().map(|c| c.to_string()).collect(),
            key_source: KeySource::None,
        }
    }

    pub fn with_key(mut self, key_source: KeySource) -> Self {
        self.key_source = key_source;
        self
    }

    /// Checks the invariants an enabled entry must satisfy before it can be written.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("repository name is empty".to_string());
        }
        if self.name.chars().any(|c| c.is_control()) {
            return Err(format!("repository name {:?} contains control characters", self.name));
        }
        if self.name.trim() != self.name {
            return Err(format!(
                "repository name {:?} has leading or trailing whitespace",
                self.name
            ));
        }
        for (field, value) in [("url", &self.url), ("distribution", &self.distribution)] {
            if value.is_empty() {
                return Err(format!("{} is empty", field));
            }
            if value.chars().any(char::is_whitespace) {
                return Err(format!("{} {:?} contains whitespace", field, value));
            }
        }
        if self.components.is_empty() {
            return Err("at least one component is required".to_string());
        }
        if let Some(bad) = self
            .components
            .iter()
            .find(|c| c.is_empty() || c.chars().any(char::is_whitespace))
        {
            return Err(format!("invalid component {:?}", bad));
        }
        self.key_source.validate()
    }

    /// File-name friendly form of the repository name.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// One stanza of the managed sources file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub descriptor: RepositoryDescriptor,
    pub enabled: bool,
    pub types: Vec<String>,
    /// Keyring the entry is restricted to.
    pub signed_by: Option<PathBuf>,
    /// Fields this crate does not interpret, kept verbatim across rewrites.
    pub extra: Vec<(String, String)>,
}

impl SourceEntry {
    pub fn new(descriptor: RepositoryDescriptor) -> Self {
        Self {
            descriptor,
            enabled: true,
            types: vec!["deb".to_string()],
            signed_by: None,
            extra: Vec::new(),
        }
    }

    pub fn signed_by(mut self, keyring: Option<PathBuf>) -> Self {
        self.signed_by = keyring;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

pub(crate) fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kali() -> RepositoryDescriptor {
        RepositoryDescriptor::new(
            "kali",
            "http://http.kali.org/kali",
            "kali-rolling",
            &["main", "contrib", "non-free"],
        )
    }

    #[test]
    fn test_validate_accepts_well_formed_descriptor() {
        assert!(kali().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut desc = kali();
        desc.url.clear();
        assert!(desc.validate().unwrap_err().contains("url"));

        let mut desc = kali();
        desc.distribution.clear();
        assert!(desc.validate().unwrap_err().contains("distribution"));

        let mut desc = kali();
        desc.components.clear();
        assert!(desc.validate().unwrap_err().contains("component"));

        let mut desc = kali();
        desc.name = "  ".to_string();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_injected_newlines() {
        let mut desc = kali();
        desc.url = "http://example.com\nEnabled: no".to_string();
        assert!(desc.validate().is_err());

        let mut desc = kali();
        desc.name = "evil\nURIs: http://x".to_string();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_padded_name() {
        let mut desc = kali();
        desc.name = " padded".to_string();
        assert!(desc.validate().unwrap_err().contains("whitespace"));

        desc.name = "padded ".to_string();
        assert!(desc.validate().is_err());

        desc.name = "Kali Rolling".to_string();
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_validate_checks_key_source_fields() {
        let url_key = |url: &str, fingerprint: Option<&str>| {
            kali().with_key(KeySource::Url {
                url: url.to_string(),
                fingerprint: fingerprint.map(String::from),
            })
        };
        assert!(url_key("https://archive.kali.org/archive-key.asc", None).validate().is_ok());
        assert!(
            url_key("https://archive.kali.org/archive-key.asc", Some("827C 8569 F251 8CC6 77FE CA1A ED65 462E C8D5 E4C5"))
                .validate()
                .is_ok()
        );
        assert!(url_key("https://example.com/a key.asc", None).validate().is_err());
        assert!(url_key("", None).validate().is_err());
        assert!(
            url_key("https://example.com/key.asc", Some("827C8569F2518CC677FE\nCA1AED65462EC8D5E4C5"))
                .validate()
                .unwrap_err()
                .contains("control")
        );

        let keyserver_key = |key_id: &str, keyserver: &str| {
            kali().with_key(KeySource::Keyserver {
                key_id: key_id.to_string(),
                keyserver: keyserver.to_string(),
                fingerprint: None,
            })
        };
        assert!(keyserver_key("ED65462EC8D5E4C5", DEFAULT_KEYSERVER).validate().is_ok());
        assert!(keyserver_key("ED65462EC8D5E4C5\nEnabled: no", DEFAULT_KEYSERVER).validate().is_err());
        assert!(keyserver_key("ED65462EC8D5E4C5", "keys.example.org\tx").validate().is_err());
    }

    #[test]
    fn test_normalized_compacts_fingerprint() {
        let source = KeySource::Keyserver {
            key_id: "ED65462EC8D5E4C5".to_string(),
            keyserver: DEFAULT_KEYSERVER.to_string(),
            fingerprint: Some("827c 8569 f251 8cc6 77fe  ca1a ed65 462e c8d5 e4c5".to_string()),
        };
        assert_eq!(
            source.normalized().expected_fingerprint(),
            Some("827C8569F2518CC677FECA1AED65462EC8D5E4C5")
        );
        assert_eq!(KeySource::None.normalized(), KeySource::None);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slugify("Example Repository"), "example-repository");
        assert_eq!(slugify("  Kali / Rolling "), "kali-rolling");
    }

    #[test]
    fn test_expected_fingerprint() {
        let source = KeySource::Url {
            url: "https://example.com/key.asc".to_string(),
            fingerprint: Some("ABCD".to_string()),
        };
        assert_eq!(source.expected_fingerprint(), Some("ABCD"));
        assert_eq!(KeySource::None.expected_fingerprint(), None);
    }
}
