//! deb822 reader/writer for the managed sources file.

use std::path::PathBuf;
use thiserror::Error;

use super::{DEFAULT_KEYSERVER, KeySource, RepositoryDescriptor, SourceEntry};

const HEADER: &str = "# Managed by tooldeck. Use `tooldeck repo` to add or remove entries.\n";

const NAME: &str = "x-repository-name";
const ENABLED: &str = "enabled";
const TYPES: &str = "types";
const URIS: &str = "uris";
const SUITES: &str = "suites";
const COMPONENTS: &str = "components";
const SIGNED_BY: &str = "signed-by";
const KEY_URL: &str = "x-key-url";
const KEY_ID: &str = "x-key-id";
const KEYSERVER: &str = "x-keyserver";
const KEY_FINGERPRINT: &str = "x-key-fingerprint";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceParseError {
    #[error("line {line}: expected `Field: value`, found {content:?}")]
    MalformedLine { line: usize, content: String },
    #[error("line {line}: continuation line without a preceding field")]
    DanglingContinuation { line: usize },
    #[error("stanza starting at line {line} is missing required field {field}")]
    MissingField { line: usize, field: &'static str },
}

struct Stanza {
    line: usize,
    fields: Vec<(String, String)>,
}

impl Stanza {
    fn take(&mut self, key: &str) -> Option<String> {
        let index = self
            .fields
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.fields.remove(index).1)
    }

    fn require(&mut self, key: &'static str, label: &'static str) -> Result<String, SourceParseError> {
        self.take(key).ok_or(SourceParseError::MissingField {
            line: self.line,
            field: label,
        })
    }
}

/// Parses the managed sources file into entries, in file order.
pub fn parse_sources(content: &str) -> Result<Vec<SourceEntry>, SourceParseError> {
    let mut stanzas = Vec::new();
    let mut current: Option<Stanza> = None;

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;

        if raw.trim().is_empty() {
            if let Some(stanza) = current.take() {
                stanzas.push(stanza);
            }
            continue;
        }
        if raw.starts_with('#') {
            continue;
        }

        if raw.starts_with(' ') || raw.starts_with('\t') {
            let last = current
                .as_mut()
                .and_then(|s| s.fields.last_mut())
                .ok_or(SourceParseError::DanglingContinuation { line })?;
            let value = raw.trim();
            if !value.is_empty() && value != "." {
                if !last.1.is_empty() {
                    last.1.push(' ');
                }
                last.1.push_str(value);
            }
            continue;
        }

        let (key, value) = raw
            .split_once(':')
            .ok_or_else(|| SourceParseError::MalformedLine {
                line,
                content: raw.to_string(),
            })?;

        current
            .get_or_insert_with(|| Stanza {
                line,
                fields: Vec::new(),
            })
            .fields
            .push((key.trim().to_string(), value.trim().to_string()));
    }

    if let Some(stanza) = current.take() {
        stanzas.push(stanza);
    }

    stanzas.into_iter().map(entry_from_stanza).collect()
}

fn entry_from_stanza(mut stanza: Stanza) -> Result<SourceEntry, SourceParseError> {
    let url = stanza.require(URIS, "URIs")?;
    let distribution = stanza.require(SUITES, "Suites")?;
    let name = stanza.take(NAME).unwrap_or_else(|| url.clone());
    let components = stanza
        .take(COMPONENTS)
        .map(|c| c.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
    let enabled = stanza
        .take(ENABLED)
        .is_none_or(|v| !v.eq_ignore_ascii_case("no"));
    let types = stanza
        .take(TYPES)
        .map(|t| t.split_whitespace().map(String::from).collect())
        .unwrap_or_else(|| vec!["deb".to_string()]);
    let signed_by = stanza.take(SIGNED_BY).map(PathBuf::from);

    let fingerprint = stanza.take(KEY_FINGERPRINT);
    let key_url = stanza.take(KEY_URL);
    let key_id = stanza.take(KEY_ID);
    let keyserver = stanza.take(KEYSERVER);
    let key_source = match (key_url, key_id) {
        (Some(url), _) => KeySource::Url { url, fingerprint },
        (None, Some(key_id)) => KeySource::Keyserver {
            key_id,
            keyserver: keyserver.unwrap_or_else(|| DEFAULT_KEYSERVER.to_string()),
            fingerprint,
        },
        (None, None) => KeySource::None,
    };

    Ok(SourceEntry {
        descriptor: RepositoryDescriptor {
            name,
            url,
            distribution,
            components,
            key_source,
        },
        enabled,
        types,
        signed_by,
        extra: stanza.fields,
    })
}

/// Renders entries as a deb822 sources file.
pub fn serialize_sources(entries: &[SourceEntry]) -> String {
    let stanzas: Vec<String> = entries.iter().map(serialize_entry).collect();
    let mut out = String::from(HEADER);
    if !stanzas.is_empty() {
        out.push('\n');
        out.push_str(&stanzas.join("\n"));
    }
    out
}

fn serialize_entry(entry: &SourceEntry) -> String {
    let desc = &entry.descriptor;
    let mut out = String::new();
    let mut field = |key: &str, value: &str| {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    };

    field("X-Repository-Name", &desc.name);
    field("Enabled", if entry.enabled { "yes" } else { "no" });
    field("Types", &entry.types.join(" "));
    field("URIs", &desc.url);
    field("Suites", &desc.distribution);
    if !desc.components.is_empty() {
        field("Components", &desc.components.join(" "));
    }
    if let Some(keyring) = &entry.signed_by {
        field("Signed-By", &keyring.to_string_lossy());
    }
    match &desc.key_source {
        KeySource::None => {}
        KeySource::Url { url, fingerprint } => {
            field("X-Key-Url", url);
            if let Some(fpr) = fingerprint {
                field("X-Key-Fingerprint", fpr);
            }
        }
        KeySource::Keyserver {
            key_id,
            keyserver,
            fingerprint,
        } => {
            field("X-Key-Id", key_id);
            field("X-Keyserver", keyserver);
            if let Some(fpr) = fingerprint {
                field("X-Key-Fingerprint", fpr);
            }
        }
    }
    for (key, value) in &entry.extra {
        field(key, value);
    }
    out
}
