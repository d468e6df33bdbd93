//! Helpers for talking to gpg and normalizing key identifiers.

use std::path::Path;

/// Strips spaces and an optional `0x` prefix, upper-casing the rest.
pub fn normalize_fingerprint(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    compact.to_ascii_uppercase()
}

fn is_hex_of_len(value: &str, lengths: &[usize]) -> bool {
    lengths.contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// A v4 (40 hex) or v5 (64 hex) fingerprint.
pub fn is_valid_fingerprint(fpr: &str) -> bool {
    is_hex_of_len(fpr, &[40, 64])
}

/// Short, long, or full-fingerprint key ID, with optional `0x`.
pub fn is_valid_key_id(key_id: &str) -> bool {
    is_hex_of_len(&normalize_fingerprint(key_id), &[8, 16, 40])
}

/// First `fpr` record of `gpg --with-colons` output: the primary key.
pub fn primary_fingerprint(colons: &str) -> Option<String> {
    colons
        .lines()
        .find(|line| line.starts_with("fpr:"))
        .and_then(|line| line.split(':').nth(9))
        .map(normalize_fingerprint)
        .filter(|fpr| !fpr.is_empty())
}

pub fn is_armored(material: &[u8]) -> bool {
    material
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .is_some_and(|start| material[start..].starts_with(b"-----BEGIN PGP"))
}

pub fn show_keys_args(path: &Path) -> Vec<String> {
    vec![
        "--batch".to_string(),
        "--show-keys".to_string(),
        "--with-colons".to_string(),
        "--with-fingerprint".to_string(),
        path.to_string_lossy().into_owned(),
    ]
}

pub fn recv_keys_args(homedir: &Path, keyserver: &str, key_id: &str) -> Vec<String> {
    vec![
        "--batch".to_string(),
        "--homedir".to_string(),
        homedir.to_string_lossy().into_owned(),
        "--keyserver".to_string(),
        keyserver.to_string(),
        "--recv-keys".to_string(),
        key_id.to_string(),
    ]
}

pub fn export_args(homedir: &Path, key_id: &str) -> Vec<String> {
    vec![
        "--batch".to_string(),
        "--homedir".to_string(),
        homedir.to_string_lossy().into_owned(),
        "--armor".to_string(),
        "--export".to_string(),
        key_id.to_string(),
    ]
}
