//! Configuration document loading.
//!
//! Files are parsed as JSON first and YAML second; YAML accepts every JSON
//! document, so the two formats are interchangeable. A file matching
//! neither format is rejected with [`ConfigError::NotParsable`]; for domain
//! directories the rejection covers only that file, other files still load.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, warn};

use super::{Doc, GlobalConfig, CONF_EXTENSION};
use crate::error::ConfigError;

/// One raw domain-group entry as read from a configuration file: the
/// domain-group key and its ordered override document list.
#[derive(Debug, Clone)]
pub struct RawDomainEntry {
    /// File the entry was read from.
    pub source: PathBuf,
    /// Space-joined domain names (the mapping key).
    pub domains: String,
    /// Ordered override documents; first match wins per field.
    pub overrides: Vec<Doc>,
}

/// Parse file contents as JSON, falling back to YAML.
fn parse_document(path: &Path, contents: &str) -> Result<Value, ConfigError> {
    let json_error = match serde_json::from_str::<Value>(contents) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };
    match serde_yaml::from_str::<Value>(contents) {
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::NotParsable {
            path: path.to_path_buf(),
            json_error,
            yaml_error: e.to_string(),
        }),
    }
}

/// Load the global configuration document.
///
/// An absent file yields an empty configuration; a present but unparsable
/// file is an error.
pub fn load_global(path: &Path) -> Result<GlobalConfig, ConfigError> {
    if !path.is_file() {
        debug!(path = %path.display(), "No global configuration file, using empty defaults");
        return Ok(GlobalConfig::empty());
    }
    let contents = fs::read_to_string(path)?;
    match parse_document(path, &contents)? {
        Value::Object(map) => Ok(GlobalConfig::from_doc(map)),
        Value::Null => Ok(GlobalConfig::empty()),
        other => Err(ConfigError::Structure {
            entry: path.display().to_string(),
            reason: format!("expected a mapping, found {}", value_kind(&other)),
        }),
    }
}

/// Enumerate and parse domain-group configuration files in a directory.
///
/// Only files with the configured extension are considered, and the file
/// equal to `exclude` (the global configuration) is skipped. A file that
/// fails to parse is reported and skipped; its domain set is not acted
/// upon, but remaining files still load.
pub fn load_domain_entries(dir: &Path, exclude: &Path) -> Result<Vec<RawDomainEntry>, ConfigError> {
    let mut entries = Vec::new();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "Domain configuration directory does not exist");
        return Ok(entries);
    }

    let exclude = canonical_or_self(exclude);
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CONF_EXTENSION))
        })
        .collect();
    // Deterministic enumeration order across runs.
    files.sort();

    for path in files {
        if canonical_or_self(&path) == exclude {
            debug!(path = %path.display(), "Skipping global configuration file");
            continue;
        }
        match load_domain_file(&path) {
            Ok(mut file_entries) => entries.append(&mut file_entries),
            Err(e) => {
                // One broken file must not prevent other domain groups
                // from loading.
                error!(path = %path.display(), error = %e, "Skipping unparsable domain configuration file");
            }
        }
    }
    Ok(entries)
}

/// Parse one domain configuration file into its entries.
fn load_domain_file(path: &Path) -> Result<Vec<RawDomainEntry>, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let doc = parse_document(path, &contents)?;
    let map = match doc {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(ConfigError::Structure {
                entry: path.display().to_string(),
                reason: format!("expected a mapping of domain groups, found {}", value_kind(&other)),
            })
        }
    };

    let mut entries = Vec::new();
    for (domains, overrides) in map {
        match parse_overrides(&domains, overrides) {
            Ok(overrides) => entries.push(RawDomainEntry {
                source: path.to_path_buf(),
                domains,
                overrides,
            }),
            Err(e) => {
                // Entry-level isolation: the other groups in this file
                // are still usable.
                warn!(path = %path.display(), entry = %domains, error = %e, "Skipping malformed domain group entry");
            }
        }
    }
    Ok(entries)
}

/// Normalize an entry's override value into an ordered document list.
fn parse_overrides(entry: &str, value: Value) -> Result<Vec<Doc>, ConfigError> {
    match value {
        // A bare key with no overrides is valid (all defaults).
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(ConfigError::Structure {
                    entry: entry.to_string(),
                    reason: format!("override documents must be mappings, found {}", value_kind(&other)),
                }),
            })
            .collect(),
        other => Err(ConfigError::Structure {
            entry: entry.to_string(),
            reason: format!("expected a list of override documents, found {}", value_kind(&other)),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
