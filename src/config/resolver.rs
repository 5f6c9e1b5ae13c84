//! Domain group configuration resolution.
//!
//! Merges the three configuration layers into one fully-resolved
//! [`DomainGroupConfig`] per entry. Per scalar field the precedence is:
//! the first override document in the group's list that defines the field,
//! then the global document, then the hardcoded default. Later override
//! documents defining the same field are ignored.
//!
//! A malformed entry aborts resolution for that entry only; other entries
//! still resolve.

use std::collections::BTreeMap;
use std::path::PathBuf;

use md5::{Digest, Md5};
use serde_json::Value;
use tracing::warn;

use super::store::RawDomainEntry;
use super::translate::{apply_translation, translate_domains};
use super::{
    DeploymentTarget, Doc, DomainGroupConfig, FormatToken, GlobalConfig, HandlerConfig,
    RuntimeConfig, DEFAULT_API, DEFAULT_AUTHORITY, DEFAULT_KEY_LENGTH, DEFAULT_TTL_DAYS,
};
use crate::error::ConfigError;

/// Resolves raw domain-group entries against the global and runtime
/// configuration. Both inputs are read-only and shared across all entries.
pub struct Resolver<'a> {
    global: &'a GlobalConfig,
    runtime: &'a RuntimeConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(global: &'a GlobalConfig, runtime: &'a RuntimeConfig) -> Self {
        Self { global, runtime }
    }

    /// Resolve every entry, isolating failures per entry.
    pub fn resolve_all(&self, entries: &[RawDomainEntry]) -> Vec<DomainGroupConfig> {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.resolve_entry(entry) {
                Ok(config) => resolved.push(config),
                Err(e) => {
                    tracing::error!(
                        entry = %entry.domains,
                        source = %entry.source.display(),
                        error = %e,
                        "Skipping domain group with invalid configuration"
                    );
                }
            }
        }
        resolved
    }

    /// Resolve one raw entry into a full per-group configuration.
    pub fn resolve_entry(&self, entry: &RawDomainEntry) -> Result<DomainGroupConfig, ConfigError> {
        let configured: Vec<String> = entry
            .domains
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if configured.is_empty() {
            return Err(ConfigError::Structure {
                entry: entry.source.display().to_string(),
                reason: "domain group key contains no domains".to_string(),
            });
        }
        let overrides = &entry.overrides;

        // The identifier is a pure function of the sorted domain set, so
        // re-ordering domains in the configuration never orphans existing
        // artifact files.
        let id = group_id(&configured);

        let domain_translation = translate_domains(&configured);
        let domain_list = apply_translation(&configured, &domain_translation);
        let domains = domain_list.join(" ");

        let api = self.resolve_string(overrides, "api", Some(DEFAULT_API))?;
        let authority = self.resolve_string(overrides, "authority", Some(DEFAULT_AUTHORITY))?;
        let authority_tos_agreement = self
            .resolve_opt_string(overrides, "authority_tos_agreement")?
            .or_else(|| self.runtime.authority_tos_agreement.clone());
        let authority_contact_email =
            self.resolve_opt_string(overrides, "authority_contact_email")?;

        let account_key = self
            .resolve_opt_string(overrides, "account_key")?
            .map(PathBuf::from)
            .unwrap_or_else(|| self.runtime.work_dir.join("account.key"));

        let cert_dir = self
            .resolve_opt_string(overrides, "cert_dir")?
            .map(PathBuf::from)
            .unwrap_or_else(|| self.runtime.work_dir.clone());

        let ttl_days = self.resolve_integer(overrides, "ttl_days", DEFAULT_TTL_DAYS)?;
        let cert_revoke_superseded =
            self.resolve_bool(overrides, "cert_revoke_superseded", false)?;
        let csr_static = self.resolve_bool(overrides, "csr_static", false)?;

        // Path defaults depend on cert_dir and id, so they resolve last.
        let csr_file = self
            .resolve_opt_string(overrides, "csr_file")?
            .map(PathBuf::from)
            .unwrap_or_else(|| cert_dir.join(format!("{id}.csr")));

        if self.global.contains("server_cert") {
            warn!("Legacy configuration directive 'server_cert' used. Support will be removed in 1.0");
        }
        let cert_file = first_override(overrides, "cert_file")
            .map(|v| value_to_string(v, "cert_file"))
            .transpose()?
            .or_else(|| self.global_string("cert_file"))
            .or_else(|| self.global_string("server_cert"))
            .map(PathBuf::from)
            .unwrap_or_else(|| cert_dir.join(format!("{id}.crt")));

        if self.global.contains("server_key") {
            warn!("Legacy configuration directive 'server_key' used. Support will be removed in 1.0");
        }
        let key_file = first_override(overrides, "key_file")
            .map(|v| value_to_string(v, "key_file"))
            .transpose()?
            .or_else(|| self.global_string("key_file"))
            .or_else(|| self.global_string("server_key"))
            .map(PathBuf::from)
            .unwrap_or_else(|| cert_dir.join(format!("{id}.key")));

        let key_length = self.resolve_integer(overrides, "key_length", DEFAULT_KEY_LENGTH as i64)?;
        if key_length <= 0 {
            return Err(ConfigError::Value {
                field: "key_length".to_string(),
                reason: format!("must be positive, got {key_length}"),
            });
        }

        // CA precedence: explicit static override document > legacy global
        // static CA > per-group authority-delivered path.
        let (static_ca, ca_file) = match first_override(overrides, "ca_file") {
            Some(value) => (true, PathBuf::from(value_to_string(value, "ca_file")?)),
            None => match self.global_string("server_ca") {
                Some(path) => {
                    warn!("Legacy configuration directive 'server_ca' used. Support will be removed in 1.0");
                    (true, PathBuf::from(path))
                }
                None => (false, cert_dir.join(format!("{id}.ca"))),
            },
        };

        let actions = self.resolve_targets(overrides, &ca_file, &cert_file, &key_file)?;
        let handlers = self.resolve_handlers(overrides, &domain_list, &domain_translation);

        Ok(DomainGroupConfig {
            domains,
            domain_list,
            id,
            domain_translation,
            api,
            authority,
            authority_tos_agreement,
            authority_contact_email,
            account_key,
            cert_dir,
            ttl_days,
            cert_revoke_superseded,
            csr_static,
            csr_file,
            cert_file,
            key_file,
            key_length: key_length as u64,
            static_ca,
            ca_file,
            actions,
            handlers,
        })
    }

    /// Every override document defining `path` is one deployment target.
    /// Global `defaults` fields are merged in below the document's own
    /// fields; the group's artifact paths always apply.
    fn resolve_targets(
        &self,
        overrides: &[Doc],
        ca_file: &PathBuf,
        cert_file: &PathBuf,
        key_file: &PathBuf,
    ) -> Result<Vec<DeploymentTarget>, ConfigError> {
        let defaults = self.global.defaults();
        let mut targets = Vec::new();

        for doc in overrides.iter().filter(|doc| doc.contains_key("path")) {
            let mut merged = defaults.clone();
            for (k, v) in doc {
                merged.insert(k.clone(), v.clone());
            }

            let Some(path_value) = merged.get("path") else {
                continue;
            };
            let path = PathBuf::from(value_to_string(path_value, "path")?);
            let format = match merged.get("format") {
                Some(value) => FormatToken::parse_list(&value_to_string(value, "format")?)
                    .map_err(|reason| ConfigError::Value {
                        field: "format".to_string(),
                        reason,
                    })?,
                None => {
                    return Err(ConfigError::Value {
                        field: "format".to_string(),
                        reason: format!("deployment target {} has no format list", path.display()),
                    })
                }
            };
            let perm = merged
                .get("perm")
                .map(|v| value_to_string(v, "perm"))
                .transpose()?
                .map(|s| {
                    u32::from_str_radix(&s, 8).map_err(|_| ConfigError::Value {
                        field: "perm".to_string(),
                        reason: format!("'{s}' is not an octal permission"),
                    })
                })
                .transpose()?;

            targets.push(DeploymentTarget {
                path,
                user: merged
                    .get("user")
                    .map(|v| value_to_string(v, "user"))
                    .transpose()?,
                group: merged
                    .get("group")
                    .map(|v| value_to_string(v, "group"))
                    .transpose()?,
                perm,
                format,
                action: merged
                    .get("action")
                    .filter(|v| !v.is_null())
                    .map(|v| value_to_string(v, "action"))
                    .transpose()?,
                ca_file: ca_file.clone(),
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            });
        }
        Ok(targets)
    }

    /// One handler configuration per working domain: global document copy,
    /// overlaid with the generic handler document (no `domain` field), then
    /// with the document whose `domain` equals the original name.
    fn resolve_handlers(
        &self,
        overrides: &[Doc],
        domain_list: &[String],
        translation: &BTreeMap<String, String>,
    ) -> BTreeMap<String, HandlerConfig> {
        let handler_docs: Vec<&Doc> = overrides
            .iter()
            .filter(|doc| doc.contains_key("mode"))
            .collect();
        let generic = handler_docs
            .iter()
            .find(|doc| !doc.contains_key("domain"))
            .copied();

        let mut handlers = BTreeMap::new();
        for domain in domain_list {
            let mut merged = self.global.doc().clone();
            if let Some(doc) = generic {
                for (k, v) in doc {
                    merged.insert(k.clone(), v.clone());
                }
            }

            // Domain-specific overrides are keyed by the name the operator
            // wrote, which is the original form for translated domains.
            let original = translation
                .get(domain)
                .map(String::as_str)
                .unwrap_or(domain.as_str());
            let specific = handler_docs.iter().find(|doc| {
                doc.get("domain").and_then(Value::as_str) == Some(original)
            });
            if let Some(doc) = specific {
                for (k, v) in doc.iter() {
                    merged.insert(k.clone(), v.clone());
                }
            }

            handlers.insert(domain.clone(), HandlerConfig::from_doc(merged));
        }
        handlers
    }

    fn global_string(&self, name: &str) -> Option<String> {
        self.global
            .get(name)
            .and_then(|v| value_to_string(v, name).ok())
    }

    fn resolve_string(
        &self,
        overrides: &[Doc],
        name: &str,
        default: Option<&str>,
    ) -> Result<String, ConfigError> {
        match self.resolve_opt_string(overrides, name)? {
            Some(value) => Ok(value),
            None => Ok(default.unwrap_or_default().to_string()),
        }
    }

    fn resolve_opt_string(
        &self,
        overrides: &[Doc],
        name: &str,
    ) -> Result<Option<String>, ConfigError> {
        first_override(overrides, name)
            .or_else(|| self.global.get(name))
            .filter(|v| !v.is_null())
            .map(|v| value_to_string(v, name))
            .transpose()
    }

    fn resolve_integer(
        &self,
        overrides: &[Doc],
        name: &str,
        default: i64,
    ) -> Result<i64, ConfigError> {
        match first_override(overrides, name).or_else(|| self.global.get(name)) {
            None => Ok(default),
            Some(value) => value_to_i64(value, name),
        }
    }

    fn resolve_bool(
        &self,
        overrides: &[Doc],
        name: &str,
        default: bool,
    ) -> Result<bool, ConfigError> {
        match first_override(overrides, name).or_else(|| self.global.get(name)) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => Ok(s.eq_ignore_ascii_case("true")),
            Some(other) => Err(ConfigError::Value {
                field: name.to_string(),
                reason: format!("expected a boolean, got {other}"),
            }),
        }
    }
}

/// First override document defining the field wins; later documents for the
/// same field are ignored.
fn first_override<'d>(overrides: &'d [Doc], name: &str) -> Option<&'d Value> {
    overrides.iter().find_map(|doc| doc.get(name))
}

/// Stable identifier for a domain set: md5 hex digest of the sorted,
/// space-joined domain list.
pub fn group_id(domains: &[String]) -> String {
    let mut sorted: Vec<&str> = domains.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let canonical = sorted.join(" ");
    hex::encode(Md5::digest(canonical.as_bytes()))
}

fn value_to_string(value: &Value, field: &str) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ConfigError::Value {
            field: field.to_string(),
            reason: format!("expected a scalar, got {other}"),
        }),
    }
}

fn value_to_i64(value: &Value, field: &str) -> Result<i64, ConfigError> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| ConfigError::Value {
            field: field.to_string(),
            reason: format!("{n} is not an integer"),
        }),
        Value::String(s) => s.trim().parse().map_err(|_| ConfigError::Value {
            field: field.to_string(),
            reason: format!("'{s}' is not an integer"),
        }),
        other => Err(ConfigError::Value {
            field: field.to_string(),
            reason: format!("expected an integer, got {other}"),
        }),
    }
}
