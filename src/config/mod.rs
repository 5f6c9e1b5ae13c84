//! Configuration model and resolution engine.
//!
//! Configuration arrives in three layers: a single global document, zero or
//! more domain-group documents (each an ordered list of override documents),
//! and per-domain challenge-handler overrides. The resolver merges the
//! layers with strict precedence (first matching override document > global
//! default > hardcoded default) into one fully-resolved [`DomainGroupConfig`]
//! per certificate.
//!
//! Documents are JSON (tried first) or YAML (fallback). Both formats are
//! interchangeable; a file that parses in neither is rejected.

mod legacy;
mod resolver;
mod store;
mod translate;

pub use legacy::{
    apply_legacy_global_defaults, ensure_work_dir, resolve_paths, CliPaths, LegacyPaths,
    ResolvedPaths, LEGACY_TOS_AGREEMENT,
};
pub use resolver::{group_id, Resolver};
pub use store::{load_domain_entries, load_global, RawDomainEntry};
pub use translate::{apply_translation, translate_domains};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

/// One parsed configuration document (a JSON/YAML mapping).
pub type Doc = serde_json::Map<String, Value>;

/// Default global configuration file location.
pub const DEFAULT_CONF_FILE: &str = "/etc/certsmith/certsmith.conf";
/// Default domain configuration directory.
pub const DEFAULT_CONF_DIR: &str = "/etc/certsmith";
/// Default RSA key length in bits.
pub const DEFAULT_KEY_LENGTH: u64 = 4096;
/// Default renew-before-expiry threshold in days.
pub const DEFAULT_TTL_DAYS: i64 = 30;
/// Default authority API version tag.
pub const DEFAULT_API: &str = "v2";
/// Default certificate authority endpoint.
pub const DEFAULT_AUTHORITY: &str = "https://acme-v02.api.letsencrypt.org";
/// Extension recognized for configuration files.
pub const CONF_EXTENSION: &str = ".conf";

/// Process-scoped settings resolved once at startup, immutable thereafter.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Persistent work data directory (account key, default cert dir).
    pub work_dir: PathBuf,
    /// Authority terms-of-service agreement value, if given.
    pub authority_tos_agreement: Option<String>,
    /// Domains to renew immediately regardless of validity (ASCII forms).
    pub force_renew: Option<Vec<String>>,
    /// Standalone revocation request, if given.
    pub revoke: Option<RevokeRequest>,
}

/// A request to revoke one certificate file and exit.
#[derive(Debug, Clone)]
pub struct RevokeRequest {
    /// PEM certificate file to revoke.
    pub cert_file: PathBuf,
    /// RFC 5280 §5.3.1 reason code.
    pub reason: Option<u32>,
}

/// The shared global configuration document.
///
/// Kept as the raw parsed mapping because challenge-handler resolution
/// starts from a full copy of it; typed accessors cover the scalar fields
/// the resolver consumes.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    doc: Doc,
}

impl GlobalConfig {
    /// Empty document, used when no global configuration file exists.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_doc(doc: Doc) -> Self {
        Self { doc }
    }

    /// The raw underlying document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.doc.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.doc.get(name).and_then(Value::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.doc.contains_key(name)
    }

    /// The `defaults` sub-document merged into every deployment target.
    pub fn defaults(&self) -> Doc {
        match self.doc.get("defaults") {
            Some(Value::Object(map)) => map.clone(),
            _ => Doc::new(),
        }
    }

    /// Insert a value only if the field is not already set. Used for the
    /// fixed legacy-configuration compatibility defaults.
    pub fn set_if_absent(&mut self, name: &str, value: Value) {
        self.doc.entry(name.to_string()).or_insert(value);
    }
}

/// Per-domain challenge-handling configuration.
///
/// Built from a full copy of the global document, overlaid with the generic
/// handler override document and then the domain-specific one (matched on
/// the original, pre-translation domain name).
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerConfig {
    /// Challenge handler variant tag.
    pub mode: String,
    /// The complete merged option document for the handler.
    pub options: Doc,
}

/// Challenge handler variant used when no `mode` is configured.
pub const DEFAULT_CHALLENGE_MODE: &str = "standalone";

impl HandlerConfig {
    pub fn from_doc(options: Doc) -> Self {
        let mode = options
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CHALLENGE_MODE)
            .to_string();
        Self { mode, options }
    }

    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Value::as_str)
    }
}

/// One component of a deployment target file, in concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatToken {
    /// The certificate itself.
    Crt,
    /// The private key.
    Key,
    /// The CA chain.
    Ca,
}

impl FormatToken {
    /// Parse a comma-separated format list. Unrecognized tokens are
    /// rejected; order and duplicates are preserved.
    pub fn parse_list(spec: &str) -> Result<Vec<Self>, String> {
        spec.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| match t {
                "crt" => Ok(Self::Crt),
                "key" => Ok(Self::Key),
                "ca" => Ok(Self::Ca),
                other => Err(format!("unrecognized format token '{other}'")),
            })
            .collect()
    }
}

/// One deployment rule: where to place a rebuilt bundle, who owns it, and
/// what to run afterwards.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    /// Destination file.
    pub path: PathBuf,
    /// Owning user name, if ownership should be applied.
    pub user: Option<String>,
    /// Owning group name.
    pub group: Option<String>,
    /// Octal permission bits, parsed at resolution time.
    pub perm: Option<u32>,
    /// Ordered bundle components.
    pub format: Vec<FormatToken>,
    /// Post-deployment action command line, if any.
    pub action: Option<String>,
    /// CA chain file inherited from the owning domain group.
    pub ca_file: PathBuf,
    /// Certificate file inherited from the owning domain group.
    pub cert_file: PathBuf,
    /// Key file inherited from the owning domain group.
    pub key_file: PathBuf,
}

/// Fully-resolved configuration for one certificate (one or more domains).
#[derive(Debug, Clone)]
pub struct DomainGroupConfig {
    /// Space-joined working domain string (ASCII forms after translation).
    pub domains: String,
    /// Working domain list in configured order.
    pub domain_list: Vec<String>,
    /// Stable content-derived identifier: md5 hex digest of the sorted,
    /// space-joined configured domain list. Identical domain sets always
    /// map to the same artifact paths.
    pub id: String,
    /// ASCII form → original form for translated unicode domains.
    pub domain_translation: BTreeMap<String, String>,
    /// Authority API version tag.
    pub api: String,
    /// Authority endpoint.
    pub authority: String,
    /// Terms-of-service agreement value passed to the authority.
    pub authority_tos_agreement: Option<String>,
    /// Contact email registered with the authority.
    pub authority_contact_email: Option<String>,
    /// Account key location.
    pub account_key: PathBuf,
    /// Directory holding generated artifacts.
    pub cert_dir: PathBuf,
    /// Renew when remaining certificate lifetime drops to this many days.
    pub ttl_days: i64,
    /// Revoke the superseded certificate after successful renewal.
    pub cert_revoke_superseded: bool,
    /// Reuse an existing CSR file instead of regenerating.
    pub csr_static: bool,
    /// CSR location.
    pub csr_file: PathBuf,
    /// Certificate location.
    pub cert_file: PathBuf,
    /// Key location.
    pub key_file: PathBuf,
    /// RSA key length in bits for generated keys.
    pub key_length: u64,
    /// The CA file is operator-provided, not authority-delivered.
    pub static_ca: bool,
    /// CA chain location.
    pub ca_file: PathBuf,
    /// Deployment targets owned by this group.
    pub actions: Vec<DeploymentTarget>,
    /// Resolved challenge-handler configuration per working domain name.
    pub handlers: BTreeMap<String, HandlerConfig>,
}
