//! Backward compatibility with legacy file layouts.
//!
//! Older installations keep everything under `/etc/acme`. Those locations
//! keep working, but each use emits a one-line deprecation notice. All
//! detection happens here, once, at startup; the rest of the pipeline only
//! ever sees resolved, non-legacy paths and fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use super::{GlobalConfig, DEFAULT_CONF_DIR, DEFAULT_CONF_FILE};

/// Legacy work data directory.
pub const LEGACY_WORK_DIR: &str = "/etc/acme";
/// Legacy global configuration file.
pub const LEGACY_CONF_FILE: &str = "/etc/acme/acme.conf";
/// Legacy domain configuration directory.
pub const LEGACY_CONF_DIR: &str = "/etc/acme/domains.d";
/// Authority API version assumed by legacy configurations.
pub const LEGACY_API: &str = "v1";
/// Authority endpoint assumed by legacy configurations.
pub const LEGACY_AUTHORITY: &str = "https://acme-v01.api.letsencrypt.org";
/// Legacy configurations implicitly agreed to the authority's terms.
pub const LEGACY_TOS_AGREEMENT: &str = "true";

/// Candidate legacy locations, parameterized for testing.
#[derive(Debug, Clone)]
pub struct LegacyPaths {
    pub work_dir: PathBuf,
    pub conf_file: PathBuf,
    pub conf_dir: PathBuf,
}

impl Default for LegacyPaths {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(LEGACY_WORK_DIR),
            conf_file: PathBuf::from(LEGACY_CONF_FILE),
            conf_dir: PathBuf::from(LEGACY_CONF_DIR),
        }
    }
}

/// Explicit CLI path overrides. An override always wins over legacy
/// detection and built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct CliPaths {
    pub config_file: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// The resolved, non-legacy view of the configuration layout.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub global_config_file: PathBuf,
    pub domain_config_dir: PathBuf,
    pub work_dir: PathBuf,
    /// The legacy global file was selected; legacy API defaults apply.
    pub legacy_global: bool,
}

/// Resolve configuration locations: CLI override > existing legacy path
/// (with deprecation notice) > built-in default.
pub fn resolve_paths(cli: &CliPaths, legacy: &LegacyPaths) -> ResolvedPaths {
    let (global_config_file, legacy_global) = match &cli.config_file {
        Some(path) => (path.clone(), false),
        None if legacy.conf_file.is_file() => {
            warn!(
                "Legacy config file '{}' used. Move to '{}'",
                legacy.conf_file.display(),
                DEFAULT_CONF_FILE
            );
            (legacy.conf_file.clone(), true)
        }
        None => (PathBuf::from(DEFAULT_CONF_FILE), false),
    };

    let (domain_config_dir, legacy_dir) = match &cli.config_dir {
        Some(path) => (path.clone(), false),
        None if legacy.conf_dir.is_dir() => {
            warn!(
                "Legacy config dir '{}' used. Move to '{}'",
                legacy.conf_dir.display(),
                DEFAULT_CONF_DIR
            );
            (legacy.conf_dir.clone(), true)
        }
        None => (PathBuf::from(DEFAULT_CONF_DIR), false),
    };

    let work_dir = match &cli.work_dir {
        Some(path) => path.clone(),
        None if legacy_dir && legacy.work_dir.is_dir() => {
            warn!(
                "Legacy work dir '{}' used. Move to the config dir",
                legacy.work_dir.display()
            );
            legacy.work_dir.clone()
        }
        None => domain_config_dir.clone(),
    };

    ResolvedPaths {
        global_config_file,
        domain_config_dir,
        work_dir,
        legacy_global,
    }
}

/// Create the work directory with restrictive permissions if missing.
pub fn ensure_work_dir(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Inject the fixed historical defaults implied by the legacy global file.
pub fn apply_legacy_global_defaults(global: &mut GlobalConfig) {
    global.set_if_absent("api", Value::String(LEGACY_API.to_string()));
    global.set_if_absent("authority", Value::String(LEGACY_AUTHORITY.to_string()));
}
