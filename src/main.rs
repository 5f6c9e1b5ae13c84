//! Certsmith - main entry point
//!
//! Automated certificate manager: resolves configuration, renews
//! certificates where needed, deploys them, and runs post-deployment
//! actions exactly once each.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use certsmith::actions::{ActionScheduler, ShellRunner};
use certsmith::authority::{self, AuthoritySettings};
use certsmith::challenge;
use certsmith::config::{
    self, CliPaths, GlobalConfig, LegacyPaths, RevokeRequest, RuntimeConfig, DEFAULT_API,
    DEFAULT_AUTHORITY,
};
use certsmith::crypto::{CryptoStore, FsCryptoStore};
use certsmith::deploy;
use certsmith::renewal::RenewalOrchestrator;

/// Certsmith - Automated certificate manager
#[derive(Parser, Debug)]
#[command(name = "certsmith")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Global configuration file
    #[arg(short = 'c', long = "config-file", env = "CERTSMITH_CONFIG")]
    config_file: Option<PathBuf>,

    /// Domain configuration directory
    #[arg(short = 'd', long = "config-dir", env = "CERTSMITH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Persistent work data directory (default: the config dir)
    #[arg(short = 'w', long = "work-dir")]
    work_dir: Option<PathBuf>,

    /// Agree to the authority's terms of service (required value depends
    /// on the authority)
    #[arg(long = "authority-tos-agreement", alias = "tos-agreement")]
    authority_tos_agreement: Option<String>,

    /// Renew all domain groups matching the given domains immediately
    #[arg(long = "force-renew", alias = "renew-now")]
    force_renew: Option<String>,

    /// Revoke the given certificate file and exit
    #[arg(long = "revoke")]
    revoke: Option<PathBuf>,

    /// Revocation reason code (RFC 5280, section 5.3.1)
    #[arg(long = "revoke-reason")]
    revoke_reason: Option<u32>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    challenge::register_builtin();

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    // Resolve configuration locations: CLI > legacy layout > defaults.
    let paths = config::resolve_paths(
        &CliPaths {
            config_file: cli.config_file.clone(),
            config_dir: cli.config_dir.clone(),
            work_dir: cli.work_dir.clone(),
        },
        &LegacyPaths::default(),
    );
    config::ensure_work_dir(&paths.work_dir)
        .with_context(|| format!("cannot create work dir {}", paths.work_dir.display()))?;

    let mut global = config::load_global(&paths.global_config_file)
        .context("failed to load global configuration")?;
    if paths.legacy_global {
        config::apply_legacy_global_defaults(&mut global);
    }

    let authority_tos_agreement = cli.authority_tos_agreement.clone().or_else(|| {
        paths
            .legacy_global
            .then(|| config::LEGACY_TOS_AGREEMENT.to_string())
    });

    // Forced-renewal domains are matched in their ASCII transport form.
    let force_renew = cli.force_renew.as_deref().map(|spec| {
        let domains: Vec<String> = spec.split_whitespace().map(str::to_string).collect();
        let translation = config::translate_domains(&domains);
        config::apply_translation(&domains, &translation)
    });

    let runtime = RuntimeConfig {
        work_dir: paths.work_dir.clone(),
        authority_tos_agreement,
        force_renew,
        revoke: cli.revoke.map(|cert_file| RevokeRequest {
            cert_file,
            reason: cli.revoke_reason,
        }),
    };

    let crypto = FsCryptoStore::new();

    if let Some(revoke) = &runtime.revoke {
        return revoke_certificate(&global, &runtime, &crypto, revoke);
    }

    let entries = config::load_domain_entries(&paths.domain_config_dir, &paths.global_config_file)
        .context("failed to load domain configuration")?;
    let resolver = config::Resolver::new(&global, &runtime);
    let groups = resolver.resolve_all(&entries);
    info!(groups = groups.len(), "Resolved domain group configurations");

    let orchestrator = RenewalOrchestrator::new(&crypto, &runtime);
    let mut scheduler = ActionScheduler::new();

    for group in &groups {
        match orchestrator.ensure_certificate(group) {
            Ok(()) => deploy::deploy_group(group, &mut scheduler),
            Err(e) => {
                error!(domains = %group.domains, error = %e, "Certificate renewal failed");
            }
        }
    }

    let failures = scheduler.run_all(&ShellRunner);
    if failures > 0 {
        info!(failures, "Run finished with failed post-deployment actions");
    }
    Ok(())
}

/// Standalone revocation mode: revoke one certificate file with the
/// account configured globally, then exit.
fn revoke_certificate(
    global: &GlobalConfig,
    runtime: &RuntimeConfig,
    crypto: &dyn CryptoStore,
    revoke: &RevokeRequest,
) -> Result<()> {
    let account_key = global
        .get_str("account_key")
        .map(PathBuf::from)
        .unwrap_or_else(|| runtime.work_dir.join("account.key"));
    let account_key_pem = crypto
        .load_key(&account_key)
        .with_context(|| format!("cannot read account key {}", account_key.display()))?;

    let settings = AuthoritySettings {
        api: global.get_str("api").unwrap_or(DEFAULT_API).to_string(),
        authority: global
            .get_str("authority")
            .unwrap_or(DEFAULT_AUTHORITY)
            .to_string(),
        tos_agreement: runtime.authority_tos_agreement.clone(),
        contact_email: global.get_str("authority_contact_email").map(str::to_string),
        account_key_pem,
    };
    let mut backend = authority::create(&settings)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no authority backend registered for api '{}' (available: {:?})",
                settings.api,
                authority::registered_apis()
            )
        })?
        .context("authority backend initialization failed")?;

    let cert_pem = crypto
        .load_certificate(&revoke.cert_file)
        .with_context(|| format!("cannot read certificate {}", revoke.cert_file.display()))?;

    info!(path = %revoke.cert_file.display(), reason = ?revoke.reason, "Revoking certificate");
    backend
        .revoke(&cert_pem, revoke.reason)
        .context("revocation failed")?;
    info!("Certificate revoked");
    Ok(())
}
