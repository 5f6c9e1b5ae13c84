//! Certificate renewal orchestration.
//!
//! Per domain group: decide whether the current certificate is still good,
//! and if not, drive the acquire workflow — account key, signing key, CSR,
//! authority exchange, validation, installation. Every step is idempotent,
//! so a killed run re-evaluates safely from scratch on the next invocation.
//!
//! A failure in any sub-step aborts only that group's issuance; previously
//! deployed files are never touched with unvalidated data.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::authority::{self, AuthoritySettings, REVOKE_REASON_SUPERSEDED};
use crate::challenge::{self, ChallengeHandler};
use crate::config::{DomainGroupConfig, RuntimeConfig};
use crate::crypto::CryptoStore;
use crate::error::RenewalError;

/// Outcome of the per-group validity decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    /// The certificate exists, parses, and its remaining lifetime exceeds
    /// the group's TTL threshold.
    Current,
    /// Missing, unreadable, or inside the renewal window.
    NeedsIssuance,
}

/// Drives the renewal decision and acquire workflow for domain groups.
pub struct RenewalOrchestrator<'a> {
    crypto: &'a dyn CryptoStore,
    runtime: &'a RuntimeConfig,
}

impl<'a> RenewalOrchestrator<'a> {
    pub fn new(crypto: &'a dyn CryptoStore, runtime: &'a RuntimeConfig) -> Self {
        Self { crypto, runtime }
    }

    /// Classify the group's current certificate.
    pub fn certificate_status(&self, config: &DomainGroupConfig) -> CertStatus {
        if self.is_force_renewed(config) {
            info!(domains = %config.domains, "Forced renewal requested");
            return CertStatus::NeedsIssuance;
        }
        if !config.cert_file.is_file() {
            debug!(domains = %config.domains, "No certificate on disk, issuance needed");
            return CertStatus::NeedsIssuance;
        }
        let cert_pem = match self.crypto.load_certificate(&config.cert_file) {
            Ok(pem) => pem,
            Err(e) => {
                warn!(
                    path = %config.cert_file.display(),
                    error = %e,
                    "Certificate unreadable, issuance needed"
                );
                return CertStatus::NeedsIssuance;
            }
        };
        match self.crypto.certificate_valid_for(&cert_pem, config.ttl_days) {
            Ok(true) => CertStatus::Current,
            Ok(false) => {
                info!(
                    domains = %config.domains,
                    ttl_days = config.ttl_days,
                    "Certificate inside renewal window"
                );
                CertStatus::NeedsIssuance
            }
            Err(e) => {
                warn!(
                    path = %config.cert_file.display(),
                    error = %e,
                    "Certificate does not parse, issuance needed"
                );
                CertStatus::NeedsIssuance
            }
        }
    }

    /// Ensure the group has a current certificate, issuing one if needed.
    /// On success the certificate on disk is always current.
    pub fn ensure_certificate(&self, config: &DomainGroupConfig) -> Result<(), RenewalError> {
        match self.certificate_status(config) {
            CertStatus::Current => Ok(()),
            CertStatus::NeedsIssuance => self.issue(config),
        }
    }

    fn is_force_renewed(&self, config: &DomainGroupConfig) -> bool {
        match &self.runtime.force_renew {
            Some(domains) => domains.iter().any(|d| config.domain_list.contains(d)),
            None => false,
        }
    }

    /// The acquire workflow.
    fn issue(&self, config: &DomainGroupConfig) -> Result<(), RenewalError> {
        info!(domains = %config.domains, "Obtaining certificate");

        // Account key: generate on first use, never regenerated once present.
        let account_key_pem = if config.account_key.is_file() {
            debug!(path = %config.account_key.display(), "Reading account key");
            self.crypto.load_key(&config.account_key)?
        } else {
            info!(path = %config.account_key.display(), "Account key not found, creating one");
            self.crypto
                .generate_key(&config.account_key, crate::config::DEFAULT_KEY_LENGTH)?
        };

        let settings = AuthoritySettings {
            api: config.api.clone(),
            authority: config.authority.clone(),
            tos_agreement: config.authority_tos_agreement.clone(),
            contact_email: config.authority_contact_email.clone(),
            account_key_pem,
        };
        let mut authority =
            authority::create(&settings)
                .ok_or_else(|| RenewalError::NoAuthorityBackend {
                    api: config.api.clone(),
                })?
                .map_err(|source| RenewalError::AuthorityExchange {
                    domains: config.domains.clone(),
                    source,
                })?;

        authority
            .register_account()
            .map_err(|source| RenewalError::AuthorityExchange {
                domains: config.domains.clone(),
                source,
            })?;

        // One challenge handler per domain, keyed by domain name.
        let mut handlers: HashMap<String, Box<dyn ChallengeHandler>> = HashMap::new();
        let fallback_handler = crate::config::HandlerConfig::from_doc(crate::config::Doc::new());
        for domain in &config.domain_list {
            // The resolver fills handlers for every working domain; the
            // default-mode fallback covers hand-built configurations.
            let handler_config = config.handlers.get(domain).unwrap_or(&fallback_handler);
            let handler = challenge::create(handler_config)
                .ok_or_else(|| RenewalError::NoHandlerBackend {
                    mode: handler_config.mode.clone(),
                })?
                .map_err(|e| RenewalError::AuthorityExchange {
                    domains: config.domains.clone(),
                    source: crate::error::AuthorityError::Exchange(e.to_string()),
                })?;
            handlers.insert(domain.clone(), handler);
        }

        // Signing key: generate on first use, persisted, never regenerated.
        let key_pem = if config.key_file.is_file() {
            self.crypto.load_key(&config.key_file)?
        } else {
            info!(
                path = %config.key_file.display(),
                bits = config.key_length,
                "Signing key not found, creating one"
            );
            self.crypto.generate_key(&config.key_file, config.key_length)?
        };

        // CSR: reused verbatim only when pinned static and present.
        let csr_pem = if config.csr_static && config.csr_file.is_file() {
            info!(path = %config.csr_file.display(), "Loading static certificate request");
            self.crypto.load_csr(&config.csr_file)?
        } else {
            debug!(domains = %config.domains, "Generating certificate request");
            self.crypto
                .generate_csr(&config.domain_list, &key_pem, &config.csr_file)?
        };

        let (cert_pem, ca_pem) = authority
            .certificate_from_csr(&csr_pem, &config.domain_list, &mut handlers)
            .map_err(|source| RenewalError::AuthorityExchange {
                domains: config.domains.clone(),
                source,
            })?;

        // An authority returning an already-near-expiry certificate is
        // rejected before anything on disk changes.
        if !self.crypto.certificate_valid_for(&cert_pem, config.ttl_days)? {
            return Err(RenewalError::ShortLived {
                domains: config.domains.clone(),
                ttl_days: config.ttl_days,
            });
        }

        // Keep the superseded certificate around for revocation after the
        // replacement is safely installed.
        let superseded = if config.cert_revoke_superseded {
            self.crypto.load_certificate(&config.cert_file).ok()
        } else {
            None
        };

        self.crypto.install_certificate(&config.cert_file, &cert_pem)?;

        if !config.static_ca {
            if let Some(chain) = &ca_pem {
                self.crypto.store_chain(&config.ca_file, chain)?;
            }
        }

        if let Some(old_pem) = superseded {
            info!(domains = %config.domains, "Revoking superseded certificate");
            if let Err(e) = authority.revoke(&old_pem, Some(REVOKE_REASON_SUPERSEDED)) {
                warn!(domains = %config.domains, error = %e, "Superseded certificate revocation failed");
            }
        }

        info!(domains = %config.domains, "Certificate obtained and installed");
        Ok(())
    }
}
