//! Certificate authority capability and registry.
//!
//! The actual authority conversation (account registration, challenge
//! negotiation, polling, signing) lives behind the [`Authority`] trait.
//! Backends register a factory under their API version tag; the
//! orchestrator looks the tag up at issuance time, so new protocol
//! versions attach without touching the pipeline.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::challenge::ChallengeHandler;
use crate::error::AuthorityError;

/// Revocation reason "superseded" (RFC 5280 §5.3.1).
pub const REVOKE_REASON_SUPERSEDED: u32 = 4;

/// Everything a backend needs to talk to its authority.
#[derive(Debug, Clone)]
pub struct AuthoritySettings {
    /// API version tag the backend was selected by.
    pub api: String,
    /// Authority endpoint URL.
    pub authority: String,
    /// Terms-of-service agreement value, if required by the authority.
    pub tos_agreement: Option<String>,
    /// Contact email for account registration.
    pub contact_email: Option<String>,
    /// PEM account key.
    pub account_key_pem: String,
}

/// The authority conversation as consumed by the orchestrator.
pub trait Authority {
    /// Register (or look up) the account for the configured key.
    /// Idempotent; called on every issuance run.
    fn register_account(&mut self) -> Result<(), AuthorityError>;

    /// Exchange a CSR for a certificate, driving per-domain challenge
    /// completion through the supplied handlers (keyed by domain name).
    ///
    /// Returns the certificate PEM and, if the authority delivers one,
    /// the CA chain PEM.
    fn certificate_from_csr(
        &mut self,
        csr_pem: &str,
        domains: &[String],
        handlers: &mut HashMap<String, Box<dyn ChallengeHandler>>,
    ) -> Result<(String, Option<String>), AuthorityError>;

    /// Revoke a certificate issued under this account.
    fn revoke(&mut self, cert_pem: &str, reason: Option<u32>) -> Result<(), AuthorityError>;
}

/// Constructs an authority backend from its settings.
pub type AuthorityFactory =
    Box<dyn Fn(&AuthoritySettings) -> Result<Box<dyn Authority>, AuthorityError> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, AuthorityFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a backend under its API version tag.
pub fn register(api: &str, factory: AuthorityFactory) {
    debug!(api, "Registering authority backend");
    REGISTRY.write().insert(api.to_string(), factory);
}

/// Construct the backend registered for `settings.api`, or `None` if the
/// tag is unknown.
pub fn create(
    settings: &AuthoritySettings,
) -> Option<Result<Box<dyn Authority>, AuthorityError>> {
    REGISTRY.read().get(&settings.api).map(|factory| factory(settings))
}

/// API tags with a registered backend, for diagnostics.
pub fn registered_apis() -> Vec<String> {
    let mut apis: Vec<String> = REGISTRY.read().keys().cloned().collect();
    apis.sort();
    apis
}
