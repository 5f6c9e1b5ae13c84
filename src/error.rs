//! Error types for configuration resolution and the certificate pipeline.
//!
//! Failures are isolated at the smallest meaningful unit: one configuration
//! file, one domain group, one deployment target, one post-deployment action.
//! A single bad entry never prevents renewal or deployment of unrelated
//! domain groups.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file exists but matches neither supported format.
    /// Fatal to that file's load; other files still load.
    #[error("configuration file {path} is not parsable: json: {json_error}; yaml: {yaml_error}")]
    NotParsable {
        path: PathBuf,
        json_error: String,
        yaml_error: String,
    },

    /// A domain-group entry is structurally malformed (e.g. missing the
    /// domain key or a non-list override set). Fatal to that entry only.
    #[error("malformed domain group entry '{entry}': {reason}")]
    Structure { entry: String, reason: String },

    /// A field value has the wrong type (e.g. a non-integer TTL).
    #[error("invalid value for '{field}': {reason}")]
    Value { field: String, reason: String },

    /// Filesystem access failed while loading configuration.
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by cryptographic material handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A PEM document could not be parsed.
    #[error("failed to parse PEM data in {path}: {reason}")]
    PemParse { path: PathBuf, reason: String },

    /// An X.509 certificate could not be decoded.
    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// CSR construction failed.
    #[error("certificate request generation failed: {0}")]
    CsrGeneration(String),

    /// Filesystem access failed while reading or writing PEM material.
    #[error("crypto store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by authority backends during the certificate exchange.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Account registration was rejected.
    #[error("account registration failed: {0}")]
    Registration(String),

    /// The CSR exchange failed (challenge, polling or signing).
    #[error("certificate exchange failed: {0}")]
    Exchange(String),

    /// Certificate revocation was rejected.
    #[error("revocation failed: {0}")]
    Revocation(String),
}

/// Errors aborting one domain group's issuance attempt.
///
/// None of these touch previously deployed certificate files.
#[derive(Debug, Error)]
pub enum RenewalError {
    /// The authority conversation failed.
    #[error("authority exchange failed for '{domains}': {source}")]
    AuthorityExchange {
        domains: String,
        #[source]
        source: AuthorityError,
    },

    /// The authority returned a certificate already inside the renewal
    /// window; it is rejected rather than installed.
    #[error("authority returned a certificate for '{domains}' with less than {ttl_days} days of validity")]
    ShortLived { domains: String, ttl_days: i64 },

    /// No authority backend is registered for the configured API tag.
    #[error("no authority backend registered for api '{api}'")]
    NoAuthorityBackend { api: String },

    /// No challenge handler is registered for the configured mode.
    #[error("no challenge handler registered for mode '{mode}'")]
    NoHandlerBackend { mode: String },

    /// Key, CSR or certificate handling failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Filesystem access failed during issuance.
    #[error("renewal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors aborting one deployment target's rebuild.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The target's format list references the CA but the static CA file
    /// does not exist. Sibling targets are unaffected.
    #[error("the CA certificate file {0} is missing")]
    MissingCaFile(PathBuf),

    /// Filesystem access failed while rebuilding the target.
    #[error("deployment I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while executing a post-deployment action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The command exited with a non-zero status.
    #[error("'{command}' exited with status {status}: {output}")]
    NonZeroExit {
        command: String,
        status: i32,
        output: String,
    },

    /// The command could not be spawned at all.
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
