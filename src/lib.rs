//! Certsmith - automated TLS certificate management
//!
//! Certsmith automates issuance, renewal and deployment of TLS
//! certificates for one or more domain groups, driven by declarative
//! configuration files. It is designed to run periodically from an
//! external scheduler; every step is idempotent, so an interrupted run
//! simply re-evaluates from scratch next time.
//!
//! # Architecture
//!
//! A run flows through the following stages:
//!
//! 1. [`config`] - resolve layered configuration (global defaults,
//!    per-group overrides, per-domain handler overrides) into one
//!    fully-resolved [`config::DomainGroupConfig`] per certificate,
//!    including legacy-layout compatibility and unicode domain
//!    translation.
//! 2. [`renewal`] - decide per group whether the certificate is missing
//!    or inside its renewal window, and if so drive the acquire workflow
//!    against a pluggable [`authority`] backend with per-domain
//!    [`challenge`] handlers and the [`crypto`] store.
//! 3. [`deploy`] - rebuild stale deployment targets from the requested
//!    component order with configured ownership and permissions.
//! 4. [`actions`] - run each distinct post-deployment action exactly
//!    once, even when several targets requested it.
//!
//! Failures are isolated at the smallest meaningful unit (one config
//! file, one domain group, one target, one action); a single bad entry
//! never blocks unrelated domain groups.

pub mod actions;
pub mod authority;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod deploy;
pub mod error;
pub mod renewal;

pub use actions::{ActionRunner, ActionScheduler, ShellRunner};
pub use authority::{Authority, AuthoritySettings};
pub use challenge::ChallengeHandler;
pub use config::{DomainGroupConfig, GlobalConfig, RuntimeConfig};
pub use crypto::{CryptoStore, FsCryptoStore};
pub use deploy::deploy_group;
pub use error::{ActionError, AuthorityError, ConfigError, CryptoError, DeployError, RenewalError};
pub use renewal::{CertStatus, RenewalOrchestrator};
