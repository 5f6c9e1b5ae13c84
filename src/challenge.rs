//! Challenge handler capability and registry.
//!
//! Authorities prove domain ownership by asking the operator to publish a
//! token. How the token gets published (file placement, DNS record, a
//! standalone responder) is a pluggable capability: handler variants
//! register a factory under their `mode` tag and are constructed from the
//! per-domain [`HandlerConfig`] at issuance time.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HandlerConfig;

/// A challenge completion failure, surfaced through the authority exchange.
#[derive(Debug, Error)]
#[error("challenge handling failed: {0}")]
pub struct ChallengeError(pub String);

/// Protocol-agnostic completion hooks invoked by the authority while it
/// drives per-domain validation.
pub trait ChallengeHandler {
    /// Publish the token so the authority can observe it.
    fn prepare(&mut self, domain: &str, token: &str, key_authorization: &str)
        -> Result<(), ChallengeError>;

    /// Remove a published token after validation (or failure).
    fn cleanup(&mut self, domain: &str, token: &str) -> Result<(), ChallengeError>;
}

/// Constructs a handler from its resolved configuration.
pub type HandlerFactory =
    Box<dyn Fn(&HandlerConfig) -> Result<Box<dyn ChallengeHandler>, ChallengeError> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, HandlerFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a handler variant under its mode tag.
pub fn register(mode: &str, factory: HandlerFactory) {
    debug!(mode, "Registering challenge handler variant");
    REGISTRY.write().insert(mode.to_string(), factory);
}

/// Construct a handler for the given configuration, or `None` if no
/// variant is registered under its mode.
pub fn create(config: &HandlerConfig) -> Option<Result<Box<dyn ChallengeHandler>, ChallengeError>> {
    REGISTRY.read().get(&config.mode).map(|factory| factory(config))
}

/// Register the built-in handler variants.
pub fn register_builtin() {
    register(
        "webroot",
        Box::new(|config| {
            Ok(Box::new(WebrootHandler::from_config(config)) as Box<dyn ChallengeHandler>)
        }),
    );
}

/// Default directory for webroot challenge files.
const DEFAULT_CHALLENGE_DIR: &str = "/var/www/acme-challenge";

/// Places challenge tokens as files under a web-served directory
/// (`/.well-known/acme-challenge/` is expected to map onto it).
#[derive(Debug)]
pub struct WebrootHandler {
    challenge_dir: PathBuf,
}

impl WebrootHandler {
    pub fn new(challenge_dir: PathBuf) -> Self {
        Self { challenge_dir }
    }

    pub fn from_config(config: &HandlerConfig) -> Self {
        let dir = config
            .option_str("webdir")
            .unwrap_or(DEFAULT_CHALLENGE_DIR);
        Self::new(PathBuf::from(dir))
    }

    fn token_path(&self, token: &str) -> PathBuf {
        self.challenge_dir.join(token)
    }
}

impl ChallengeHandler for WebrootHandler {
    fn prepare(
        &mut self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), ChallengeError> {
        fs::create_dir_all(&self.challenge_dir)
            .map_err(|e| ChallengeError(format!("cannot create challenge dir: {e}")))?;
        let path = self.token_path(token);
        debug!(domain, path = %path.display(), "Publishing challenge token");
        fs::write(&path, key_authorization)
            .map_err(|e| ChallengeError(format!("cannot write challenge file: {e}")))
    }

    fn cleanup(&mut self, domain: &str, token: &str) -> Result<(), ChallengeError> {
        let path = self.token_path(token);
        if let Err(e) = fs::remove_file(&path) {
            // Leftover token files are harmless; report and move on.
            warn!(domain, path = %path.display(), error = %e, "Could not remove challenge file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Doc;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn test_webroot_prepare_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let mut handler = WebrootHandler::new(dir.path().join("challenges"));

        handler
            .prepare("example.com", "tok123", "tok123.thumbprint")
            .unwrap();
        let path = dir.path().join("challenges/tok123");
        assert_eq!(fs::read_to_string(&path).unwrap(), "tok123.thumbprint");

        handler.cleanup("example.com", "tok123").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_webroot_reads_webdir_option() {
        let mut doc = Doc::new();
        doc.insert("mode".into(), Value::String("webroot".into()));
        doc.insert("webdir".into(), Value::String("/srv/acme".into()));
        let handler = WebrootHandler::from_config(&HandlerConfig::from_doc(doc));
        assert_eq!(handler.challenge_dir, PathBuf::from("/srv/acme"));
    }

    #[test]
    fn test_registry_round_trip() {
        register_builtin();
        let mut doc = Doc::new();
        doc.insert("mode".into(), Value::String("webroot".into()));
        let config = HandlerConfig::from_doc(doc);
        assert!(create(&config).is_some());

        let mut doc = Doc::new();
        doc.insert("mode".into(), Value::String("no-such-mode".into()));
        let config = HandlerConfig::from_doc(doc);
        assert!(create(&config).is_none());
    }
}
