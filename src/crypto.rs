//! PEM material handling: keys, certificate requests and certificates.
//!
//! The pipeline consumes this through the [`CryptoStore`] trait so tests
//! and alternative backends can substitute their own implementation. The
//! default [`FsCryptoStore`] keeps everything as PEM files on disk: RSA
//! keys via the `rsa` crate, CSRs via `rcgen`, expiry inspection via
//! `x509-parser`.

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use tracing::{debug, info};

use crate::error::CryptoError;

/// Capability for reading, generating and inspecting PEM material.
pub trait CryptoStore {
    /// Read a PEM private key.
    fn load_key(&self, path: &Path) -> Result<String, CryptoError>;

    /// Generate a new private key of the given bit length and persist it
    /// with owner-only permissions.
    fn generate_key(&self, path: &Path, bits: u64) -> Result<String, CryptoError>;

    /// Read a PEM certificate signing request.
    fn load_csr(&self, path: &Path) -> Result<String, CryptoError>;

    /// Generate a CSR for the domain list, signed with `key_pem`, and
    /// persist it.
    fn generate_csr(
        &self,
        domains: &[String],
        key_pem: &str,
        path: &Path,
    ) -> Result<String, CryptoError>;

    /// Read a PEM certificate.
    fn load_certificate(&self, path: &Path) -> Result<String, CryptoError>;

    /// Persist a validated certificate with read-only permission bits.
    fn install_certificate(&self, path: &Path, cert_pem: &str) -> Result<(), CryptoError>;

    /// Persist a CA chain.
    fn store_chain(&self, path: &Path, chain_pem: &str) -> Result<(), CryptoError>;

    /// Whether the certificate's remaining lifetime exceeds `ttl_days`.
    fn certificate_valid_for(&self, cert_pem: &str, ttl_days: i64) -> Result<bool, CryptoError>;
}

/// Filesystem-backed [`CryptoStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCryptoStore;

impl FsCryptoStore {
    pub fn new() -> Self {
        Self
    }

    fn read_pem(&self, path: &Path) -> Result<String, CryptoError> {
        let contents = fs::read_to_string(path)?;
        pem::parse(&contents).map_err(|e| CryptoError::PemParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(contents)
    }
}

impl CryptoStore for FsCryptoStore {
    fn load_key(&self, path: &Path) -> Result<String, CryptoError> {
        self.read_pem(path)
    }

    fn generate_key(&self, path: &Path, bits: u64) -> Result<String, CryptoError> {
        info!(path = %path.display(), bits, "Generating new RSA key");
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits as usize)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        write_restricted(path, pem.as_bytes(), 0o600)?;
        Ok(pem.to_string())
    }

    fn load_csr(&self, path: &Path) -> Result<String, CryptoError> {
        self.read_pem(path)
    }

    fn generate_csr(
        &self,
        domains: &[String],
        key_pem: &str,
        path: &Path,
    ) -> Result<String, CryptoError> {
        debug!(domains = ?domains, "Generating certificate signing request");
        let key_pair = rcgen::KeyPair::from_pem(key_pem)
            .map_err(|e| CryptoError::CsrGeneration(e.to_string()))?;
        let params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| CryptoError::CsrGeneration(e.to_string()))?;
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| CryptoError::CsrGeneration(e.to_string()))?;
        let pem = csr
            .pem()
            .map_err(|e| CryptoError::CsrGeneration(e.to_string()))?;
        fs::write(path, &pem)?;
        Ok(pem)
    }

    fn load_certificate(&self, path: &Path) -> Result<String, CryptoError> {
        self.read_pem(path)
    }

    fn install_certificate(&self, path: &Path, cert_pem: &str) -> Result<(), CryptoError> {
        write_restricted(path, cert_pem.as_bytes(), 0o400)?;
        info!(path = %path.display(), "Installed certificate");
        Ok(())
    }

    fn store_chain(&self, path: &Path, chain_pem: &str) -> Result<(), CryptoError> {
        fs::write(path, chain_pem)?;
        debug!(path = %path.display(), "Stored CA chain");
        Ok(())
    }

    fn certificate_valid_for(&self, cert_pem: &str, ttl_days: i64) -> Result<bool, CryptoError> {
        let not_after = certificate_not_after(cert_pem)?;
        let threshold = Utc::now() + chrono::Duration::days(ttl_days);
        Ok(not_after > threshold)
    }
}

/// Extract the expiry timestamp from a PEM certificate.
pub fn certificate_not_after(cert_pem: &str) -> Result<chrono::DateTime<Utc>, CryptoError> {
    let pem = pem::parse(cert_pem).map_err(|e| CryptoError::X509(e.to_string()))?;
    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents())
        .map_err(|e| CryptoError::X509(e.to_string()))?;
    let timestamp = cert.validity().not_after.to_datetime().unix_timestamp();
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| CryptoError::X509("certificate expiry out of range".to_string()))
}

/// Write a file whose content must be fully produced before the
/// destination is observable, then restrict its permission bits.
fn write_restricted(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    // An existing read-only file would reject the rewrite; replacing it is
    // intentional (the content was validated before this point).
    if path.exists() {
        let mut perms = fs::metadata(path)?.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o600);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}
