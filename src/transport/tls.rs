//! # TLS Material Loading
//!
//! Bindings share one keystore convention: [`KeystoreDescriptor::path`]
//! points to a PEM file carrying the CA certificate chain, and an optional
//! `key_alias` names a client identity stored next to it as
//! `<alias>.crt` / `<alias>.key` (PEM as well).
//!
//! Loading is soft-fail by contract: a configured keystore that cannot be
//! loaded produces a warning and an unencrypted connection, never a hard
//! connect failure.

use crate::config::{ConnectorParameter, KeystoreDescriptor};
use crate::error::{ConnectorError, Result};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// Name reported through `supported_encryption()`/`enabled_encryption()`.
pub const TLS_V1_2: &str = "TLSv1.2";

/// PEM material extracted from a keystore descriptor.
pub struct TlsMaterial {
    /// CA certificate chain, raw PEM bytes.
    pub ca_pem: Vec<u8>,
    /// Client identity as (certificate PEM, private key PEM), when an alias
    /// was configured and both files exist.
    pub client: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterial {
    /// Loads and sanity-checks the material behind `descriptor`.
    pub fn load(descriptor: &KeystoreDescriptor) -> Result<Self> {
        let ca_pem = std::fs::read(&descriptor.path)
            .map_err(|e| ConnectorError::Tls(format!("reading '{}': {e}", descriptor.path)))?;
        let certs = rustls_pemfile::certs(&mut Cursor::new(&ca_pem))
            .map_err(|e| ConnectorError::Tls(format!("parsing '{}': {e}", descriptor.path)))?;
        if certs.is_empty() {
            return Err(ConnectorError::Tls(format!(
                "no certificate found in '{}'",
                descriptor.path
            )));
        }

        let client = match &descriptor.key_alias {
            Some(alias) => Some(Self::load_identity(&descriptor.path, alias)?),
            None => None,
        };
        Ok(Self { ca_pem, client })
    }

    fn load_identity(ca_path: &str, alias: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let dir = Path::new(ca_path).parent().unwrap_or_else(|| Path::new("."));
        let cert_path = dir.join(format!("{alias}.crt"));
        let key_path = dir.join(format!("{alias}.key"));
        let cert = std::fs::read(&cert_path).map_err(|e| {
            ConnectorError::Tls(format!("reading '{}': {e}", cert_path.display()))
        })?;
        let key = std::fs::read(&key_path)
            .map_err(|e| ConnectorError::Tls(format!("reading '{}': {e}", key_path.display())))?;
        let items = rustls_pemfile::read_all(&mut Cursor::new(&key))
            .map_err(|e| ConnectorError::Tls(format!("parsing '{}': {e}", key_path.display())))?;
        let has_key = items.iter().any(|item| {
            matches!(
                item,
                rustls_pemfile::Item::RSAKey(_)
                    | rustls_pemfile::Item::PKCS8Key(_)
                    | rustls_pemfile::Item::ECKey(_)
            )
        });
        if !has_key {
            return Err(ConnectorError::Tls(format!(
                "no private key found in '{}'",
                key_path.display()
            )));
        }
        Ok((cert, key))
    }
}

/// Resolves the TLS material for a connect attempt. `None` means connect
/// unencrypted, either because no keystore is configured or because loading
/// failed (logged as a warning).
pub fn resolve(params: &ConnectorParameter) -> Option<TlsMaterial> {
    let descriptor = params.keystore()?;
    match TlsMaterial::load(descriptor) {
        Ok(material) => {
            if !descriptor.hostname_verification {
                debug!("TLS hostname verification disabled");
            }
            Some(material)
        }
        Err(e) => {
            warn!(error = %e, "loading keystore failed. Trying with no TLS/encryption.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keystore_file_is_a_tls_error() {
        let descriptor = KeystoreDescriptor::new("/nonexistent/ca.pem");
        assert!(matches!(
            TlsMaterial::load(&descriptor),
            Err(ConnectorError::Tls(_))
        ));
    }

    #[test]
    fn resolve_without_keystore_is_unencrypted() {
        let params = crate::config::ConnectorParameterBuilder::new("h", 1).build();
        assert!(resolve(&params).is_none());
    }

    #[test]
    fn resolve_with_broken_keystore_degrades() {
        let params = crate::config::ConnectorParameterBuilder::new("h", 1)
            .keystore(KeystoreDescriptor::new("/nonexistent/ca.pem"))
            .build();
        assert!(resolve(&params).is_none());
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let dir = std::env::temp_dir().join("connector-tls-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("garbage.pem");
        std::fs::write(&path, b"not a certificate").unwrap();
        let descriptor = KeystoreDescriptor::new(path.to_string_lossy().to_string());
        assert!(TlsMaterial::load(&descriptor).is_err());
    }
}
