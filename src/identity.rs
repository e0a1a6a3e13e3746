//! The node's certificate and the identity derived from it.

use std::fmt::{self, Debug, Formatter};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::info;

use crate::common::Id;
use crate::{Error, Result};

/// Subject alternative name of generated certificates and the TLS server name used to dial.
pub const SERVER_NAME: &str = "pie-tracker";

/// A leaf certificate with its private key.
pub struct Certificate {
    der: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

impl Certificate {
    /// Generate a fresh self-signed certificate.
    pub fn generate() -> Result<Certificate> {
        let (certificate, _, _) = Self::generate_pem()?;
        Ok(certificate)
    }

    /// Read the PEM encoded certificate and key at the given paths.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Certificate> {
        let der = CertificateDer::from_pem_file(cert_path)
            .map_err(|e| Error::Certificate(format!("{}: {e}", cert_path.display())))?;
        let key = PrivateKeyDer::from_pem_file(key_path)
            .map_err(|e| Error::Certificate(format!("{}: {e}", key_path.display())))?;

        Ok(Certificate { der, key })
    }

    /// Load the certificate at `cert_path`, or generate and persist one if there is none yet.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Certificate> {
        if cert_path.exists() {
            return Self::load(cert_path, key_path);
        }

        let (certificate, cert_pem, key_pem) = Self::generate_pem()?;

        write_file(cert_path, cert_pem.as_bytes(), 0o644)?;
        write_file(key_path, key_pem.as_bytes(), 0o400)?;

        info!(path = ?cert_path, id = %certificate.id(), "Generated a new certificate");

        Ok(certificate)
    }

    fn generate_pem() -> Result<(Certificate, String, String)> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
                .map_err(|e| Error::Certificate(e.to_string()))?;

        let certificate = Certificate {
            der: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        };

        Ok((certificate, cert.pem(), key_pair.serialize_pem()))
    }

    // === Getters ===

    /// DER encoding of the certificate.
    pub fn der(&self) -> &[u8] {
        self.der.as_ref()
    }

    /// The identity of whoever holds this certificate.
    pub fn id(&self) -> Id {
        Id::from_certificate(self.der())
    }

    pub(crate) fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.der.clone()]
    }

    pub(crate) fn key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

impl Clone for Certificate {
    fn clone(&self) -> Self {
        Certificate {
            der: self.der.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl Debug for Certificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path)?;
    file.write_all(contents)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_certificates_differ() {
        let a = Certificate::generate().unwrap();
        let b = Certificate::generate().unwrap();

        assert_ne!(a.der(), b.der());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("id.crt");
        let key_path = dir.path().join("id.key");

        let first = Certificate::load_or_generate(&cert_path, &key_path).unwrap();
        let second = Certificate::load_or_generate(&cert_path, &key_path).unwrap();

        assert_eq!(first.der(), second.der());
        assert_eq!(first.id(), second.id());
        assert_eq!(first.id(), Id::from_certificate(second.der()));
    }

    #[test]
    fn missing_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("id.crt");
        let key_path = dir.path().join("id.key");

        Certificate::load_or_generate(&cert_path, &key_path).unwrap();
        std::fs::remove_file(&key_path).unwrap();

        assert!(matches!(
            Certificate::load(&cert_path, &key_path),
            Err(Error::Certificate(_))
        ));
    }
}
