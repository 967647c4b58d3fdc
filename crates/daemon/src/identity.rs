//! TLS identity bootstrap.
//!
//! The listener presents a certificate and private key kept as PEM files
//! under the configured `ssl` directory. On first start both are generated:
//! an ECDSA P-256 key and a self-signed certificate for `CN=<hostname>`.
//! Existing files are loaded unchanged.

use std::fs::{self, OpenOptions};
use std::io::{BufReader, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Validity of a generated certificate, in days.
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Length of a generated certificate serial, in bytes.
const SERIAL_LENGTH: usize = 16;

/// Errors raised while bootstrapping or loading the TLS identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to generate identity: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("invalid PEM in {path}: {reason}")]
    Pem { path: PathBuf, reason: String },

    #[error("TLS configuration rejected the identity: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

/// The certificate and key the listener presents.
#[derive(Clone)]
pub struct Identity {
    cert_path: PathBuf,
    key_path: PathBuf,
    cert_pem: String,
    key_pem: String,
    generated: bool,
}

impl Identity {
    /// Path of the certificate file.
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Path of the private key file.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// The certificate, PEM encoded.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Whether this identity was generated during this bootstrap.
    pub fn was_generated(&self) -> bool {
        self.generated
    }

    /// Parses the certificate chain.
    pub fn certificates(&self) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
        let mut reader = BufReader::new(Cursor::new(self.cert_pem.as_bytes()));
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IdentityError::Pem {
                path: self.cert_path.clone(),
                reason: e.to_string(),
            })?;

        if certs.is_empty() {
            return Err(IdentityError::Pem {
                path: self.cert_path.clone(),
                reason: "no certificate found".into(),
            });
        }
        Ok(certs)
    }

    fn private_key(&self) -> Result<PrivateKeyDer<'static>, IdentityError> {
        let mut reader = BufReader::new(Cursor::new(self.key_pem.as_bytes()));
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| IdentityError::Pem {
                path: self.key_path.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| IdentityError::Pem {
                path: self.key_path.clone(),
                reason: "no private key found".into(),
            })
    }

    /// SHA-256 fingerprint of the leaf certificate.
    ///
    /// Formatted as colon-separated hex bytes, for example `3f:a1:...`.
    pub fn fingerprint(&self) -> Result<String, IdentityError> {
        let certs = self.certificates()?;
        let digest = Sha256::digest(certs[0].as_ref());
        Ok(digest
            .iter()
            .map(|byte| hex::encode([*byte]))
            .collect::<Vec<_>>()
            .join(":"))
    }

    /// Builds the TLS acceptor the listener wraps connections with.
    pub fn tls_acceptor(&self) -> Result<TlsAcceptor, IdentityError> {
        let certs = self.certificates()?;
        let key = self.private_key()?;

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("generated", &self.generated)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Ensures a certificate and key exist at the given paths.
///
/// When both files are present and readable they are returned unchanged,
/// without checking expiry or that the key matches the certificate.
/// Otherwise a fresh pair is generated and written atomically, replacing
/// any partial leftovers. Parent directories are created as needed.
pub fn ensure_identity(
    cert_path: &Path,
    key_path: &Path,
    hostname: &str,
) -> Result<Identity, IdentityError> {
    if let (Ok(cert_pem), Ok(key_pem)) =
        (fs::read_to_string(cert_path), fs::read_to_string(key_path))
    {
        tracing::info!(cert = %cert_path.display(), "Loaded existing TLS identity");
        return Ok(Identity {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            cert_pem,
            key_pem,
            generated: false,
        });
    }

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        hostname,
        "Generating self-signed TLS identity"
    );

    let (cert_pem, key_pem) = generate_self_signed(hostname)?;

    write_atomic(key_path, key_pem.as_bytes(), Some(0o600))?;
    write_atomic(cert_path, cert_pem.as_bytes(), None)?;

    Ok(Identity {
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
        cert_pem,
        key_pem,
        generated: true,
    })
}

/// Generates a key pair and a self-signed certificate, both PEM encoded.
fn generate_self_signed(hostname: &str) -> Result<(String, String), IdentityError> {
    let mut params = CertificateParams::new(vec![hostname.to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, hostname);

    let mut serial = [0u8; SERIAL_LENGTH];
    rand::thread_rng().fill_bytes(&mut serial);
    // Keep the DER integer positive.
    serial[0] &= 0x7f;
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(CERT_VALIDITY_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Writes `contents` to a temp file beside `path`, then renames it over `path`.
fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), IdentityError> {
    let io_err = |source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Some(mode) = mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&temp_path).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(io_err)?;
    Ok(())
}
