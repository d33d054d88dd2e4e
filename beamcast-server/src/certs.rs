//! Server TLS identity.
//!
//! The host keeps one long-term self-signed RSA certificate. Clients pin
//! its signature field during pairing, so it must stay stable across
//! restarts: it is generated once and persisted next to the private key.
//! RSA (not ECDSA) because the pairing handshake signs and verifies with
//! RSA-SHA256 against this certificate.

use std::path::Path;

use rsa::pkcs8::EncodePrivateKey;

use crate::error::{Result, ServerError};

/// The server's PEM certificate and private key, loaded at startup.
#[derive(Clone)]
pub struct ServerIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Load the identity from the configured paths, generating and persisting
/// a fresh one when either file is missing.
pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<ServerIdentity> {
    if cert_path.exists() && key_path.exists() {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        tracing::info!(cert = %cert_path.display(), "loaded server certificate");
        return Ok(ServerIdentity { cert_pem, key_pem });
    }

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "generating self-signed server certificate"
    );
    let identity = generate()?;

    for path in [cert_path, key_path] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    std::fs::write(cert_path, &identity.cert_pem)?;
    std::fs::write(key_path, &identity.key_pem)?;

    Ok(identity)
}

pub(crate) fn generate() -> Result<ServerIdentity> {
    let rsa_key = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048)
        .map_err(|e| ServerError::Crypto(format!("RSA key generation failed: {e}")))?;
    let key_der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| ServerError::Crypto(format!("PKCS8 encoding failed: {e}")))?;
    let key_pair = rcgen::KeyPair::try_from(key_der.as_bytes())
        .map_err(|e| ServerError::Crypto(format!("key import failed: {e}")))?;

    let mut params = rcgen::CertificateParams::new(Vec::<String>::new())
        .map_err(|e| ServerError::Crypto(e.to_string()))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "Beamcast Gamestream Host");

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| ServerError::Crypto(format!("self-signing failed: {e}")))?;

    Ok(ServerIdentity {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}
