use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::{CryptoError, Result};

/// Parse an RSA private key from PEM, accepting PKCS#8 or PKCS#1 framing.
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::RsaSign(format!("invalid private key: {e}")))
}

/// RSA-SHA256 (PKCS#1 v1.5) signature over `data`.
pub fn sign_sha256(key_pem: &str, data: &[u8]) -> Result<Vec<u8>> {
    let key = private_key_from_pem(key_pem)?;
    let digest = Sha256::digest(data);

    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| CryptoError::RsaSign(e.to_string()))
}

/// Verify an RSA-SHA256 (PKCS#1 v1.5) signature against a DER-encoded
/// SubjectPublicKeyInfo.
pub fn verify_sha256(spki_der: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let key = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::RsaVerify(format!("invalid public key: {e}")))?;
    let digest = Sha256::digest(data);

    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|e| CryptoError::RsaVerify(e.to_string()))
}
