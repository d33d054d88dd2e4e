use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use super::{CryptoError, Result};

/// Extract the DER certificate body from a PEM document.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let (_, parsed) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| CryptoError::X509(format!("invalid PEM: {e}")))?;
    Ok(parsed.contents)
}

/// The raw signature field of a DER-encoded certificate.
///
/// The pairing handshake mixes this value into its challenge hashes, so it
/// must be the signature BIT STRING exactly as it appears on the wire.
pub fn signature_bytes(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::X509(format!("invalid certificate: {e}")))?;
    Ok(cert.signature_value.data.to_vec())
}

/// The DER-encoded SubjectPublicKeyInfo of a certificate.
pub fn spki_der(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::X509(format!("invalid certificate: {e}")))?;
    Ok(cert.public_key().raw.to_vec())
}

/// The certificate's subject, for log lines.
pub fn subject_string(cert_der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::X509(format!("invalid certificate: {e}")))?;
    Ok(cert.subject().to_string())
}

/// Whether a presented certificate matches a previously authorized one.
///
/// Clients re-present their long-term self-issued certificate on every
/// connection, so byte equality is the common case. Renewed certificates
/// from the same identity are accepted when they chain to the stored
/// certificate: issuer matches the stored subject and the signature
/// verifies under the stored key.
pub fn matches_authorized(presented_der: &[u8], stored_pem: &str) -> bool {
    let stored_der = match pem_to_der(stored_pem) {
        Ok(der) => der,
        Err(_) => return false,
    };

    if presented_der == stored_der.as_slice() {
        return true;
    }

    let Ok((_, presented)) = X509Certificate::from_der(presented_der) else {
        return false;
    };
    let Ok((_, stored)) = X509Certificate::from_der(&stored_der) else {
        return false;
    };

    presented.issuer() == stored.subject()
        && presented.verify_signature(Some(stored.public_key())).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_pem(cn: &str) -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_pem_to_der_roundtrip_parses() {
        let pem = self_signed_pem("unit-test");
        let der = pem_to_der(&pem).unwrap();
        assert!(X509Certificate::from_der(&der).is_ok());
    }

    #[test]
    fn test_signature_bytes_nonempty() {
        let pem = self_signed_pem("unit-test");
        let der = pem_to_der(&pem).unwrap();
        let sig = signature_bytes(&der).unwrap();
        assert!(!sig.is_empty());
    }

    #[test]
    fn test_matches_authorized_same_cert() {
        let pem = self_signed_pem("device-a");
        let der = pem_to_der(&pem).unwrap();
        assert!(matches_authorized(&der, &pem));
    }

    #[test]
    fn test_matches_authorized_rejects_other_identity() {
        let stored = self_signed_pem("device-a");
        let other = self_signed_pem("device-b");
        let other_der = pem_to_der(&other).unwrap();
        assert!(!matches_authorized(&other_der, &stored));
    }

    #[test]
    fn test_matches_authorized_garbage_input() {
        let stored = self_signed_pem("device-a");
        assert!(!matches_authorized(b"not a certificate", &stored));
        let der = pem_to_der(&stored).unwrap();
        assert!(!matches_authorized(&der, "not pem"));
    }
}
