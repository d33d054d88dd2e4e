pub mod aes_ecb;
pub mod gcm;
pub mod keys;
pub mod random;
pub mod rsa;
pub mod x509;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("AES-ECB encryption failed: {0}")]
    EcbEncrypt(String),
    #[error("AES-ECB decryption failed: {0}")]
    EcbDecrypt(String),
    #[error("AES-GCM encryption failed: {0}")]
    GcmEncrypt(String),
    #[error("AES-GCM decryption failed: {0}")]
    GcmDecrypt(String),
    #[error("RSA signing failed: {0}")]
    RsaSign(String),
    #[error("RSA verification failed: {0}")]
    RsaVerify(String),
    #[error("X.509 parse error: {0}")]
    X509(String),
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("Random generation failed: {0}")]
    Random(String),
    #[error("Invalid hex: {0}")]
    Hex(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Decode hex, tolerating odd-length input by assuming a missing leading
/// nibble. The GameStream wire format is case-insensitive and some clients
/// strip leading zeros from `rikey`.
pub fn hex_decode_loose(input: &str) -> Result<Vec<u8>> {
    let decoded = if input.len() % 2 == 1 {
        let mut padded = String::with_capacity(input.len() + 1);
        padded.push('0');
        padded.push_str(input);
        hex::decode(padded)
    } else {
        hex::decode(input)
    };
    decoded.map_err(|e| CryptoError::Hex(e.to_string()))
}
