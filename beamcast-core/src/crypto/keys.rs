use sha2::{Digest, Sha256};

use super::{CryptoError, Result};
use crate::constants::{PAIRING_KEY_LEN, SALT_HEX_MIN};

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the AES-128 pairing key from the transmitted salt and the PIN.
///
/// The salt arrives hex-encoded; only its first 32 hex characters (16
/// bytes) participate. The key is the first 16 bytes of
/// `SHA-256(salt_bytes || pin_bytes)`. The PIN is normally a 4-digit ASCII
/// string, but the silent-failure OTP path feeds raw random bytes instead.
pub fn derive_pairing_key(salt_hex: &str, pin: &[u8]) -> Result<[u8; PAIRING_KEY_LEN]> {
    if salt_hex.len() < SALT_HEX_MIN {
        return Err(CryptoError::Hex(format!(
            "salt too short: expected at least {SALT_HEX_MIN} hex chars, got {}",
            salt_hex.len()
        )));
    }

    // Byte-wise slice: the salt is attacker-supplied and need not be ASCII.
    let salt_bytes = hex::decode(&salt_hex.as_bytes()[..SALT_HEX_MIN])
        .map_err(|e| CryptoError::Hex(format!("invalid salt: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&salt_bytes);
    hasher.update(pin);
    let digest = hasher.finalize();

    let mut key = [0u8; PAIRING_KEY_LEN];
    key.copy_from_slice(&digest[..PAIRING_KEY_LEN]);
    Ok(key)
}

/// Hash an OTP registration against the transmitted salt, as the client
/// computes it: `SHA-256(pin || salt_hex || passphrase)` over the literal
/// ASCII strings, hex-encoded uppercase.
pub fn otp_auth_hash(pin: &str, salt_hex: &str, passphrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(salt_hex.as_bytes());
    hasher.update(passphrase.as_bytes());
    hex::encode_upper(hasher.finalize())
}
