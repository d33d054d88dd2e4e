use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Nonce,
};

use super::{CryptoError, Result};

/// Encrypt with AES-128-GCM, returning ciphertext with appended 16-byte auth tag.
pub fn aes128_gcm_encrypt(
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if key.len() != 16 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 16,
            got: key.len(),
        });
    }
    if nonce.len() != 12 {
        return Err(CryptoError::GcmEncrypt(format!(
            "invalid nonce length: expected 12, got {}",
            nonce.len()
        )));
    }

    let cipher =
        Aes128Gcm::new_from_slice(key).map_err(|e| CryptoError::GcmEncrypt(e.to_string()))?;

    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(nonce, payload)
        .map_err(|e| CryptoError::GcmEncrypt(e.to_string()))
}

/// Decrypt AES-128-GCM ciphertext, verifying the auth tag and AAD.
pub fn aes128_gcm_decrypt(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if key.len() != 16 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 16,
            got: key.len(),
        });
    }
    if nonce.len() != 12 {
        return Err(CryptoError::GcmDecrypt(format!(
            "invalid nonce length: expected 12, got {}",
            nonce.len()
        )));
    }

    let cipher =
        Aes128Gcm::new_from_slice(key).map_err(|e| CryptoError::GcmDecrypt(e.to_string()))?;

    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| CryptoError::GcmDecrypt(e.to_string()))
}

/// AES-128-GCM context for an encrypted RTSP control channel.
///
/// Keyed with the client-supplied `rikey`; the IV counter increments per
/// sealed message so each nonce is used once within the session.
pub struct SessionCipher {
    key: [u8; 16],
    iv_counter: u64,
}

impl SessionCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 16 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 16,
                got: key.len(),
            });
        }
        let mut k = [0u8; 16];
        k.copy_from_slice(key);
        Ok(Self {
            key: k,
            iv_counter: 0,
        })
    }

    pub fn iv_counter(&self) -> u64 {
        self.iv_counter
    }

    /// Seal a message with the next IV, returning (sequence, ciphertext).
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<(u64, Vec<u8>)> {
        let seq = self.iv_counter;
        self.iv_counter += 1;
        let nonce = Self::nonce_for(seq);
        let ct = aes128_gcm_encrypt(&self.key, &nonce, plaintext, aad)?;
        Ok((seq, ct))
    }

    /// Open a message sealed under the given sequence number.
    pub fn open(&self, seq: u64, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::nonce_for(seq);
        aes128_gcm_decrypt(&self.key, &nonce, ciphertext, aad)
    }

    fn nonce_for(seq: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&seq.to_be_bytes());
        nonce
    }
}
