use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use super::{CryptoError, Result};

const BLOCK: usize = 16;

/// Encrypt with AES-128-ECB, no padding. The input must be a whole number
/// of 16-byte blocks.
pub fn ecb_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() % BLOCK != 0 {
        return Err(CryptoError::EcbEncrypt(format!(
            "input length {} is not a multiple of the block size",
            plaintext.len()
        )));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = plaintext.to_vec();
    for block in out.chunks_exact_mut(BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

/// Decrypt AES-128-ECB ciphertext, no padding.
pub fn ecb_decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() % BLOCK != 0 {
        return Err(CryptoError::EcbDecrypt(format!(
            "input length {} is not a multiple of the block size",
            ciphertext.len()
        )));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = ciphertext.to_vec();
    for block in out.chunks_exact_mut(BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}
