//! The four-phase GameStream pairing handshake.
//!
//! A client that knows the PIN proves it by deriving the same AES key the
//! server derived from `(salt, pin)`, then the two sides exchange
//! ECB-encrypted challenges that mix in the signature fields of their
//! X.509 certificates. The final message binds the client's long-term
//! certificate with an RSA signature. State transitions are pure
//! functions here; transport, XML, and persistence live in the server.

use thiserror::Error;

use crate::constants::{PAIRING_KEY_LEN, SALT_HEX_MIN};
use crate::crypto::{aes_ecb, keys, random, rsa, x509, CryptoError};

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Salt too short")]
    SaltTooShort,

    #[error("Clientpairingsecret too short")]
    SecretTooShort,

    #[error("pairing key not derived yet")]
    KeyNotDerived,

    #[error("handshake out of order: missing {0}")]
    OutOfOrder(&'static str),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, PairingError>;

/// Identity the client transmitted in `getservercert`.
#[derive(Debug, Clone)]
pub struct PairingClient {
    pub unique_id: String,
    pub name: String,
    /// The client's long-term certificate, PEM text as transmitted.
    pub cert_pem: String,
}

/// Per-client state advanced by the four handshake phases.
pub struct PairingSession {
    pub client: PairingClient,
    /// Hex-encoded salt as transmitted; only the first 32 chars derive the key.
    salt: String,
    cipher_key: Option<[u8; PAIRING_KEY_LEN]>,
    client_hash: Option<Vec<u8>>,
    server_secret: Option<[u8; 16]>,
    server_challenge: Option<[u8; 16]>,
}

impl PairingSession {
    pub fn new(client: PairingClient, salt: String) -> Self {
        Self {
            client,
            salt,
            cipher_key: None,
            client_hash: None,
            server_secret: None,
            server_challenge: None,
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Phase 1: derive the session AES key from the salt and the PIN.
    ///
    /// The PIN is ASCII digits on the interactive paths; the silent-failure
    /// OTP path passes raw random bytes so a mismatched attacker derives a
    /// useless key without any distinguishing signal.
    pub fn derive_key(&mut self, pin: &[u8]) -> Result<()> {
        if self.salt.len() < SALT_HEX_MIN {
            return Err(PairingError::SaltTooShort);
        }
        self.cipher_key = Some(keys::derive_pairing_key(&self.salt, pin)?);
        Ok(())
    }

    pub fn key_derived(&self) -> bool {
        self.cipher_key.is_some()
    }

    /// Phase 2: answer the client's encrypted challenge.
    ///
    /// Decrypts the challenge, hashes it together with the server
    /// certificate's signature field and a fresh server secret, appends a
    /// fresh server challenge, and returns the 48 bytes re-encrypted.
    pub fn client_challenge(
        &mut self,
        encrypted_challenge: &[u8],
        server_cert_pem: &str,
    ) -> Result<Vec<u8>> {
        let key = self.cipher_key.ok_or(PairingError::KeyNotDerived)?;

        let challenge = aes_ecb::ecb_decrypt(&key, encrypted_challenge)?;

        let server_der = x509::pem_to_der(server_cert_pem)?;
        let server_sig = x509::signature_bytes(&server_der)?;

        let mut server_secret = [0u8; 16];
        server_secret.copy_from_slice(&random::rand_bytes(16)?);
        let mut server_challenge = [0u8; 16];
        server_challenge.copy_from_slice(&random::rand_bytes(16)?);

        let mut hashed = challenge;
        hashed.extend_from_slice(&server_sig);
        hashed.extend_from_slice(&server_secret);
        let hash = keys::sha256(&hashed);

        let mut plaintext = Vec::with_capacity(hash.len() + server_challenge.len());
        plaintext.extend_from_slice(&hash);
        plaintext.extend_from_slice(&server_challenge);

        let encrypted = aes_ecb::ecb_encrypt(&key, &plaintext)?;

        self.server_secret = Some(server_secret);
        self.server_challenge = Some(server_challenge);

        Ok(encrypted)
    }

    /// Phase 3: record the client's challenge response and reveal the
    /// server secret, signed with the server's private key.
    pub fn server_challenge_response(
        &mut self,
        encrypted_response: &[u8],
        server_key_pem: &str,
    ) -> Result<Vec<u8>> {
        let key = self.cipher_key.ok_or(PairingError::KeyNotDerived)?;
        let server_secret = self
            .server_secret
            .ok_or(PairingError::OutOfOrder("server secret"))?;

        let client_hash = aes_ecb::ecb_decrypt(&key, encrypted_response)?;
        self.client_hash = Some(client_hash);

        let signature = rsa::sign_sha256(server_key_pem, &server_secret)?;

        let mut pairing_secret = Vec::with_capacity(server_secret.len() + signature.len());
        pairing_secret.extend_from_slice(&server_secret);
        pairing_secret.extend_from_slice(&signature);
        Ok(pairing_secret)
    }

    /// Phase 4: authenticate the client's pairing secret.
    ///
    /// `Ok(true)` means the challenge hash matched and the client's
    /// signature over its secret verified under its certificate. Any
    /// cryptographic mismatch (wrong PIN, tampered payload, malformed
    /// certificate) is `Ok(false)`; only a payload of 16 bytes or fewer is
    /// a protocol error.
    pub fn client_pairing_secret(&mut self, payload: &[u8]) -> Result<bool> {
        if payload.len() <= 16 {
            return Err(PairingError::SecretTooShort);
        }
        let server_challenge = self
            .server_challenge
            .ok_or(PairingError::OutOfOrder("server challenge"))?;

        let (secret, signature) = payload.split_at(16);

        let Some(ref client_hash) = self.client_hash else {
            return Ok(false);
        };

        let Ok(client_der) = x509::pem_to_der(&self.client.cert_pem) else {
            return Ok(false);
        };
        let Ok(client_sig) = x509::signature_bytes(&client_der) else {
            return Ok(false);
        };

        let mut data = Vec::with_capacity(server_challenge.len() + client_sig.len() + secret.len());
        data.extend_from_slice(&server_challenge);
        data.extend_from_slice(&client_sig);
        data.extend_from_slice(secret);
        let expected = keys::sha256(&data);

        if client_hash.as_slice() != expected.as_slice() {
            return Ok(false);
        }

        let Ok(client_spki) = x509::spki_der(&client_der) else {
            return Ok(false);
        };
        Ok(rsa::verify_sha256(&client_spki, secret, signature).is_ok())
    }
}
