// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! XChaCha20-Poly1305 envelope for private keys and KYC fields.
//!
//! Ciphertext format: `v1:` followed by base64 of `nonce (24 bytes) || ct`.
//! Callers bind every ciphertext to its owner through the associated data
//! (the wallet address for signing keys), so a ciphertext moved to another
//! record fails authentication.

use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const PREFIX: &str = "v1:";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("encryption key is not valid base64")]
    InvalidKeyEncoding,

    #[error("ciphertext is malformed")]
    MalformedCiphertext,

    #[error("ciphertext failed authentication")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidPlaintext,
}

/// Process-scoped AEAD keyed by a 32-byte secret.
pub struct KeyEncryptor {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for KeyEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEncryptor").finish_non_exhaustive()
    }
}

impl KeyEncryptor {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build from the base64 form used in configuration.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let key = Zeroizing::new(
            Base64::decode_vec(encoded.trim()).map_err(|_| CryptoError::InvalidKeyEncoding)?,
        );
        Self::new(&key)
    }

    /// A random key that lives only as long as the process.
    pub fn ephemeral() -> Result<Self, CryptoError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        Self::new(key.as_ref())
    }

    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{PREFIX}{}", Base64::encode_string(&sealed)))
    }

    pub fn decrypt(
        &self,
        ciphertext: &str,
        associated_data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let body = ciphertext
            .strip_prefix(PREFIX)
            .ok_or(CryptoError::MalformedCiphertext)?;
        let sealed = Base64::decode_vec(body).map_err(|_| CryptoError::MalformedCiphertext)?;
        if sealed.len() <= NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce, ct) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ct,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(Zeroizing::new(plaintext))
    }

    pub fn encrypt_str(&self, plaintext: &str, associated_data: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes(), associated_data.as_bytes())
    }

    pub fn decrypt_str(
        &self,
        ciphertext: &str,
        associated_data: &str,
    ) -> Result<Zeroizing<String>, CryptoError> {
        let bytes = self.decrypt(ciphertext, associated_data.as_bytes())?;
        let text = std::str::from_utf8(&bytes).map_err(|_| CryptoError::InvalidPlaintext)?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}
