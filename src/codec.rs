//! Encryption of captured signature images at rest.
//!
//! Ciphertext layout: `nonce (12 bytes) || AES-256-GCM ciphertext || tag (16 bytes)`.

use crate::Error;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// 256 bit key used to encrypt signature images.
#[derive(Clone)]
pub struct SignatureKey([u8; 32]);

impl SignatureKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SignatureKey(bytes)
    }

    /// Key stored as base64 text, for example in an environment variable.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| Error::Config(format!("Signature key is not base64: {}", err)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::Config(format!(
                "Signature key must be 32 bytes, got {}.",
                bytes.len()
            ))
        })?;
        Ok(SignatureKey(bytes))
    }

    /// Derive a key from a free form secret.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        SignatureKey(key)
    }
}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignatureKey(..)")
    }
}

pub struct SignatureCodec {
    cipher: Aes256Gcm,
}

impl SignatureCodec {
    pub fn new(key: &SignatureKey) -> Self {
        SignatureCodec {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|err| Error::Crypto(format!("Encryption failed: {}", err)))?;

        let mut result = Vec::with_capacity(nonce.len() + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, Error> {
        if encrypted.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Crypto(format!(
                "Ciphertext too short: {} bytes.",
                encrypted.len()
            )));
        }
        let (nonce, ciphertext) = encrypted.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("Ciphertext failed the integrity check.".to_owned()))
    }

    /// Encrypt and encode for a text column.
    pub fn encrypt_to_base64(&self, plaintext: &[u8]) -> Result<String, Error> {
        Ok(STANDARD.encode(self.encrypt(plaintext)?))
    }

    pub fn decrypt_from_base64(&self, encoded: &str) -> Result<Vec<u8>, Error> {
        let encrypted = STANDARD
            .decode(encoded)
            .map_err(|err| Error::Crypto(format!("Ciphertext is not base64: {}", err)))?;
        self.decrypt(&encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SignatureCodec {
        SignatureCodec::new(&SignatureKey::from_passphrase("unit-test"))
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let codec = codec();
        let cases: [&[u8]; 4] = [b"", b"x", &[0u8; 4096], b"\x89PNG\r\n\x1a\n"];
        for plaintext in cases {
            let encrypted = codec.encrypt(plaintext).unwrap();
            assert_eq!(codec.decrypt(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let codec = codec();
        assert_ne!(codec.encrypt(b"same").unwrap(), codec.encrypt(b"same").unwrap());
    }

    #[test]
    fn flipped_bit_fails() {
        let codec = codec();
        let mut encrypted = codec.encrypt(b"signature image").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(codec.decrypt(&encrypted), Err(Error::Crypto(_))));
        encrypted[last] ^= 0x01;
        encrypted[NONCE_LEN] ^= 0x80;
        assert!(matches!(codec.decrypt(&encrypted), Err(Error::Crypto(_))));
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = codec().encrypt(b"signature image").unwrap();
        let other = SignatureCodec::new(&SignatureKey::from_passphrase("other"));
        assert!(matches!(other.decrypt(&encrypted), Err(Error::Crypto(_))));
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(codec().decrypt(&[0u8; 20]), Err(Error::Crypto(_))));
    }

    #[test]
    fn base64_key_must_be_32_bytes() {
        assert!(SignatureKey::from_base64(&STANDARD.encode([7u8; 32])).is_ok());
        assert!(matches!(
            SignatureKey::from_base64(&STANDARD.encode([7u8; 16])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn base64_round_trip() {
        let codec = codec();
        let text = codec.encrypt_to_base64(b"abc").unwrap();
        assert_eq!(codec.decrypt_from_base64(&text).unwrap(), b"abc");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_bytes_survive_encryption(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
            let codec = SignatureCodec::new(&SignatureKey::from_passphrase("prop"));
            let encrypted = codec.encrypt(&plaintext).unwrap();
            prop_assert_eq!(encrypted.len(), plaintext.len() + NONCE_LEN + TAG_LEN);
            prop_assert_eq!(codec.decrypt(&encrypted).unwrap(), plaintext);
        }

        #[test]
        fn any_flipped_bit_is_detected(
            plaintext in prop::collection::vec(any::<u8>(), 0..256),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let codec = SignatureCodec::new(&SignatureKey::from_passphrase("prop"));
            let mut encrypted = codec.encrypt(&plaintext).unwrap();
            let index = position.index(encrypted.len());
            encrypted[index] ^= 1 << bit;
            prop_assert!(matches!(codec.decrypt(&encrypted), Err(Error::Crypto(_))));
        }
    }
}
