//! Buffer encryption against a key provider.

use chartlock_keystore::KeyProvider;
use tracing::{debug, warn};

use crate::aead;
use crate::error::{CryptError, Result};
use crate::kdf::{self, LABEL_DATA};
use crate::payload::EncryptedPayload;
use crate::wire::{self, IV_BYTES, SALT_BYTES};

/// Encrypts and decrypts buffers and files with versioned keys.
///
/// New data is always sealed under the provider's current key; existing data
/// is opened with whatever version it was stamped with.
pub struct EncryptionEngine<P> {
    pub(crate) keys: P,
}

impl<P: KeyProvider> EncryptionEngine<P> {
    pub fn new(keys: P) -> Self {
        Self { keys }
    }

    /// The key provider backing this engine.
    pub fn keys(&self) -> &P {
        &self.keys
    }

    /// Encrypt `data` under the current key.
    pub fn encrypt(&self, data: &[u8]) -> Result<EncryptedPayload> {
        if data.is_empty() {
            return Err(CryptError::InvalidArgument("data is empty"));
        }

        let current = self.keys.get_current_key()?;
        let salt: [u8; SALT_BYTES] = aead::random()?;
        let iv: [u8; IV_BYTES] = aead::random()?;
        let key = kdf::derive_key(current.material.as_bytes(), &salt, current.version, LABEL_DATA)?;

        let content = aead::seal(&key, &iv, data, &wire::payload_aad(current.version))
            .map_err(|_| CryptError::InvalidArgument("data exceeds cipher limits"))?;

        debug!(key_version = current.version, bytes = data.len(), "encrypted buffer");
        Ok(EncryptedPayload {
            key_version: current.version,
            salt: salt.to_vec(),
            iv: iv.to_vec(),
            content,
        })
    }

    /// Decrypt with the key version recorded in the payload.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        if payload.content.is_empty() {
            return Err(CryptError::InvalidArgument("payload has no content"));
        }
        let iv: &[u8; IV_BYTES] = payload
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| CryptError::InvalidArgument("iv must be 16 bytes"))?;

        let version = payload.key_version;
        let material = self.keys.get_key(version)?;
        let key = kdf::derive_key(material.as_bytes(), &payload.salt, version, LABEL_DATA)?;

        let plaintext = aead::open(&key, iv, &payload.content, &wire::payload_aad(version))
            .map_err(|_| {
                warn!(key_version = version, "buffer failed authentication");
                CryptError::DecryptionFailed {
                    key_version: version,
                }
            })?;

        debug!(key_version = version, bytes = plaintext.len(), "decrypted buffer");
        Ok(plaintext)
    }

    /// Decrypt under the stamped version and re-encrypt under the current one.
    pub fn re_encrypt(&self, payload: &EncryptedPayload) -> Result<EncryptedPayload> {
        let plaintext = zeroize::Zeroizing::new(self.decrypt(payload)?);
        let fresh = self.encrypt(&plaintext)?;
        debug!(
            from_version = payload.key_version,
            to_version = fresh.key_version,
            "re-encrypted buffer"
        );
        Ok(fresh)
    }

    /// `encrypt` followed by the buffer wire encoding.
    pub fn encrypt_to_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.encrypt(data)?.to_bytes()
    }

    /// Wire decoding followed by `decrypt`.
    pub fn decrypt_from_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.decrypt(&EncryptedPayload::from_bytes(bytes)?)
    }
}
