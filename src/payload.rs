//! The buffer payload type.

use crate::error::Result;
use crate::wire::{self, FORMAT_VERSION};

/// Result of encrypting one buffer.
///
/// `key_version` records which key produced `content`; it is never changed
/// after encryption. Re-encryption produces a new payload.
///
/// `EncryptedPayload::default()` has no content and is rejected by
/// decryption with `InvalidArgument`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub key_version: i32,
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    /// Ciphertext followed by the 16-byte authentication tag.
    pub content: Vec<u8>,
}

impl EncryptedPayload {
    /// Wire format tag; always 1.
    pub const fn format_version(&self) -> u8 {
        FORMAT_VERSION
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire::encode_payload(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        wire::decode_payload(data)
    }
}
