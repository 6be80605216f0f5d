//! KDF (v1)
//!
//! info = PROTOCOL_ID || "|" || label || "|" || key_version LE
//! key  = HKDF-SHA256(ikm = key material, salt = per-payload salt, info, len = 32)

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptError, Result};
use crate::wire::{DATA_KEY_BYTES, PROTOCOL_ID};

/// Label for buffer payload keys.
pub const LABEL_DATA: &[u8] = b"data";
/// Label for file container keys.
pub const LABEL_FILE: &[u8] = b"file";

pub fn derive_key(
    master: &[u8],
    salt: &[u8],
    key_version: i32,
    label: &[u8],
) -> Result<Zeroizing<[u8; DATA_KEY_BYTES]>> {
    let mut info = Vec::with_capacity(PROTOCOL_ID.len() + 2 + label.len() + 4);
    info.extend_from_slice(PROTOCOL_ID);
    info.push(b'|');
    info.extend_from_slice(label);
    info.push(b'|');
    info.extend_from_slice(&key_version.to_le_bytes());

    let hk = Hkdf::<Sha256>::new(Some(salt), master);
    let mut out = Zeroizing::new([0u8; DATA_KEY_BYTES]);
    hk.expand(&info, &mut out[..])
        .map_err(|_| CryptError::InvalidArgument("hkdf output length"))?;
    Ok(out)
}
