//! AEAD: AES-256-GCM with a 16-byte IV

use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit, Payload},
    aes::Aes256,
    AesGcm, Nonce,
};
use getrandom::getrandom;

use crate::error::{CryptError, Result};
use crate::wire::{DATA_KEY_BYTES, IV_BYTES};

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Fill an array from the operating system CSPRNG.
pub fn random<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    getrandom(&mut out).map_err(CryptError::Randomness)?;
    Ok(out)
}

/// AEAD seal. Fails only for inputs beyond the GCM length limit.
pub fn seal(
    key: &[u8; DATA_KEY_BYTES],
    iv: &[u8; IV_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> std::result::Result<Vec<u8>, aes_gcm::Error> {
    let cipher = Aes256Gcm16::new(key.into());
    let payload = Payload { msg: plaintext, aad };
    cipher.encrypt(Nonce::<U16>::from_slice(iv), payload)
}

/// AEAD open. Every failure looks the same to the caller.
pub fn open(
    key: &[u8; DATA_KEY_BYTES],
    iv: &[u8; IV_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> std::result::Result<Vec<u8>, aes_gcm::Error> {
    let cipher = Aes256Gcm16::new(key.into());
    let payload = Payload { msg: ciphertext, aad };
    cipher.decrypt(Nonce::<U16>::from_slice(iv), payload)
}
