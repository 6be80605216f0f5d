//! Chunked AEAD for file containers.
//!
//! Plaintext is cut into `CHUNK_SIZE` pieces, each sealed on its own:
//!
//!   nonce = iv with its last 8 bytes XORed with the chunk index (big-endian)
//!   aad   = key_version LE || chunk index BE || final flag
//!
//! Only the last chunk carries `final = 1`, so dropping, reordering or
//! appending chunks fails authentication.

use zeroize::Zeroizing;

use crate::aead;
use crate::error::{CryptError, Result};
use crate::wire::{CHUNK_SIZE, DATA_KEY_BYTES, IV_BYTES, SEALED_CHUNK_SIZE, TAG_BYTES};

pub fn chunk_nonce(iv: &[u8; IV_BYTES], index: u64) -> [u8; IV_BYTES] {
    let mut nonce = *iv;
    for (n, i) in nonce[IV_BYTES - 8..].iter_mut().zip(index.to_be_bytes()) {
        *n ^= i;
    }
    nonce
}

pub fn chunk_aad(key_version: i32, index: u64, last: bool) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..4].copy_from_slice(&key_version.to_le_bytes());
    aad[4..12].copy_from_slice(&index.to_be_bytes());
    aad[12] = u8::from(last);
    aad
}

// ---------------------------------------------------------------------------
// Sealer
// ---------------------------------------------------------------------------

/// Incremental encryptor. Feed plaintext with `update`, close with `finish`.
pub struct ChunkSealer {
    key: Zeroizing<[u8; DATA_KEY_BYTES]>,
    iv: [u8; IV_BYTES],
    key_version: i32,
    index: u64,
    pending: Zeroizing<Vec<u8>>,
}

impl ChunkSealer {
    pub fn new(key: Zeroizing<[u8; DATA_KEY_BYTES]>, iv: [u8; IV_BYTES], key_version: i32) -> Self {
        Self {
            key,
            iv,
            key_version,
            index: 0,
            pending: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE + 1)),
        }
    }

    /// Buffer `data` and return every chunk that is now known not to be last.
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let mut out = Vec::new();
        // A full chunk is only sealed once a byte beyond it proves it is not final.
        while self.pending.len() > CHUNK_SIZE {
            let chunk = Zeroizing::new(self.pending.drain(..CHUNK_SIZE).collect::<Vec<u8>>());
            out.extend_from_slice(&self.seal(&chunk, false)?);
        }
        Ok(out)
    }

    /// Seal whatever remains as the final chunk (possibly empty).
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let chunk = std::mem::take(&mut *self.pending);
        let chunk = Zeroizing::new(chunk);
        self.seal(&chunk, true)
    }

    fn seal(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(&self.iv, self.index);
        let aad = chunk_aad(self.key_version, self.index, last);
        let sealed = aead::seal(&self.key, &nonce, chunk, &aad)
            .map_err(|_| CryptError::InvalidArgument("chunk exceeds cipher limits"))?;
        self.index += 1;
        Ok(sealed)
    }
}

// ---------------------------------------------------------------------------
// Opener
// ---------------------------------------------------------------------------

/// Incremental decryptor, the mirror of [`ChunkSealer`].
pub struct ChunkOpener {
    key: Zeroizing<[u8; DATA_KEY_BYTES]>,
    iv: [u8; IV_BYTES],
    key_version: i32,
    index: u64,
    pending: Vec<u8>,
}

impl ChunkOpener {
    pub fn new(key: Zeroizing<[u8; DATA_KEY_BYTES]>, iv: [u8; IV_BYTES], key_version: i32) -> Self {
        Self {
            key,
            iv,
            key_version,
            index: 0,
            pending: Vec::with_capacity(SEALED_CHUNK_SIZE + 1),
        }
    }

    /// Buffer sealed bytes and return plaintext of every chunk known not to be last.
    pub fn update(&mut self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.pending.extend_from_slice(data);
        let mut out = Zeroizing::new(Vec::new());
        while self.pending.len() > SEALED_CHUNK_SIZE {
            let chunk: Vec<u8> = self.pending.drain(..SEALED_CHUNK_SIZE).collect();
            let plain = self.open(&chunk, false)?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }

    /// Open the remaining bytes as the final chunk.
    pub fn finish(mut self) -> Result<Zeroizing<Vec<u8>>> {
        if self.pending.len() < TAG_BYTES {
            return Err(CryptError::DecryptionFailed {
                key_version: self.key_version,
            });
        }
        let chunk = std::mem::take(&mut self.pending);
        self.open(&chunk, true)
    }

    fn open(&mut self, chunk: &[u8], last: bool) -> Result<Zeroizing<Vec<u8>>> {
        let nonce = chunk_nonce(&self.iv, self.index);
        let aad = chunk_aad(self.key_version, self.index, last);
        let plain = aead::open(&self.key, &nonce, chunk, &aad).map_err(|_| {
            CryptError::DecryptionFailed {
                key_version: self.key_version,
            }
        })?;
        self.index += 1;
        Ok(Zeroizing::new(plain))
    }
}
