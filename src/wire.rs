//! Wire formats (v1)
//!
//! Buffer payload, all integers little-endian:
//!   format_version[1] || key_version[i32]
//!   || salt_len[i32] || salt || iv_len[i32] || iv || content_len[i32] || content
//!
//! File container:
//!   key_version[i32] || salt_len[i32] || salt || iv_len[i32] || iv || sealed chunks
//!
//! content = AES-256-GCM ciphertext || tag[16]

use crate::error::{CryptError, Result};
use crate::payload::EncryptedPayload;

/// Protocol identifier for KDF domain separation
pub const PROTOCOL_ID: &[u8] = b"chartlock-v1";

/// Buffer payload format tag
pub const FORMAT_VERSION: u8 = 0x01;

pub const SALT_BYTES: usize = 16;
pub const IV_BYTES: usize = 16;
pub const TAG_BYTES: usize = 16;
pub const DATA_KEY_BYTES: usize = 32;

/// Plaintext bytes per sealed file chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// On-disk size of every non-final chunk.
pub const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_BYTES;

/// Upper bound for salt and IV length fields; anything larger is garbage.
pub const MAX_HEADER_FIELD_BYTES: usize = 1024;

/// AAD bound to every buffer payload.
pub fn payload_aad(key_version: i32) -> [u8; 5] {
    let v = key_version.to_le_bytes();
    [FORMAT_VERSION, v[0], v[1], v[2], v[3]]
}

/// Validate a length prefix read from untrusted input.
pub fn field_len(raw: i32, max: usize, what: &'static str) -> Result<usize> {
    let len = usize::try_from(raw).map_err(|_| CryptError::MalformedPayload(what))?;
    if len > max {
        return Err(CryptError::MalformedPayload(what));
    }
    Ok(len)
}

fn len_prefix(len: usize) -> Result<[u8; 4]> {
    i32::try_from(len)
        .map(i32::to_le_bytes)
        .map_err(|_| CryptError::InvalidArgument("field longer than i32::MAX bytes"))
}

// ---------------------------------------------------------------------------
// Buffer payload
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CryptError::MalformedPayload("truncated payload"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn i32_le(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn field(&mut self, max: usize, what: &'static str) -> Result<&'a [u8]> {
        let len = field_len(self.i32_le()?, max, what)?;
        self.take(len)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

pub fn encode_payload(payload: &EncryptedPayload) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(
        1 + 4 * 4 + payload.salt.len() + payload.iv.len() + payload.content.len(),
    );

    out.push(FORMAT_VERSION);
    out.extend_from_slice(&payload.key_version.to_le_bytes());
    for field in [&payload.salt, &payload.iv, &payload.content] {
        out.extend_from_slice(&len_prefix(field.len())?);
        out.extend_from_slice(field);
    }

    Ok(out)
}

pub fn decode_payload(data: &[u8]) -> Result<EncryptedPayload> {
    let (&format, _) = data
        .split_first()
        .ok_or(CryptError::MalformedPayload("empty input"))?;
    if format != FORMAT_VERSION {
        return Err(CryptError::UnsupportedFormat(format));
    }

    let mut r = Reader { buf: data, pos: 1 };
    let key_version = r.i32_le()?;
    let salt = r.field(MAX_HEADER_FIELD_BYTES, "salt length out of range")?;
    let iv = r.field(MAX_HEADER_FIELD_BYTES, "iv length out of range")?;
    let content = r.field(r.remaining().saturating_sub(4), "content length out of range")?;

    if r.remaining() != 0 {
        return Err(CryptError::MalformedPayload("trailing bytes after content"));
    }

    Ok(EncryptedPayload {
        key_version,
        salt: salt.to_vec(),
        iv: iv.to_vec(),
        content: content.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// File container header
// ---------------------------------------------------------------------------

/// Parameters stored in front of the sealed chunks of a file container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub key_version: i32,
    pub salt: Vec<u8>,
    pub iv: [u8; IV_BYTES],
}

impl FileHeader {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(4 * 3 + self.salt.len() + IV_BYTES);
        out.extend_from_slice(&self.key_version.to_le_bytes());
        out.extend_from_slice(&len_prefix(self.salt.len())?);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&len_prefix(IV_BYTES)?);
        out.extend_from_slice(&self.iv);
        Ok(out)
    }

    /// Bytes the header occupies on disk.
    pub fn encoded_len(&self) -> usize {
        4 * 3 + self.salt.len() + IV_BYTES
    }

    /// Parse a header from the front of `data`, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader { buf: data, pos: 0 };
        let key_version = r.i32_le()?;
        let salt = r.field(MAX_HEADER_FIELD_BYTES, "salt length out of range")?.to_vec();
        let iv = r.field(MAX_HEADER_FIELD_BYTES, "iv length out of range")?;
        let iv: [u8; IV_BYTES] = iv
            .try_into()
            .map_err(|_| CryptError::MalformedPayload("file iv must be 16 bytes"))?;
        Ok((
            Self {
                key_version,
                salt,
                iv,
            },
            r.pos,
        ))
    }
}
