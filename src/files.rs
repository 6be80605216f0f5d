//! Streaming file encryption.
//!
//! Output is written to a hidden sibling of the destination and renamed into
//! place once the last chunk is flushed, so `dst` is either absent or
//! complete.
//!
//! Errors remove the hidden file, but a future dropped before it completes
//! cannot: the `.<name>.<random>.tmp` sibling stays behind. That file is a
//! partial container that will never decrypt and can be deleted.

use std::io;
use std::path::{Path, PathBuf};

use chartlock_keystore::KeyProvider;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use crate::aead;
use crate::engine::EncryptionEngine;
use crate::error::{CryptError, Result};
use crate::kdf::{self, LABEL_FILE};
use crate::stream::{ChunkOpener, ChunkSealer};
use crate::wire::{field_len, FileHeader, CHUNK_SIZE, IV_BYTES, MAX_HEADER_FIELD_BYTES, SALT_BYTES};

const READ_BUF_BYTES: usize = CHUNK_SIZE;

// ---------------------------------------------------------------------------
// Destination handling
// ---------------------------------------------------------------------------

/// A temp file that becomes `dst` on `commit` and disappears on `discard`.
struct PendingOutput {
    tmp: PathBuf,
    dst: PathBuf,
    file: BufWriter<File>,
    written: u64,
}

impl PendingOutput {
    async fn create(dst: &Path) -> Result<Self> {
        let name = dst
            .file_name()
            .ok_or(CryptError::InvalidArgument("destination has no file name"))?;
        let suffix: [u8; 6] = aead::random()?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(name);
        tmp_name.push(format!(".{}.tmp", hex::encode(suffix)));
        let tmp = dst.with_file_name(tmp_name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await
            .map_err(|e| CryptError::io(&tmp, e))?;
        Ok(Self {
            tmp,
            dst: dst.to_path_buf(),
            file: BufWriter::new(file),
            written: 0,
        })
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .await
            .map_err(|e| CryptError::io(&self.tmp, e))?;
        self.written += buf.len() as u64;
        Ok(())
    }

    async fn commit(mut self) -> Result<u64> {
        let flushed = async {
            self.file.flush().await?;
            self.file.get_mut().sync_all().await?;
            fs::rename(&self.tmp, &self.dst).await
        }
        .await;
        match flushed {
            Ok(()) => Ok(self.written),
            Err(e) => {
                let err = CryptError::io(&self.dst, e);
                self.discard().await;
                Err(err)
            }
        }
    }

    async fn discard(self) {
        let Self { tmp, file, .. } = self;
        drop(file);
        if let Err(e) = fs::remove_file(&tmp).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

async fn open_source(src: &Path) -> Result<File> {
    File::open(src).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            CryptError::FileNotFound(src.to_path_buf())
        } else {
            CryptError::io(src, e)
        }
    })
}

async fn ensure_distinct(src: &Path, dst: &Path) -> Result<()> {
    if src == dst {
        return Err(CryptError::InvalidArgument("source and destination are the same file"));
    }
    if let (Ok(a), Ok(b)) = (fs::canonicalize(src).await, fs::canonicalize(dst).await) {
        if a == b {
            return Err(CryptError::InvalidArgument("source and destination are the same file"));
        }
    }
    Ok(())
}

/// Fill `buf` as far as the reader allows; returns bytes read (0 at EOF).
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8], path: &Path) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| CryptError::io(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn read_header<R: AsyncRead + Unpin>(reader: &mut R, path: &Path) -> Result<FileHeader> {
    let truncated = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CryptError::MalformedPayload("truncated file header")
        } else {
            CryptError::io(path, e)
        }
    };

    let key_version = reader.read_i32_le().await.map_err(truncated)?;

    let salt_len = field_len(
        reader.read_i32_le().await.map_err(truncated)?,
        MAX_HEADER_FIELD_BYTES,
        "salt length out of range",
    )?;
    let mut salt = vec![0u8; salt_len];
    reader.read_exact(&mut salt).await.map_err(truncated)?;

    let iv_len = field_len(
        reader.read_i32_le().await.map_err(truncated)?,
        MAX_HEADER_FIELD_BYTES,
        "iv length out of range",
    )?;
    if iv_len != IV_BYTES {
        return Err(CryptError::MalformedPayload("file iv must be 16 bytes"));
    }
    let mut iv = [0u8; IV_BYTES];
    reader.read_exact(&mut iv).await.map_err(truncated)?;

    Ok(FileHeader {
        key_version,
        salt,
        iv,
    })
}

// ---------------------------------------------------------------------------
// Engine file operations
// ---------------------------------------------------------------------------

impl<P: KeyProvider> EncryptionEngine<P> {
    fn file_sealer(&self) -> Result<(FileHeader, ChunkSealer)> {
        let current = self.keys.get_current_key()?;
        let header = FileHeader {
            key_version: current.version,
            salt: aead::random::<SALT_BYTES>()?.to_vec(),
            iv: aead::random()?,
        };
        let key = kdf::derive_key(
            current.material.as_bytes(),
            &header.salt,
            header.key_version,
            LABEL_FILE,
        )?;
        let sealer = ChunkSealer::new(key, header.iv, header.key_version);
        Ok((header, sealer))
    }

    fn file_opener(&self, header: &FileHeader) -> Result<ChunkOpener> {
        let material = self.keys.get_key(header.key_version)?;
        let key = kdf::derive_key(
            material.as_bytes(),
            &header.salt,
            header.key_version,
            LABEL_FILE,
        )?;
        Ok(ChunkOpener::new(key, header.iv, header.key_version))
    }

    /// Encrypt `src` into a container at `dst` under the current key.
    pub async fn encrypt_file(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<FileHeader> {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        ensure_distinct(src, dst).await?;
        let mut input = open_source(src).await?;
        let (header, mut sealer) = self.file_sealer()?;

        let mut out = PendingOutput::create(dst).await?;
        let streamed = async {
            out.write_all(&header.encode()?).await?;
            let mut buf = zeroize::Zeroizing::new(vec![0u8; READ_BUF_BYTES]);
            loop {
                let n = read_full(&mut input, &mut buf, src).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&sealer.update(&buf[..n])?).await?;
            }
            out.write_all(&sealer.finish()?).await
        }
        .await;

        if let Err(e) = streamed {
            out.discard().await;
            return Err(e);
        }
        let bytes = out.commit().await?;
        info!(
            key_version = header.key_version,
            path = %dst.display(),
            bytes,
            "encrypted file"
        );
        Ok(header)
    }

    /// Decrypt the container at `src` into `dst` with the version it names.
    pub async fn decrypt_file(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<FileHeader> {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        ensure_distinct(src, dst).await?;
        let mut input = open_source(src).await?;
        let header = read_header(&mut input, src).await?;
        let mut opener = self.file_opener(&header)?;

        let mut out = PendingOutput::create(dst).await?;
        let streamed = async {
            let mut buf = vec![0u8; READ_BUF_BYTES];
            loop {
                let n = read_full(&mut input, &mut buf, src).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&opener.update(&buf[..n])?).await?;
            }
            out.write_all(&opener.finish()?).await
        }
        .await;

        if let Err(e) = streamed {
            if matches!(e, CryptError::DecryptionFailed { .. }) {
                warn!(key_version = header.key_version, path = %src.display(), "file failed authentication");
            }
            out.discard().await;
            return Err(e);
        }
        let bytes = out.commit().await?;
        info!(
            key_version = header.key_version,
            path = %dst.display(),
            bytes,
            "decrypted file"
        );
        Ok(header)
    }

    /// Move a container to the current key without writing plaintext to disk.
    pub async fn re_encrypt_file(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<FileHeader> {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        ensure_distinct(src, dst).await?;
        let mut input = open_source(src).await?;
        let old = read_header(&mut input, src).await?;
        let mut opener = self.file_opener(&old)?;
        let (header, mut sealer) = self.file_sealer()?;

        let mut out = PendingOutput::create(dst).await?;
        let streamed = async {
            out.write_all(&header.encode()?).await?;
            let mut buf = vec![0u8; READ_BUF_BYTES];
            loop {
                let n = read_full(&mut input, &mut buf, src).await?;
                if n == 0 {
                    break;
                }
                let plain = opener.update(&buf[..n])?;
                out.write_all(&sealer.update(&plain)?).await?;
            }
            let plain = opener.finish()?;
            out.write_all(&sealer.update(&plain)?).await?;
            out.write_all(&sealer.finish()?).await
        }
        .await;

        if let Err(e) = streamed {
            out.discard().await;
            return Err(e);
        }
        out.commit().await?;
        info!(
            from_version = old.key_version,
            to_version = header.key_version,
            path = %dst.display(),
            "re-encrypted file"
        );
        Ok(header)
    }

    /// Read a container's header without touching any key.
    pub async fn read_file_header(&self, path: impl AsRef<Path>) -> Result<FileHeader> {
        read_file_header(path).await
    }
}

/// Read a container's header without touching any key.
pub async fn read_file_header(path: impl AsRef<Path>) -> Result<FileHeader> {
    let path = path.as_ref();
    let mut input = open_source(path).await?;
    read_header(&mut input, path).await
}
