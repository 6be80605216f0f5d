//! Error types for the encryption engine.

use chartlock_keystore::KeystoreError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptError>;

/// Shown to end users when a record cannot be decrypted.
pub const UNREADABLE_MESSAGE: &str =
    "This file cannot be read. Please contact your administrator.";

#[derive(Debug, Error)]
pub enum CryptError {
    /// Empty input, empty ciphertext, wrong IV length, or `src == dst`.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The payload names a key version that does not exist.
    #[error("encryption key version {version} not found")]
    KeyNotFound { version: i32 },

    #[error("unsupported payload format version {0}")]
    UnsupportedFormat(u8),

    /// Truncated, trailing bytes, or a length field out of range.
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    /// Wrong key, tampered content, or a reordered/truncated container.
    #[error("decryption failed under key version {key_version}")]
    DecryptionFailed { key_version: i32 },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The key store failed for a reason other than a missing version.
    #[error("key storage failure: {0}")]
    StorageFailure(String),

    #[error("random number generator failure: {0}")]
    Randomness(getrandom::Error),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CryptError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The data exists but can never be decrypted with the keys at hand.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. } | Self::DecryptionFailed { .. }
        )
    }

    /// Message suitable for the records UI.
    pub fn user_message(&self) -> String {
        if self.is_unreadable() {
            UNREADABLE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<KeystoreError> for CryptError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::KeyNotFound { version } => Self::KeyNotFound { version },
            other => Self::StorageFailure(other.to_string()),
        }
    }
}
