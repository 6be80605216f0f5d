//! Error types for the keystore.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeystoreError>;

// ---------------------------------------------------------------------------
// Top-level keystore error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KeystoreError {
    /// No key file exists for the requested version.
    #[error("encryption key version {version} not found")]
    KeyNotFound { version: i32 },

    /// Versions start at 1.
    #[error("invalid key version: {0}")]
    InvalidVersion(i32),

    /// Key records are immutable; a version is written exactly once.
    #[error("key version {0} already exists")]
    VersionExists(i32),

    /// The stored record exists but cannot be trusted.
    #[error("key version {version} is corrupt: {reason}")]
    Corrupt { version: i32, reason: String },

    #[error("storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("key file serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The current key could not be created or loaded while opening.
    #[error("failed to bootstrap key version {version}: {source}")]
    Bootstrap {
        version: i32,
        #[source]
        source: Box<KeystoreError>,
    },
}

impl KeystoreError {
    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Whether the error only reports an absent version.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }
}
