//! Core types: KeyMaterial, KeyRecord, CurrentKey.

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every managed key (AES-256).
pub const KEY_BYTES: usize = 32;

/// First version handed out by a fresh store.
pub const INITIAL_VERSION: i32 = 1;

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// 256-bit symmetric key. Zeroized on drop, redacted in `Debug`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_BYTES]);

impl KeyMaterial {
    /// Draw a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Key record (one immutable version)
// ---------------------------------------------------------------------------

/// A single key version as persisted by a [`crate::KeyStorage`] backend.
#[derive(Clone, Debug)]
pub struct KeyRecord {
    /// Version number (1, 2, 3, ...).
    pub version: i32,
    /// Key bytes.
    pub material: Arc<KeyMaterial>,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// Generate a new record for `version`.
    pub fn generate(version: i32) -> Self {
        Self {
            version,
            material: Arc::new(KeyMaterial::generate()),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Current key snapshot
// ---------------------------------------------------------------------------

/// The current version together with its material, read atomically.
#[derive(Clone, Debug)]
pub struct CurrentKey {
    pub version: i32,
    pub material: Arc<KeyMaterial>,
}
