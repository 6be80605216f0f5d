//! # Chartlock
//!
//! Encryption at rest for records and attached files, with key rotation that
//! never breaks access to data encrypted under older keys.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chartlock::{EncryptionEngine, KeyManager, KeyManagerOptions, InMemoryBackend};
//!
//! let keys = Arc::new(KeyManager::open(
//!     Arc::new(InMemoryBackend::new()),
//!     KeyManagerOptions::default(),
//! )?);
//! let engine = EncryptionEngine::new(keys.clone());
//!
//! let payload = engine.encrypt(b"chart note")?;
//! assert_eq!(payload.key_version, 1);
//!
//! keys.rotate_key()?;
//! let migrated = engine.re_encrypt(&payload)?;
//! assert_eq!(migrated.key_version, 2);
//! assert_eq!(engine.decrypt(&migrated)?, b"chart note");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Security Properties
//!
//! - **AES-256-GCM**: every payload and every file chunk is authenticated
//! - **Per-payload keys**: HKDF-SHA256 over the version key and a random salt
//! - **Version stamping**: payloads name the key that produced them
//! - **Ordered chunks**: file containers detect truncation and reordering
//!
//! ## What's NOT Provided
//!
//! - Asymmetric cryptography
//! - HSM or escrow integration
//! - Compression

#![deny(unsafe_code)]

mod aead;
mod error;
mod kdf;
mod stream;

pub mod config;
pub mod engine;
pub mod files;
pub mod payload;

// Wire module is public for the CLI inspect command and fuzz targets
#[doc(hidden)]
pub mod wire;

pub use engine::EncryptionEngine;
pub use error::{CryptError, Result, UNREADABLE_MESSAGE};
pub use files::read_file_header;
pub use payload::EncryptedPayload;
pub use wire::FileHeader;

pub use chartlock_keystore::{
    CurrentKey, FileBackend, InMemoryBackend, KeyManager, KeyManagerOptions, KeyMaterial,
    KeyProvider, KeyRecord, KeyStorage, KeystoreError,
};
