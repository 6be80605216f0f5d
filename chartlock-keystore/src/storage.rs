//! Storage backends: where versioned key material lives.

use crate::error::{KeystoreError, Result};
use crate::types::{KeyMaterial, KeyRecord, INITIAL_VERSION, KEY_BYTES};

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use zeroize::Zeroize;

/// Algorithm label written into every key file.
pub const KEY_ALGORITHM: &str = "AES-256";

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Backend for persisting key versions.
///
/// Implement this for your infrastructure:
/// - InMemoryBackend (testing)
/// - FileBackend (one file per version on local disk)
/// - Your database or secret store
///
/// Records are immutable: `store` must refuse a version that already exists.
pub trait KeyStorage: Send + Sync {
    fn load(&self, version: i32) -> Result<Option<KeyRecord>>;
    fn store(&self, record: &KeyRecord) -> Result<()>;
    /// Every stored version, ascending.
    fn versions(&self) -> Result<Vec<i32>>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory storage (for testing and ephemeral use).
#[derive(Default)]
pub struct InMemoryBackend {
    keys: RwLock<BTreeMap<i32, KeyRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for InMemoryBackend {
    fn load(&self, version: i32) -> Result<Option<KeyRecord>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.get(&version).cloned())
    }

    fn store(&self, record: &KeyRecord) -> Result<()> {
        if record.version < INITIAL_VERSION {
            return Err(KeystoreError::InvalidVersion(record.version));
        }
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if keys.contains_key(&record.version) {
            return Err(KeystoreError::VersionExists(record.version));
        }
        keys.insert(record.version, record.clone());
        Ok(())
    }

    fn versions(&self) -> Result<Vec<i32>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.keys().copied().collect())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// On-disk layout of one key version.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    version: i32,
    algorithm: String,
    key_hex: String,
    created_at: DateTime<Utc>,
}

/// File-based storage (one JSON file per key version).
///
/// Directory layout:
/// ```text
/// keys/
///   key-v1.json
///   key-v2.json
/// ```
///
/// Each file repeats its own version so a renamed or swapped file is
/// detected on load.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| KeystoreError::storage(format!("create dir {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `version`.
    pub fn key_path(&self, version: i32) -> PathBuf {
        self.dir.join(key_file_name(version))
    }
}

/// `key-v<N>.json`
pub fn key_file_name(version: i32) -> String {
    format!("key-v{}.json", version)
}

fn parse_key_file_name(name: &str) -> Option<i32> {
    name.strip_prefix("key-v")?
        .strip_suffix(".json")?
        .parse::<i32>()
        .ok()
        .filter(|v| *v >= INITIAL_VERSION)
}

fn corrupt(version: i32, reason: impl Into<String>) -> KeystoreError {
    KeystoreError::Corrupt {
        version,
        reason: reason.into(),
    }
}

/// Create `path` (which must not exist) and write `data` to it, readable
/// only by the owner where supported.
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Unique hidden sibling for an in-progress write of `version`.
///
/// Never matches `key-v<N>.json`, so `versions()` ignores it.
fn temp_key_path(dir: &Path, version: i32) -> PathBuf {
    let mut suffix = [0u8; 8];
    OsRng.fill_bytes(&mut suffix);
    dir.join(format!(".key-v{}.json.{}.tmp", version, hex::encode(suffix)))
}

impl KeyStorage for FileBackend {
    fn load(&self, version: i32) -> Result<Option<KeyRecord>> {
        let path = self.key_path(version);
        let mut data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeystoreError::storage(format!("read {}", path.display()), e))
            }
        };
        let parsed = serde_json::from_str::<KeyFile>(&data);
        data.zeroize();
        let mut file = parsed.map_err(|e| corrupt(version, format!("parse: {}", e)))?;

        if file.version != version {
            file.key_hex.zeroize();
            return Err(corrupt(
                version,
                format!("file declares version {}", file.version),
            ));
        }
        if file.algorithm != KEY_ALGORITHM {
            file.key_hex.zeroize();
            return Err(corrupt(
                version,
                format!("unsupported algorithm {:?}", file.algorithm),
            ));
        }

        let mut bytes = [0u8; KEY_BYTES];
        let decoded = hex::decode_to_slice(&file.key_hex, &mut bytes);
        file.key_hex.zeroize();
        decoded.map_err(|e| corrupt(version, format!("key material: {}", e)))?;
        let material = KeyMaterial::from_bytes(bytes);
        bytes.zeroize();

        Ok(Some(KeyRecord {
            version,
            material: Arc::new(material),
            created_at: file.created_at,
        }))
    }

    fn store(&self, record: &KeyRecord) -> Result<()> {
        if record.version < INITIAL_VERSION {
            return Err(KeystoreError::InvalidVersion(record.version));
        }
        let path = self.key_path(record.version);
        if path.exists() {
            return Err(KeystoreError::VersionExists(record.version));
        }

        let mut file = KeyFile {
            version: record.version,
            algorithm: KEY_ALGORITHM.to_string(),
            key_hex: hex::encode(record.material.as_bytes()),
            created_at: record.created_at,
        };
        let json = serde_json::to_string_pretty(&file);
        file.key_hex.zeroize();
        let mut json = json?;

        // Write a private temp file, then publish it with a hard link.
        // link(2) fails with EEXIST instead of replacing, so exactly one
        // writer wins each version.
        let tmp = temp_key_path(&self.dir, record.version);
        let written = write_private(&tmp, json.as_bytes());
        json.zeroize();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(KeystoreError::storage(format!("write {}", tmp.display()), e));
        }
        let published = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match published {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(KeystoreError::VersionExists(record.version))
            }
            Err(e) => Err(KeystoreError::storage(
                format!("link {}", path.display()),
                e,
            )),
        }
    }

    fn versions(&self) -> Result<Vec<i32>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| KeystoreError::storage(format!("readdir {}", self.dir.display()), e))?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KeystoreError::storage("readdir entry", e))?;
            if let Some(version) = entry.file_name().to_str().and_then(parse_key_file_name) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}
