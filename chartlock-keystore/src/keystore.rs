//! Key manager: bootstrap, cache, rotation.

use crate::error::{KeystoreError, Result};
use crate::storage::{FileBackend, KeyStorage};
use crate::types::{CurrentKey, KeyMaterial, KeyRecord, INITIAL_VERSION};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Attempts made to find a free version when another writer races a rotation.
const ROTATE_ATTEMPTS: usize = 8;

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Source of key material for the encryption engine.
///
/// `KeyManager` is the production implementation; tests may supply a fixed
/// set of keys.
pub trait KeyProvider: Send + Sync {
    /// Current version and its material as one snapshot.
    fn get_current_key(&self) -> Result<CurrentKey>;

    /// Material for an explicit version.
    fn get_key(&self, version: i32) -> Result<Arc<KeyMaterial>>;
}

impl<P: KeyProvider + ?Sized> KeyProvider for Arc<P> {
    fn get_current_key(&self) -> Result<CurrentKey> {
        (**self).get_current_key()
    }

    fn get_key(&self, version: i32) -> Result<Arc<KeyMaterial>> {
        (**self).get_key(version)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct KeyManagerOptions {
    /// Use this version as current instead of the highest stored one.
    pub pinned_version: Option<i32>,
}

impl KeyManagerOptions {
    pub fn pinned(version: i32) -> Self {
        Self {
            pinned_version: Some(version),
        }
    }
}

// ---------------------------------------------------------------------------
// Key manager
// ---------------------------------------------------------------------------

pub struct KeyManager {
    storage: Arc<dyn KeyStorage>,
    cache: RwLock<HashMap<i32, Arc<KeyMaterial>>>,
    current: RwLock<CurrentKey>,
    rotate_lock: Mutex<()>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("current_version", &self.current_version())
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Open a manager over `storage`, creating the current key if needed.
    ///
    /// The current version is the pinned one if given, otherwise the highest
    /// version in the store, otherwise [`INITIAL_VERSION`].
    pub fn open(storage: Arc<dyn KeyStorage>, options: KeyManagerOptions) -> Result<Self> {
        Self::bootstrap(storage, options, true)
    }

    /// Like [`open`](Self::open), but never writes: the current version
    /// must already be stored. An empty store fails with `KeyNotFound`.
    pub fn open_existing(
        storage: Arc<dyn KeyStorage>,
        options: KeyManagerOptions,
    ) -> Result<Self> {
        Self::bootstrap(storage, options, false)
    }

    fn bootstrap(
        storage: Arc<dyn KeyStorage>,
        options: KeyManagerOptions,
        create_missing: bool,
    ) -> Result<Self> {
        let bootstrap = |version: i32, source: KeystoreError| KeystoreError::Bootstrap {
            version,
            source: Box::new(source),
        };

        let version = match options.pinned_version {
            Some(v) if v < INITIAL_VERSION => {
                return Err(bootstrap(v, KeystoreError::InvalidVersion(v)))
            }
            Some(v) => v,
            None => storage
                .versions()
                .map_err(|e| bootstrap(INITIAL_VERSION, e))?
                .into_iter()
                .max()
                .unwrap_or(INITIAL_VERSION),
        };

        let material = match storage.load(version).map_err(|e| bootstrap(version, e))? {
            Some(record) => record.material,
            None if create_missing => Self::create_version(storage.as_ref(), version)
                .map_err(|e| bootstrap(version, e))?,
            None => {
                warn!(key_version = version, "no stored key to open");
                return Err(bootstrap(version, KeystoreError::KeyNotFound { version }));
            }
        };

        info!(key_version = version, "key manager ready");

        let mut cache = HashMap::new();
        cache.insert(version, material.clone());
        Ok(Self {
            storage,
            cache: RwLock::new(cache),
            current: RwLock::new(CurrentKey { version, material }),
            rotate_lock: Mutex::new(()),
        })
    }

    /// Open a manager over a key directory on disk.
    pub fn open_dir(dir: impl Into<PathBuf>, options: KeyManagerOptions) -> Result<Self> {
        let storage = Arc::new(FileBackend::new(dir)?);
        Self::open(storage, options)
    }

    /// Open an existing key directory without creating it or any key.
    pub fn open_existing_dir(
        dir: impl Into<PathBuf>,
        options: KeyManagerOptions,
    ) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            let version = options.pinned_version.unwrap_or(INITIAL_VERSION);
            return Err(KeystoreError::Bootstrap {
                version,
                source: Box::new(KeystoreError::KeyNotFound { version }),
            });
        }
        Self::open_existing(Arc::new(FileBackend::new(dir)?), options)
    }

    /// Write a fresh key for `version`; if another writer got there first,
    /// use theirs.
    fn create_version(storage: &dyn KeyStorage, version: i32) -> Result<Arc<KeyMaterial>> {
        let record = KeyRecord::generate(version);
        match storage.store(&record) {
            Ok(()) => {
                info!(key_version = version, "created encryption key");
                Ok(record.material)
            }
            Err(KeystoreError::VersionExists(_)) => storage
                .load(version)?
                .map(|r| r.material)
                .ok_or(KeystoreError::KeyNotFound { version }),
            Err(e) => Err(e),
        }
    }

    pub fn current_version(&self) -> i32 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Every version present in the store, ascending.
    pub fn versions(&self) -> Result<Vec<i32>> {
        self.storage.versions()
    }

    /// Current version and material, read together.
    pub fn current_key(&self) -> CurrentKey {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Material for `version`, from cache or storage.
    pub fn key(&self, version: i32) -> Result<Arc<KeyMaterial>> {
        if version < INITIAL_VERSION {
            return Err(KeystoreError::KeyNotFound { version });
        }
        if let Some(material) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&version)
        {
            return Ok(material.clone());
        }

        let record = match self.storage.load(version)? {
            Some(record) => record,
            None => {
                warn!(key_version = version, "encryption key not found");
                return Err(KeystoreError::KeyNotFound { version });
            }
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let material = cache.entry(version).or_insert(record.material).clone();
        debug!(key_version = version, "cached encryption key");
        Ok(material)
    }

    /// Generate, persist and publish `current + 1`. Returns the new version.
    ///
    /// Existing payloads are untouched; they keep decrypting with the
    /// version stamped on them.
    pub fn rotate_key(&self) -> Result<i32> {
        let _guard = self.rotate_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let highest_stored = self.storage.versions()?.into_iter().max();
        let mut next = self.next_version(highest_stored)?;

        for _ in 0..ROTATE_ATTEMPTS {
            let record = KeyRecord::generate(next);
            match self.storage.store(&record) {
                Ok(()) => {
                    let material = {
                        let mut cache =
                            self.cache.write().unwrap_or_else(PoisonError::into_inner);
                        cache.entry(next).or_insert(record.material).clone()
                    };
                    let previous = {
                        let mut current =
                            self.current.write().unwrap_or_else(PoisonError::into_inner);
                        let previous = current.version;
                        *current = CurrentKey {
                            version: next,
                            material,
                        };
                        previous
                    };
                    info!(
                        key_version = next,
                        previous_version = previous,
                        "rotated encryption key"
                    );
                    return Ok(next);
                }
                Err(KeystoreError::VersionExists(v)) => {
                    warn!(key_version = v, "key version taken by another writer");
                    next = v
                        .checked_add(1)
                        .ok_or(KeystoreError::InvalidVersion(v))?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(KeystoreError::VersionExists(next))
    }

    fn next_version(&self, highest_stored: Option<i32>) -> Result<i32> {
        let current = self.current_version();
        let base = highest_stored.map_or(current, |h| h.max(current));
        base.checked_add(1)
            .ok_or(KeystoreError::InvalidVersion(base))
    }
}

impl KeyProvider for KeyManager {
    fn get_current_key(&self) -> Result<CurrentKey> {
        Ok(self.current_key())
    }

    fn get_key(&self, version: i32) -> Result<Arc<KeyMaterial>> {
        self.key(version)
    }
}
