//! # Chartlock Keystore
//!
//! Versioned 256-bit symmetric keys for encryption at rest.
//!
//! Every key version is written once to a pluggable storage backend, cached
//! for the lifetime of the process, and never deleted. Rotation adds
//! `current + 1` and publishes it as the new current version; older versions
//! stay readable so previously encrypted data keeps decrypting.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chartlock_keystore::*;
//!
//! let keys = KeyManager::open_dir("/var/lib/chartlock/keys", KeyManagerOptions::default())?;
//! let current = keys.current_key();
//! let v2 = keys.rotate_key()?;
//! assert_eq!(v2, current.version + 1);
//! let old = keys.key(current.version)?;
//! # let _ = old;
//! # Ok::<(), KeystoreError>(())
//! ```

pub mod error;
pub mod keystore;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use error::{KeystoreError, Result};
pub use keystore::{KeyManager, KeyManagerOptions, KeyProvider};
pub use storage::{FileBackend, InMemoryBackend, KeyStorage, KEY_ALGORITHM};
pub use types::{CurrentKey, KeyMaterial, KeyRecord, INITIAL_VERSION, KEY_BYTES};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_manager() -> (KeyManager, Arc<InMemoryBackend>) {
        let storage = Arc::new(InMemoryBackend::new());
        let km = KeyManager::open(storage.clone(), KeyManagerOptions::default()).unwrap();
        (km, storage)
    }

    /// Counts loads so cache behaviour is observable.
    struct CountingBackend {
        inner: InMemoryBackend,
        loads: AtomicUsize,
    }

    impl KeyStorage for CountingBackend {
        fn load(&self, version: i32) -> Result<Option<KeyRecord>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(version)
        }
        fn store(&self, record: &KeyRecord) -> Result<()> {
            self.inner.store(record)
        }
        fn versions(&self) -> Result<Vec<i32>> {
            self.inner.versions()
        }
    }

    // --- Bootstrap ---

    #[test]
    fn test_bootstrap_creates_initial_key() {
        let (km, storage) = test_manager();
        assert_eq!(km.current_version(), INITIAL_VERSION);
        assert_eq!(storage.versions().unwrap(), vec![1]);

        let current = km.current_key();
        let stored = storage.load(1).unwrap().unwrap();
        assert_eq!(current.material.as_bytes(), stored.material.as_bytes());
    }

    #[test]
    fn test_bootstrap_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let km = KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap();
        assert_eq!(km.current_version(), 1);
        assert!(dir.path().join("key-v1.json").is_file());
    }

    #[test]
    fn test_open_existing_never_creates_keys() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeyManager::open_existing_dir(dir.path(), KeyManagerOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            KeystoreError::Bootstrap { version: 1, ref source }
                if matches!(**source, KeystoreError::KeyNotFound { version: 1 })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let missing = dir.path().join("typo");
        assert!(KeyManager::open_existing_dir(&missing, KeyManagerOptions::default()).is_err());
        assert!(!missing.exists());

        let created = KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap();
        let opened =
            KeyManager::open_existing_dir(dir.path(), KeyManagerOptions::default()).unwrap();
        assert_eq!(opened.current_version(), 1);
        assert_eq!(
            opened.current_key().material.as_bytes(),
            created.current_key().material.as_bytes()
        );
    }

    #[test]
    fn test_open_existing_rejects_missing_pinned_version() {
        let storage = Arc::new(InMemoryBackend::new());
        storage.store(&KeyRecord::generate(1)).unwrap();
        let err = KeyManager::open_existing(storage.clone(), KeyManagerOptions::pinned(4))
            .unwrap_err();
        assert!(matches!(err, KeystoreError::Bootstrap { version: 4, .. }));
        assert_eq!(storage.versions().unwrap(), vec![1]);
    }

    #[test]
    fn test_reopen_picks_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        let first = KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap();
        first.rotate_key().unwrap();
        let v3 = first.rotate_key().unwrap();
        let v3_bytes = *first.key(v3).unwrap().as_bytes();
        drop(first);

        let second = KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap();
        assert_eq!(second.current_version(), 3);
        assert_eq!(second.current_key().material.as_bytes(), &v3_bytes);
        assert_eq!(second.versions().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_pinned_version_is_honoured() {
        let storage = Arc::new(InMemoryBackend::new());
        for v in 1..=3 {
            storage.store(&KeyRecord::generate(v)).unwrap();
        }
        let km = KeyManager::open(storage.clone(), KeyManagerOptions::pinned(2)).unwrap();
        assert_eq!(km.current_version(), 2);
        assert_eq!(
            km.current_key().material.as_bytes(),
            storage.load(2).unwrap().unwrap().material.as_bytes()
        );
    }

    #[test]
    fn test_pinned_missing_version_is_created() {
        let storage = Arc::new(InMemoryBackend::new());
        let km = KeyManager::open(storage.clone(), KeyManagerOptions::pinned(5)).unwrap();
        assert_eq!(km.current_version(), 5);
        assert_eq!(storage.versions().unwrap(), vec![5]);
    }

    #[test]
    fn test_pinned_invalid_version_fails_bootstrap() {
        let storage = Arc::new(InMemoryBackend::new());
        let err = KeyManager::open(storage, KeyManagerOptions::pinned(0)).unwrap_err();
        assert!(matches!(err, KeystoreError::Bootstrap { version: 0, .. }));
    }

    #[test]
    fn test_corrupt_current_key_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("key-v1.json"), b"{}").unwrap();
        let err = KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap_err();
        match err {
            KeystoreError::Bootstrap { version, source } => {
                assert_eq!(version, 1);
                assert!(matches!(*source, KeystoreError::Corrupt { version: 1, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // --- Lookup ---

    #[test]
    fn test_missing_version_is_key_not_found() {
        let (km, _) = test_manager();
        let err = km.key(99).unwrap_err();
        assert!(matches!(err, KeystoreError::KeyNotFound { version: 99 }));
        assert!(err.is_not_found());
        assert!(km.key(0).unwrap_err().is_not_found());
        assert!(km.key(-4).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cache_fills_once() {
        let backend = Arc::new(CountingBackend {
            inner: InMemoryBackend::new(),
            loads: AtomicUsize::new(0),
        });
        backend.inner.store(&KeyRecord::generate(1)).unwrap();
        backend.inner.store(&KeyRecord::generate(2)).unwrap();

        let km = KeyManager::open(backend.clone(), KeyManagerOptions::pinned(1)).unwrap();
        let after_open = backend.loads.load(Ordering::SeqCst);

        let a = km.key(2).unwrap();
        let b = km.key(2).unwrap();
        let c = km.key(1).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(c.as_bytes(), km.current_key().material.as_bytes());
        assert_eq!(backend.loads.load(Ordering::SeqCst), after_open + 1);
    }

    #[test]
    fn test_concurrent_reads_return_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let km = KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap();
            km.rotate_key().unwrap();
        }
        let km = Arc::new(
            KeyManager::open_dir(dir.path(), KeyManagerOptions::pinned(2)).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let km = km.clone();
                std::thread::spawn(move || *km.key(1).unwrap().as_bytes())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    // --- Rotation ---

    #[test]
    fn test_rotate_increments_and_publishes() {
        let (km, storage) = test_manager();
        let before = km.current_key();
        let v2 = km.rotate_key().unwrap();
        assert_eq!(v2, 2);
        assert_eq!(km.current_version(), 2);

        let after = km.current_key();
        assert_eq!(after.version, 2);
        assert_ne!(after.material.as_bytes(), before.material.as_bytes());
        assert_eq!(
            after.material.as_bytes(),
            storage.load(2).unwrap().unwrap().material.as_bytes()
        );
    }

    #[test]
    fn test_rotate_preserves_old_versions() {
        let (km, _) = test_manager();
        let v1 = *km.key(1).unwrap().as_bytes();
        km.rotate_key().unwrap();
        km.rotate_key().unwrap();
        assert_eq!(km.key(1).unwrap().as_bytes(), &v1);
        assert_eq!(km.versions().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rotate_from_pinned_skips_stored_versions() {
        let storage = Arc::new(InMemoryBackend::new());
        for v in 1..=3 {
            storage.store(&KeyRecord::generate(v)).unwrap();
        }
        let km = KeyManager::open(storage, KeyManagerOptions::pinned(1)).unwrap();
        assert_eq!(km.rotate_key().unwrap(), 4);
        assert_eq!(km.current_version(), 4);
    }

    #[test]
    fn test_concurrent_rotations_are_distinct() {
        let (km, _) = test_manager();
        let km = Arc::new(km);
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let km = km.clone();
                std::thread::spawn(move || km.rotate_key().unwrap())
            })
            .collect();
        let versions: HashSet<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(versions, (2..=7).collect());
        assert_eq!(km.current_version(), 7);
    }

    #[test]
    fn test_managers_sharing_a_directory_rotate_without_collisions() {
        use std::sync::Barrier;

        const ROUNDS: usize = 25;
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap());
        let b = Arc::new(KeyManager::open_dir(dir.path(), KeyManagerOptions::default()).unwrap());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|km| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    (0..ROUNDS)
                        .map(|_| {
                            barrier.wait();
                            km.rotate_key().unwrap()
                        })
                        .collect::<Vec<i32>>()
                })
            })
            .collect();
        let per_manager: Vec<Vec<i32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let all: HashSet<i32> = per_manager.iter().flatten().copied().collect();
        assert_eq!(all.len(), 2 * ROUNDS, "every rotation got its own version");
        let last = 1 + 2 * ROUNDS as i32;
        assert_eq!(all, (2..=last).collect());
        assert_eq!(a.versions().unwrap(), (1..=last).collect::<Vec<_>>());

        // What each manager cached is what is on disk.
        let disk = FileBackend::new(dir.path()).unwrap();
        for (km, versions) in [a, b].iter().zip(&per_manager) {
            for &v in versions {
                let stored = disk.load(v).unwrap().unwrap();
                assert_eq!(km.key(v).unwrap().as_bytes(), stored.material.as_bytes());
            }
        }
    }

    #[test]
    fn test_concurrent_bootstrap_agrees_on_initial_key() {
        use std::sync::Barrier;

        for _ in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let barrier = barrier.clone();
                    let path = dir.path().to_path_buf();
                    std::thread::spawn(move || {
                        barrier.wait();
                        KeyManager::open_dir(path, KeyManagerOptions::default()).unwrap()
                    })
                })
                .collect();
            let managers: Vec<KeyManager> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(managers[0].current_version(), 1);
            assert_eq!(managers[1].current_version(), 1);
            assert_eq!(
                managers[0].current_key().material.as_bytes(),
                managers[1].current_key().material.as_bytes()
            );
            assert_eq!(managers[0].versions().unwrap(), vec![1]);
        }
    }

    #[test]
    fn test_snapshot_pairs_version_with_material() {
        let (km, _) = test_manager();
        let km = Arc::new(km);
        let rotator = {
            let km = km.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    km.rotate_key().unwrap();
                }
            })
        };
        for _ in 0..200 {
            let snap = km.get_current_key().unwrap();
            let stored = km.get_key(snap.version).unwrap();
            assert_eq!(snap.material.as_bytes(), stored.as_bytes());
        }
        rotator.join().unwrap();
    }

    // --- Formatting ---

    #[test]
    fn test_debug_never_prints_material() {
        let (km, _) = test_manager();
        let current = km.current_key();
        let hex_key = hex::encode(current.material.as_bytes());
        let rendered = format!("{:?} {:?}", current, km);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex_key));
    }

    #[test]
    fn test_error_display() {
        let err = KeystoreError::KeyNotFound { version: 7 };
        assert_eq!(err.to_string(), "encryption key version 7 not found");
        let err = KeystoreError::Corrupt {
            version: 2,
            reason: "bad".into(),
        };
        assert!(err.to_string().contains("version 2"));
    }
}
