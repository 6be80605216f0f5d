#![no_main]

use std::sync::Arc;

use chartlock::{EncryptionEngine, InMemoryBackend, KeyManager, KeyManagerOptions};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static ENGINE: Lazy<EncryptionEngine<KeyManager>> = Lazy::new(|| {
    let keys = KeyManager::open(Arc::new(InMemoryBackend::new()), KeyManagerOptions::default())
        .unwrap();
    EncryptionEngine::new(keys)
});

fuzz_target!(|data: &[u8]| {
    let _ = ENGINE.decrypt_from_bytes(data);
});
