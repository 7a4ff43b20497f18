#![allow(dead_code)] // not every test binary uses every helper

use convault_store::{ConversationStore, StoreConfig};
use std::time::Duration;

/// Config with a fast KDF so tests don't burn CPU on key stretching.
pub fn test_config() -> StoreConfig {
    StoreConfig {
        secret: "integration-test-secret-0123456789".into(),
        kdf_iterations: 1_000,
        ..StoreConfig::default()
    }
}

pub fn open_store(config: &StoreConfig) -> ConversationStore {
    let keys = config.key_manager().unwrap();
    ConversationStore::open_in_memory(keys, config).unwrap()
}

/// DuckDB timestamps are microsecond-granular; a short pause keeps
/// `created_at` ordering deterministic between consecutive writes.
pub fn tick() {
    std::thread::sleep(Duration::from_millis(2));
}
