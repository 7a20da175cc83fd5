use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    crypto::keys::{IntegrityKey, PageKey},
    error::Result,
};

/// Key material for one database file.
#[derive(Debug)]
pub struct KeyEntry {
    /// Normalized path this entry is registered under.
    pub path: String,
    pub enc_key: PageKey,
    /// Carried for completeness; pages are not authenticated.
    pub mac_key: IntegrityKey,
}

/// Normalized path → key material.
///
/// Entries are handed out as `Arc`s. A file handle keeps only a `Weak`
/// reference so that unregistering a path, or replacing its key with a
/// different one, revokes decryption for handles that are still open.
#[derive(Default)]
pub struct KeyRegistry {
    entries: RwLock<HashMap<String, Arc<KeyEntry>>>,
}

/// Canonical form used for both registration and lookup: forward slashes,
/// ASCII lower case.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_ascii_lowercase()
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the keys for `path`. Registering the keys already
    /// held for `path` keeps the existing entry, so open handles are
    /// unaffected.
    pub fn register(&self, path: &str, enc_key: PageKey, mac_key: IntegrityKey) {
        let normalized = normalize_path(path);
        let mut entries = self.entries.write();
        if let Some(current) = entries.get(&normalized)
            && current.enc_key.as_bytes() == enc_key.as_bytes()
            && current.mac_key.as_bytes() == mac_key.as_bytes()
        {
            log::debug!("chatvfs: key for {normalized} already registered");
            return;
        }
        let entry = Arc::new(KeyEntry {
            path: normalized.clone(),
            enc_key,
            mac_key,
        });
        entries.insert(normalized.clone(), entry);
        log::info!(
            "chatvfs: registered key for {normalized} ({} total)",
            entries.len()
        );
    }

    /// Hex-encoded form of [`register`](Self::register). An empty
    /// `mac_key_hex` is accepted.
    pub fn register_hex(&self, path: &str, enc_key_hex: &str, mac_key_hex: &str) -> Result<()> {
        let enc_key = PageKey::from_hex(enc_key_hex)?;
        let mac_key = IntegrityKey::from_hex(mac_key_hex)?;
        self.register(path, enc_key, mac_key);
        Ok(())
    }

    pub fn unregister(&self, path: &str) {
        let normalized = normalize_path(path);
        if self.entries.write().remove(&normalized).is_some() {
            log::info!("chatvfs: unregistered key for {normalized}");
        }
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<KeyEntry>> {
        self.entries.read().get(&normalize_path(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
