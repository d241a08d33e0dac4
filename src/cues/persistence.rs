//! Key-value persistence for cue texts and Wi-Fi credentials
//!
//! Backed by a sled database with one tree per namespace. The store is a
//! capability: every consumer treats a missing or failing store as a valid
//! state and carries on with in-memory defaults.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Namespace holding `cue<N>` -> text entries.
pub const CUE_NAMESPACE: &str = "cue_texts";
/// Namespace holding Wi-Fi credentials.
pub const WIFI_NAMESPACE: &str = "wifi_cfg";

/// Store key for one cue channel's text.
pub fn cue_key(index: usize) -> String {
    format!("cue{index}")
}

/// Minimal get/put capability over string keys and values.
///
/// `save` and `remove` report success as a bool rather than an error: callers
/// log and continue, persistence failures are never fatal.
pub trait KvStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str) -> bool;
    fn remove(&self, key: &str) -> bool;
}

/// One namespace (sled tree) of the on-disk database.
pub struct SledStore {
    tree: sled::Tree,
    namespace: String,
}

/// Open the backing database. Each [`SledStore`] namespace is a tree inside
/// this single database.
pub fn open_database(path: impl AsRef<Path>) -> Result<sled::Db> {
    let path = path.as_ref();
    sled::open(path).with_context(|| format!("Failed to open state database at {}", path.display()))
}

impl SledStore {
    pub fn open(db: &sled::Db, namespace: &str) -> Result<Self> {
        let tree = db
            .open_tree(namespace)
            .with_context(|| format!("Failed to open store namespace '{namespace}'"))?;
        Ok(Self {
            tree,
            namespace: namespace.to_string(),
        })
    }
}

impl KvStore for SledStore {
    fn load(&self, key: &str) -> Option<String> {
        match self.tree.get(key) {
            Ok(Some(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("⚠️  Store entry {}/{} is not valid UTF-8, ignoring", self.namespace, key);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️  Failed to read {}/{}: {}", self.namespace, key, e);
                None
            }
        }
    }

    fn save(&self, key: &str, value: &str) -> bool {
        if let Err(e) = self.tree.insert(key, value.as_bytes()) {
            warn!("⚠️  Failed to write {}/{}: {}", self.namespace, key, e);
            return false;
        }
        if let Err(e) = self.tree.flush() {
            warn!("⚠️  Failed to flush {}/{}: {}", self.namespace, key, e);
            return false;
        }
        debug!(namespace = %self.namespace, key, "store write");
        true
    }

    fn remove(&self, key: &str) -> bool {
        match self.tree.remove(key) {
            Ok(_) => self.tree.flush().is_ok(),
            Err(e) => {
                warn!("⚠️  Failed to remove {}/{}: {}", self.namespace, key, e);
                false
            }
        }
    }
}
