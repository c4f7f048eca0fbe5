//! Durable key-value storage for client-side state.
//!
//! Values are strings under string keys, read and written synchronously.
//! Backends may refuse large writes the way a browser's storage quota does.

mod cart_store;

pub use cart_store::{
    load_cart_items, normalize_cart_item, save_cart_items, CartSession, LegacyFlavorSelection,
    StoredCartItem, StoredFlavorSelection, CART_STORAGE_KEY,
};

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Quota exceeded: {size} bytes over a {capacity} byte limit")]
    QuotaExceeded { size: usize, capacity: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait DurableStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

impl<S: DurableStorage + ?Sized> DurableStorage for &mut S {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> { (**self).get(key) }
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> { (**self).set(key, value) }
    fn remove(&mut self, key: &str) -> Result<(), StorageError> { (**self).remove(key) }
}

fn check_capacity(value: &str, capacity: Option<usize>) -> Result<(), StorageError> {
    match capacity {
        Some(capacity) if value.len() > capacity => Err(StorageError::QuotaExceeded { size: value.len(), capacity }),
        _ => Ok(()),
    }
}

/// In-process storage, mostly for tests and ephemeral sessions.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
    capacity: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    /// Rejects any single value longer than `capacity` bytes.
    pub fn with_capacity_limit(capacity: usize) -> Self { Self { entries: HashMap::new(), capacity: Some(capacity) } }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> { Ok(self.entries.get(key).cloned()) }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        check_capacity(value, self.capacity)?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
    capacity: Option<usize>,
}

impl FileStorage {
    pub fn open(dir: impl AsRef<Path>, capacity: Option<usize>) -> Result<Self, StorageError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf(), capacity })
    }

    fn path_for(&self, key: &str) -> PathBuf { self.dir.join(format!("{}.json", encode_key(key))) }
}

/// Keeps ASCII alphanumerics and `-`, escapes every other byte as `_xx`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("_{b:02x}"));
        }
    }
    out
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        check_capacity(value, self.capacity)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
