//! Credential store: the persisted key-value document behind the directory.
//!
//! The store holds listener settings, the user directory and the permission
//! set catalog under fixed keys (see [`keys`]). [`JsonFileStore`] keeps one
//! JSON object on disk and re-reads it on every access, so edits made by the
//! operator CLI in another process are picked up by the running listener.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{DirectoryError, Result};

/// Well-known store keys.
pub mod keys {
    /// Root account password (PHC hash or plaintext).
    pub const ROOT_PASSWORD: &str = "root_password";
    /// Mapping username -> user record.
    pub const USERS: &str = "users";
    /// Whether the anonymous account is enabled.
    pub const ANONYMOUS_ALLOWED: &str = "anonymous_allowed";
    /// Preferred listening port.
    pub const PORT: &str = "port";
    /// Whether to search upward for a free port.
    pub const AUTO_FIND_PORT: &str = "auto_find_port";
    /// Mapping name -> permission set.
    pub const PERMISSION_SETS: &str = "permission_sets";
}

/// A keyed persistent store with get/set semantics.
pub trait CredentialStore: Send + Sync {
    /// Reads the raw value under `key`, `None` when absent.
    fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Replaces the raw value under `key`.
    fn set_value(&self, key: &str, value: Value) -> Result<()>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        (**self).get_value(key)
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        (**self).set_value(key, value)
    }
}

/// Typed access on top of [`CredentialStore`].
pub trait CredentialStoreExt: CredentialStore {
    /// Reads `key` as `T`, returning `default` when the key is absent.
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.get_value(key)? {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| DirectoryError::MalformedValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            None => Ok(default),
        }
    }

    /// Serializes `value` and stores it under `key`.
    fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| DirectoryError::MalformedValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set_value(key, value)
    }
}

impl<S: CredentialStore + ?Sized> CredentialStoreExt for S {}

/// File-backed store holding a single JSON object.
pub struct JsonFileStore {
    /// The path to the JSON file.
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store persisting to `path`. The file is created on first write.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!("Store file not found at {:?}, reading as empty", self.path);
                return Ok(Map::new());
            }
            Err(source) => {
                return Err(DirectoryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(DirectoryError::Corrupt {
                path: self.path.clone(),
                reason: "top-level value is not an object".into(),
            }),
            Err(e) => Err(DirectoryError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        let io_err = |source| DirectoryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let contents = serde_json::to_string_pretty(document).map_err(|e| {
            DirectoryError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl CredentialStore for JsonFileStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_document()?.remove(key))
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock();
        // A corrupt document is reported, never overwritten.
        let mut document = self.read_document()?;
        document.insert(key.to_string(), value);
        self.write_document(&document)?;
        tracing::debug!(key, path = %self.path.display(), "Store value written");
        Ok(())
    }
}

/// In-memory store, used for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}
