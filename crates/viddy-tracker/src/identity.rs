//! Client identity persistence.
//!
//! The client id is stored under [`CLIENT_ID_KEY`] with an expiry. A valid
//! record is returned unchanged; an absent or expired one is replaced. Store
//! failures never fail the lookup: the caller gets a fresh id that simply
//! is not persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use viddy_models::ClientId;

use crate::error::{TrackerError, TrackerResult};

/// Key the client id is stored under.
pub const CLIENT_ID_KEY: &str = "clientId";

/// A persisted value with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredValue {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.value.is_empty() && self.expires_at > now
    }
}

/// Small persistent key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> TrackerResult<Option<StoredValue>>;
    fn set(&self, key: &str, value: StoredValue) -> TrackerResult<()>;
}

/// Return the persisted client id, creating and persisting one if needed.
pub fn get_or_create_client_id(
    store: &dyn KeyValueStore,
    ttl: Duration,
    now: DateTime<Utc>,
) -> ClientId {
    match store.get(CLIENT_ID_KEY) {
        Ok(Some(stored)) if stored.is_valid_at(now) => {
            debug!(client_id = %stored.value, "Reusing persisted client id");
            return ClientId::from_string(stored.value);
        }
        Ok(Some(_)) => debug!("Persisted client id expired"),
        Ok(None) => {}
        Err(e) => warn!("Could not read client id, using a new one: {}", e),
    }

    let client_id = ClientId::new();
    let expires_at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let record = StoredValue {
        value: client_id.to_string(),
        expires_at,
    };

    match store.set(CLIENT_ID_KEY, record) {
        Ok(()) => info!(client_id = %client_id, "Created client id"),
        Err(e) => warn!(client_id = %client_id, "Could not persist client id: {}", e),
    }

    client_id
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TrackerResult<Option<StoredValue>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::store("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: StoredValue) -> TrackerResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::store("memory store poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// File store
// =============================================================================

/// JSON file holding a map of key to [`StoredValue`].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> TrackerResult<HashMap<String, StoredValue>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            TrackerError::store(format!("corrupt store {}: {}", self.path.display(), e))
        })
    }

    fn write_all(&self, entries: &HashMap<String, StoredValue>) -> TrackerResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| TrackerError::store(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> TrackerResult<Option<StoredValue>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TrackerError::store("file store poisoned"))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: StoredValue) -> TrackerResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TrackerError::store("file store poisoned"))?;
        // A corrupt file is replaced rather than blocking writes forever.
        let mut entries = self.read_all().unwrap_or_default();
        entries.insert(key.to_string(), value);
        self.write_all(&entries)
    }
}
