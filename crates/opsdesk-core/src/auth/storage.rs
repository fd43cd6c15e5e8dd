use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::StorageError;

const DOCUMENT_VERSION: u32 = 1;

/// Persistence medium for one origin's credential document.
///
/// Only [`CredentialStore`](super::CredentialStore) talks to a backend; nothing else
/// reads or writes the medium directly.
pub trait StorageBackend: Send + Sync {
    fn load(&self, origin: &str) -> Result<Option<CredentialDocument>, StorageError>;
    fn save(&self, document: &CredentialDocument) -> Result<(), StorageError>;
    fn delete(&self, origin: &str) -> Result<(), StorageError>;
}

/// Key/value items persisted for a single origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDocument {
    pub version: u32,
    pub origin: String,
    pub items: BTreeMap<String, StoredItem>,
}

impl CredentialDocument {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            origin: origin.into(),
            items: BTreeMap::new(),
        }
    }
}

/// A stored value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Filesystem-backed storage located in the user configuration directory.
pub struct FileStorage {
    locator: ConfigLocator,
}

impl FileStorage {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, StorageError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    // Write to a sibling temp file, then rename over the target so readers see
    // either the old document or the new one.
    fn write_file(path: &Path, payload: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(&staging, perm)?;
        }

        fs::rename(&staging, path)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn load(&self, origin: &str) -> Result<Option<CredentialDocument>, StorageError> {
        let path = self.locator.credentials_file(origin);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let document: CredentialDocument = serde_json::from_str(&raw)?;
        if document.version != DOCUMENT_VERSION {
            return Err(StorageError::UnsupportedVersion(document.version));
        }
        Ok(Some(document))
    }

    fn save(&self, document: &CredentialDocument) -> Result<(), StorageError> {
        let path = self.locator.credentials_file(&document.origin);
        let payload = serde_json::to_string_pretty(document)?;
        Self::write_file(&path, &payload)
    }

    fn delete(&self, origin: &str) -> Result<(), StorageError> {
        let path = self.locator.credentials_file(origin);
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local storage; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStorage {
    documents: Mutex<HashMap<String, CredentialDocument>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn load(&self, origin: &str) -> Result<Option<CredentialDocument>, StorageError> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(origin).cloned())
    }

    fn save(&self, document: &CredentialDocument) -> Result<(), StorageError> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.insert(document.origin.clone(), document.clone());
        Ok(())
    }

    fn delete(&self, origin: &str) -> Result<(), StorageError> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.remove(origin);
        Ok(())
    }
}
