use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::storage::{CredentialDocument, StorageBackend, StoredItem};
use super::{Credential, CredentialKind, CredentialPair, CredentialTtl, StorageError, StoredCredentials};

/// Sole gateway to the persisted access/refresh credentials of one origin.
///
/// `set` replaces the whole document in a single backend write, so readers never
/// observe a new access credential beside a stale refresh credential.
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    origin: String,
    ttl: CredentialTtl,
    guard: Mutex<()>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>, origin: impl Into<String>, ttl: CredentialTtl) -> Self {
        Self {
            backend,
            origin: origin.into(),
            ttl,
            guard: Mutex::new(()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn ttl(&self) -> CredentialTtl {
        self.ttl
    }

    /// Unexpired credentials as of now.
    pub fn get(&self) -> Result<StoredCredentials, StorageError> {
        self.get_at(Utc::now())
    }

    pub fn get_at(&self, now: DateTime<Utc>) -> Result<StoredCredentials, StorageError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(document) = self.backend.load(&self.origin)? else {
            return Ok(StoredCredentials::default());
        };
        Ok(StoredCredentials {
            access: read_item(&document, CredentialKind::Access, now),
            refresh: read_item(&document, CredentialKind::Refresh, now),
        })
    }

    /// Replace whatever is stored with `pair`.
    pub fn set(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = CredentialDocument::new(self.origin.clone());
        for credential in [&pair.access, &pair.refresh] {
            document.items.insert(
                credential.kind().storage_key().to_owned(),
                StoredItem {
                    value: credential.token().to_owned(),
                    expires_at: credential.expires_at(),
                },
            );
        }
        self.backend.save(&document)?;
        debug!(origin = %self.origin, expires_at = %pair.access.expires_at(), "stored credential pair");
        Ok(())
    }

    /// Stamp raw tokens with the configured TTLs and store them as a pair.
    pub fn import(&self, access_token: &str, refresh_token: &str) -> Result<CredentialPair, StorageError> {
        let pair = CredentialPair::issue(access_token, refresh_token, self.ttl, Utc::now());
        self.set(&pair)?;
        Ok(pair)
    }

    /// Remove both credentials. Clearing an empty store is a no-op.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.delete(&self.origin)?;
        debug!(origin = %self.origin, "cleared credentials");
        Ok(())
    }
}

fn read_item(document: &CredentialDocument, kind: CredentialKind, now: DateTime<Utc>) -> Option<Credential> {
    let item = document.items.get(kind.storage_key())?;
    let credential = Credential::new(kind, item.value.clone(), item.expires_at);
    (!credential.is_expired_at(now)).then_some(credential)
}
