use tracing::{debug, info, warn};

use crate::auth::{SessionSnapshot, StorageError};
use crate::http::{AuthenticatedClient, FetchError, RequestContext};

/// Result of the startup restore attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// The identity call succeeded and the snapshot was published.
    Restored(SessionSnapshot),
    /// Nothing was persisted; no request was made.
    NoCredentials,
    /// The identity call failed and persisted credentials were discarded.
    Failed(String),
}

/// Startup restore and explicit logout for the session held by an [`AuthenticatedClient`].
#[derive(Clone)]
pub struct SessionLifecycle {
    client: AuthenticatedClient,
}

impl SessionLifecycle {
    pub fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Rebuild the session snapshot from persisted credentials, going through the
    /// executor so an expired access credential is refreshed first. Any failure
    /// leaves the user logged out.
    pub async fn restore(&self) -> Result<RestoreOutcome, StorageError> {
        if self.client.store().get()?.is_empty() {
            debug!("no persisted credentials; skipping restore");
            return Ok(RestoreOutcome::NoCredentials);
        }

        let identity_path = self.client.config().identity_path.clone();
        let result = self
            .client
            .fetch_data::<SessionSnapshot>(RequestContext::get(identity_path))
            .await;

        match result {
            Ok(snapshot) => {
                info!(user_id = %snapshot.user_id, "restored session");
                self.client.runtime().session().publish(snapshot.clone());
                Ok(RestoreOutcome::Restored(snapshot))
            }
            Err(err) => {
                warn!(error = %err, "session restore failed; discarding credentials");
                self.discard()?;
                Ok(RestoreOutcome::Failed(describe(&err)))
            }
        }
    }

    /// Forget the current user without navigating anywhere.
    pub fn logout(&self) -> Result<(), StorageError> {
        self.discard()?;
        info!("logged out");
        Ok(())
    }

    fn discard(&self) -> Result<(), StorageError> {
        self.client.store().clear()?;
        self.client.runtime().session().clear();
        Ok(())
    }
}

fn describe(err: &FetchError) -> String {
    match err {
        FetchError::Failed {
            code: Some(code),
            message,
        } => format!("{message} (code {code})"),
        other => other.to_string(),
    }
}
