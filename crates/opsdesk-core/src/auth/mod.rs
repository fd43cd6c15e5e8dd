mod classifier;
mod credential_store;
mod error;
mod refresh;
mod runtime;
mod session;
mod storage;

pub use classifier::{classify, ErrorClassifier, RemediationAction};
pub use credential_store::CredentialStore;
pub use error::{RefreshFailure, StorageError};
pub use refresh::{RefreshCoordinator, RefreshTicket};
pub use runtime::{
    AuthRuntime, LoginReason, NavigationSink, Notice, NotificationSink, SessionSink,
    SessionSnapshot,
};
pub use session::{Credential, CredentialKind, CredentialPair, CredentialTtl, StoredCredentials};
pub use storage::{CredentialDocument, FileStorage, MemoryStorage, StorageBackend, StoredItem};

pub mod codes {
    //! Literal server error codes understood by the classifier.
    pub use super::classifier::{
        ACCESS_EXPIRED, ACCESS_INVALID, FORBIDDEN, INVALID_REQUEST, NOT_AUTHENTICATED,
        REFRESH_EXPIRED, REFRESH_INVALID,
    };
}
