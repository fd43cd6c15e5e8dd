use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by credential persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported credential document version {0}")]
    UnsupportedVersion(u32),
}

/// Why a refresh exchange did not yield a new credential pair.
///
/// Cloneable so every caller awaiting the same in-flight exchange receives the result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh credential available")]
    NoRefreshCredential,
    #[error("refresh rejected by server (code {code:?}): {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },
    #[error("refresh response did not include both new credentials")]
    IncompletePair,
    #[error("refresh exchange timed out")]
    TimedOut,
    #[error("refresh transport error: {0}")]
    Transport(String),
    #[error("credential storage error: {0}")]
    Storage(String),
    #[error("credentials rejected by server (code {code}); session ended")]
    Revoked { code: String },
}

impl From<StorageError> for RefreshFailure {
    fn from(err: StorageError) -> Self {
        RefreshFailure::Storage(err.to_string())
    }
}
