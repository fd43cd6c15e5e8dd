use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::{LoginReason, StorageError};

/// Network-level failures. These are never classified and never trigger refresh
/// or logout.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err)
        } else if err.is_connect() {
            TransportError::Connect(err)
        } else {
            TransportError::Http(err)
        }
    }
}

/// Errors returned by [`AuthenticatedClient::execute`](super::AuthenticatedClient::execute).
/// Server-reported failures are resolved internally and never appear here.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid request target: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid header '{0}'")]
    Header(String),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        RequestError::Transport(err.into())
    }
}

/// Errors from the typed `data` helpers layered over `execute`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("signed out: {0}")]
    SignedOut(LoginReason),
    #[error("server reported failure (code {code:?}): {message}")]
    Failed {
        code: Option<String>,
        message: String,
    },
    #[error("unexpected response {status}: {body}")]
    Unexpected { status: StatusCode, body: String },
    #[error("failed to deserialize response data: {0}")]
    Deserialize(#[from] serde_json::Error),
}
