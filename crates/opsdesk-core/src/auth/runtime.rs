use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity projection published after a refresh or restore. Written, never read,
/// by the request pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(alias = "id", deserialize_with = "crate::http::lenient::string_or_number")]
    pub user_id: String,
    #[serde(default, alias = "username")]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message surfaced to the user for an application-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub code: Option<String>,
    pub message: String,
}

/// Why the user is being sent to the login screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReason {
    /// No usable credentials, or the server reported the caller as unauthenticated.
    NotAuthenticated,
    /// Credentials were rejected or could not be refreshed and have been cleared.
    SessionEnded,
}

impl fmt::Display for LoginReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginReason::NotAuthenticated => write!(f, "not authenticated"),
            LoginReason::SessionEnded => write!(f, "session ended"),
        }
    }
}

/// Receives the identity snapshot owned by the host application.
pub trait SessionSink: Send + Sync {
    fn publish(&self, snapshot: SessionSnapshot);
    fn clear(&self);
}

/// Presents failures the pipeline decides are worth interrupting the user for.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Sends the user to the re-authentication screen.
pub trait NavigationSink: Send + Sync {
    fn to_login(&self, reason: LoginReason);
}

/// Handles to the host application's sinks, built once at bootstrap and shared
/// by the executor and the refresh coordinator.
#[derive(Clone)]
pub struct AuthRuntime {
    session: Arc<dyn SessionSink>,
    notifications: Arc<dyn NotificationSink>,
    navigation: Arc<dyn NavigationSink>,
}

impl AuthRuntime {
    pub fn new(
        session: Arc<dyn SessionSink>,
        notifications: Arc<dyn NotificationSink>,
        navigation: Arc<dyn NavigationSink>,
    ) -> Self {
        Self {
            session,
            notifications,
            navigation,
        }
    }

    pub fn session(&self) -> &dyn SessionSink {
        self.session.as_ref()
    }

    pub fn notifications(&self) -> &dyn NotificationSink {
        self.notifications.as_ref()
    }

    pub fn navigation(&self) -> &dyn NavigationSink {
        self.navigation.as_ref()
    }
}

impl fmt::Debug for AuthRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRuntime").finish_non_exhaustive()
    }
}
