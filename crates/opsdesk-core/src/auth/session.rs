use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which half of a credential pair a token belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    /// Literal key under which the credential is persisted.
    pub fn storage_key(self) -> &'static str {
        match self {
            CredentialKind::Access => "accessToken",
            CredentialKind::Refresh => "refreshToken",
        }
    }
}

/// An opaque token with an absolute expiry. Never mutated once issued.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    kind: CredentialKind,
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(kind: CredentialKind, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            token: token.into(),
            expires_at,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// Token values stay out of logs and panic messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Lifetimes applied to freshly issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialTtl {
    pub access: Duration,
    pub refresh: Duration,
}

impl CredentialTtl {
    pub fn from_minutes(access: i64, refresh: i64) -> Self {
        Self {
            access: Duration::minutes(access),
            refresh: Duration::minutes(refresh),
        }
    }
}

/// Access and refresh credentials issued together by one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: Credential,
    pub refresh: Credential,
}

impl CredentialPair {
    /// Stamp raw token strings with absolute expiries relative to `issued_at`.
    pub fn issue(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        ttl: CredentialTtl,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access: Credential::new(
                CredentialKind::Access,
                access_token,
                issued_at + ttl.access,
            ),
            refresh: Credential::new(
                CredentialKind::Refresh,
                refresh_token,
                issued_at + ttl.refresh,
            ),
        }
    }
}

/// Unexpired credentials currently held in storage. Either half may be missing
/// once its own expiry passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access: Option<Credential>,
    pub refresh: Option<Credential>,
}

impl StoredCredentials {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access.as_ref().map(Credential::token)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh.as_ref().map(Credential::token)
    }

    pub fn into_pair(self) -> Option<CredentialPair> {
        match (self.access, self.refresh) {
            (Some(access), Some(refresh)) => Some(CredentialPair { access, refresh }),
            _ => None,
        }
    }
}

impl From<CredentialPair> for StoredCredentials {
    fn from(pair: CredentialPair) -> Self {
        Self {
            access: Some(pair.access),
            refresh: Some(pair.refresh),
        }
    }
}
