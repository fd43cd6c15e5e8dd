//! Refresh-credential exchange with single-flight coalescing.
//!
//! Concurrent callers that detect an expired access credential share one exchange:
//! the first caller publishes a shared future, the rest await it, and the slot is
//! emptied once it settles. A caller holding a [`RefreshTicket`] taken before an
//! exchange settled receives that exchange's result instead of starting another,
//! since each exchange rotates the refresh credential and invalidates the previous one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::http::{
    AttachedCredential, Envelope, FetchError, RequestContext, RequestError, TransportError, Wire,
};

use super::{
    AuthRuntime, CredentialPair, CredentialStore, LoginReason, RefreshFailure, SessionSnapshot,
};

type RefreshResult = Result<CredentialPair, RefreshFailure>;
type RefreshFlight = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedTokens {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Marks how many exchanges had settled when a caller read its credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

#[derive(Default)]
struct FlightState {
    settled: u64,
    current: Option<RefreshFlight>,
    last: Option<RefreshResult>,
}

/// Exchanges the refresh credential for a new pair and owns the logout policy when
/// that exchange fails.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    wire: Wire,
    store: Arc<CredentialStore>,
    runtime: AuthRuntime,
    state: Mutex<FlightState>,
}

impl RefreshCoordinator {
    pub(crate) fn new(wire: Wire, store: Arc<CredentialStore>, runtime: AuthRuntime) -> Self {
        Self {
            inner: Arc::new(Inner {
                wire,
                store,
                runtime,
                state: Mutex::new(FlightState::default()),
            }),
        }
    }

    /// Take before reading credentials that may later need refreshing.
    pub fn ticket(&self) -> RefreshTicket {
        RefreshTicket(self.inner.state().settled)
    }

    /// Exchange the stored refresh credential, joining an exchange already in flight.
    pub async fn refresh(&self) -> RefreshResult {
        let flight = {
            let mut state = self.inner.state();
            match state.current.clone() {
                Some(flight) => flight,
                None => self.start(&mut state),
            }
        };
        flight.await
    }

    /// Refresh on behalf of a caller whose credentials were read under `ticket`.
    ///
    /// Joins an in-flight exchange if there is one. If an exchange has settled since
    /// the ticket was taken, its outcome is reused: the stored pair on success, the
    /// same failure (without a second logout) otherwise.
    pub async fn refresh_since(&self, ticket: RefreshTicket) -> RefreshResult {
        let flight = {
            let mut state = self.inner.state();
            if let Some(flight) = state.current.clone() {
                debug!("joining in-flight refresh");
                flight
            } else if state.settled != ticket.0 {
                match state.last.clone() {
                    Some(Ok(pair)) => {
                        debug!("credentials refreshed since ticket; reusing");
                        let current = self.inner.store.get()?.into_pair();
                        return Ok(current.unwrap_or(pair));
                    }
                    Some(Err(failure)) => return Err(failure),
                    None => self.start(&mut state),
                }
            } else {
                self.start(&mut state)
            }
        };
        flight.await
    }

    /// Clear credentials and the session snapshot, then send the user to login.
    pub fn end_session(&self) {
        self.inner.end_session();
    }

    /// End the session after the server rejected credentials read under `ticket`.
    ///
    /// Settles like a failed exchange, so concurrent callers holding the same ticket
    /// and later `refresh_since` callers see the failure instead of ending the
    /// session again. Returns `false` when the session had already ended since the
    /// ticket was taken.
    pub fn force_logout(&self, ticket: RefreshTicket, code: &str) -> bool {
        {
            let mut state = self.inner.state();
            if state.settled != ticket.0 && matches!(state.last, Some(Err(_))) {
                debug!(%code, "session already ended; skipping logout");
                return false;
            }
            state.settled += 1;
            state.last = Some(Err(RefreshFailure::Revoked {
                code: code.to_owned(),
            }));
        }
        warn!(%code, "credentials rejected by server; ending session");
        self.inner.end_session();
        true
    }

    fn start(&self, state: &mut FlightState) -> RefreshFlight {
        let inner = Arc::clone(&self.inner);
        let flight = inner.run().boxed().shared();
        state.current = Some(flight.clone());
        flight
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, FlightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>) -> RefreshResult {
        let result = self.exchange().await;
        match &result {
            Ok(pair) => {
                info!(expires_at = %pair.access.expires_at(), "refreshed credential pair");
                self.publish_identity(pair).await;
            }
            Err(failure) => {
                warn!(error = %failure, "credential refresh failed; ending session");
                self.end_session();
            }
        }
        let mut state = self.state();
        state.settled += 1;
        state.current = None;
        state.last = Some(result.clone());
        drop(state);
        result
    }

    async fn exchange(&self) -> RefreshResult {
        let stored = self.store.get()?;
        let refresh = stored
            .refresh
            .ok_or(RefreshFailure::NoRefreshCredential)?;

        let config = self.wire.config();
        let context =
            RequestContext::get(config.refresh_path.clone()).with_timeout(config.refresh_timeout());
        let credential = AttachedCredential {
            header: &config.refresh_header,
            token: refresh.token(),
        };
        let response = self
            .wire
            .send(&context, Some(credential))
            .await
            .map_err(failure_from_request)?;

        let tokens: IssuedTokens = match response.envelope() {
            Some(Envelope::Success { data: Some(data), .. }) => {
                serde_json::from_value(data.clone()).map_err(|_| RefreshFailure::IncompletePair)?
            }
            Some(Envelope::Success { data: None, .. }) => return Err(RefreshFailure::IncompletePair),
            Some(Envelope::Failure { code, message, .. }) => {
                return Err(RefreshFailure::Rejected {
                    code: code.clone(),
                    message: message.clone().unwrap_or_default(),
                })
            }
            None if !response.status().is_success() => {
                return Err(RefreshFailure::Rejected {
                    code: None,
                    message: format!("refresh endpoint returned {}", response.status()),
                })
            }
            None => return Err(RefreshFailure::IncompletePair),
        };

        let (Some(access_token), Some(refresh_token)) = (
            tokens.access_token.filter(|t| !t.is_empty()),
            tokens.refresh_token.filter(|t| !t.is_empty()),
        ) else {
            return Err(RefreshFailure::IncompletePair);
        };

        let pair = CredentialPair::issue(access_token, refresh_token, self.store.ttl(), Utc::now());
        self.store.set(&pair)?;
        Ok(pair)
    }

    // Failure here leaves the refreshed pair in place.
    async fn publish_identity(&self, pair: &CredentialPair) {
        let config = self.wire.config();
        let context = RequestContext::get(config.identity_path.clone());
        let credential = AttachedCredential {
            header: &config.access_header,
            token: pair.access.token(),
        };
        let snapshot = match self.wire.send(&context, Some(credential)).await {
            Ok(response) => response.into_data::<SessionSnapshot>(),
            Err(err) => Err(FetchError::Request(err)),
        };
        match snapshot {
            Ok(snapshot) => self.runtime.session().publish(snapshot),
            Err(err) => warn!(error = %err, "identity fetch after refresh failed"),
        }
    }

    fn end_session(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear stored credentials");
        }
        self.runtime.session().clear();
        self.runtime.navigation().to_login(LoginReason::SessionEnded);
    }
}

fn failure_from_request(err: RequestError) -> RefreshFailure {
    match err {
        RequestError::Transport(TransportError::Timeout(_)) => RefreshFailure::TimedOut,
        RequestError::Storage(err) => err.into(),
        other => RefreshFailure::Transport(other.to_string()),
    }
}
