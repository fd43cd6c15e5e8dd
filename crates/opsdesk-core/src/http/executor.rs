use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::{
    AuthRuntime, CredentialStore, CredentialTtl, ErrorClassifier, LoginReason, Notice,
    RefreshCoordinator, RefreshTicket, RemediationAction, StorageBackend,
};
use crate::config::ClientConfig;

use super::{
    ApiResponse, AttachedCredential, FetchError, RequestContext, RequestError, TransportError,
    Wire,
};

/// Final result of one `execute` call.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The server's response, after at most one refresh-and-retry.
    Delivered(ApiResponse),
    /// The request was abandoned and the user sent to login.
    SignedOut(LoginReason),
}

impl Outcome {
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Outcome::Delivered(response) => Some(response),
            Outcome::SignedOut(_) => None,
        }
    }

    pub fn into_response(self) -> Option<ApiResponse> {
        match self {
            Outcome::Delivered(response) => Some(response),
            Outcome::SignedOut(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Retried,
}

struct ReadyAccess {
    token: String,
    ticket: RefreshTicket,
    attempt: Attempt,
}

enum AccessState {
    Ready(ReadyAccess),
    Unavailable(LoginReason),
}

/// Attaches the access credential to every call and resolves classified
/// authentication failures before the caller sees the response.
#[derive(Clone)]
pub struct AuthenticatedClient {
    wire: Wire,
    store: Arc<CredentialStore>,
    runtime: AuthRuntime,
    coordinator: RefreshCoordinator,
    classifier: ErrorClassifier,
}

impl AuthenticatedClient {
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn StorageBackend>,
        runtime: AuthRuntime,
    ) -> Result<Self, TransportError> {
        let ttl = CredentialTtl::from_minutes(config.access_ttl_minutes, config.refresh_ttl_minutes);
        let store = Arc::new(CredentialStore::new(backend, config.origin_key(), ttl));
        let classifier = ErrorClassifier::new(config.notify_unmapped_failures);
        let wire = Wire::new(Arc::new(config))?;
        let coordinator = RefreshCoordinator::new(wire.clone(), Arc::clone(&store), runtime.clone());
        Ok(Self {
            wire,
            store,
            runtime,
            coordinator,
            classifier,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.wire.config()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn runtime(&self) -> &AuthRuntime {
        &self.runtime
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Issue `context`, refreshing and retrying at most once on an expired access
    /// credential. Only transport and storage problems surface as errors.
    ///
    /// A proactive refresh (access credential absent) uses up the single refresh, so
    /// the first response is then handled like a retried one.
    pub async fn execute(&self, context: RequestContext) -> Result<Outcome, RequestError> {
        if context.skip_auth {
            let response = self.wire.send(&context, None).await?;
            return Ok(Outcome::Delivered(response));
        }

        let ReadyAccess {
            mut token,
            ticket,
            mut attempt,
        } = match self.access_token().await? {
            AccessState::Ready(ready) => ready,
            AccessState::Unavailable(reason) => return Ok(Outcome::SignedOut(reason)),
        };

        loop {
            let response = self.wire.send(&context, Some(self.attach(&token))).await?;
            let Some(code) = response.failure_code().map(str::to_owned) else {
                return Ok(Outcome::Delivered(response));
            };
            let action = self.classifier.classify(&code);
            debug!(%code, %action, ?attempt, target = %context.target, "classified failure");

            match (action, attempt) {
                (RemediationAction::RetryAfterRefresh, Attempt::Initial) => {
                    match self.coordinator.refresh_since(ticket).await {
                        Ok(pair) => {
                            token = pair.access.token().to_owned();
                            attempt = Attempt::Retried;
                        }
                        // The coordinator has already ended the session.
                        Err(_) => return Ok(Outcome::SignedOut(LoginReason::SessionEnded)),
                    }
                }
                (action, Attempt::Retried) => {
                    if action == RemediationAction::ShowErrorToUser {
                        self.notify(&code, &response);
                    } else if action != RemediationAction::Silent {
                        warn!(%code, %action, target = %context.target, "returning failed response after refresh");
                    }
                    return Ok(Outcome::Delivered(response));
                }
                (action, Attempt::Initial) => {
                    return Ok(self.remediate(action, &code, ticket, response))
                }
            }
        }
    }

    /// Execute and decode the `data` member of a success envelope.
    pub async fn fetch_data<T: DeserializeOwned>(&self, context: RequestContext) -> Result<T, FetchError> {
        match self.execute(context).await? {
            Outcome::Delivered(response) => response.into_data(),
            Outcome::SignedOut(reason) => Err(FetchError::SignedOut(reason)),
        }
    }

    pub async fn get_data<T: DeserializeOwned>(&self, target: &str) -> Result<T, FetchError> {
        self.fetch_data(RequestContext::get(target)).await
    }

    async fn access_token(&self) -> Result<AccessState, RequestError> {
        let ticket = self.coordinator.ticket();
        let stored = self.store.get()?;
        if let Some(access) = stored.access {
            return Ok(AccessState::Ready(ReadyAccess {
                token: access.token().to_owned(),
                ticket,
                attempt: Attempt::Initial,
            }));
        }
        if stored.refresh.is_some() {
            debug!("no access credential; refreshing before request");
            return Ok(match self.coordinator.refresh_since(ticket).await {
                Ok(pair) => AccessState::Ready(ReadyAccess {
                    token: pair.access.token().to_owned(),
                    ticket: self.coordinator.ticket(),
                    attempt: Attempt::Retried,
                }),
                Err(_) => AccessState::Unavailable(LoginReason::SessionEnded),
            });
        }
        self.runtime.navigation().to_login(LoginReason::NotAuthenticated);
        Ok(AccessState::Unavailable(LoginReason::NotAuthenticated))
    }

    fn attach<'a>(&'a self, token: &'a str) -> AttachedCredential<'a> {
        AttachedCredential {
            header: &self.wire.config().access_header,
            token,
        }
    }

    fn remediate(
        &self,
        action: RemediationAction,
        code: &str,
        ticket: RefreshTicket,
        response: ApiResponse,
    ) -> Outcome {
        match action {
            RemediationAction::ForceLogout => {
                self.coordinator.force_logout(ticket, code);
                Outcome::SignedOut(LoginReason::SessionEnded)
            }
            RemediationAction::RedirectToLogin => {
                self.runtime.navigation().to_login(LoginReason::NotAuthenticated);
                Outcome::SignedOut(LoginReason::NotAuthenticated)
            }
            RemediationAction::ShowErrorToUser => {
                self.notify(code, &response);
                Outcome::Delivered(response)
            }
            RemediationAction::StayOnPage
            | RemediationAction::Silent
            | RemediationAction::RetryAfterRefresh => Outcome::Delivered(response),
        }
    }

    fn notify(&self, code: &str, response: &ApiResponse) {
        let message = response
            .envelope()
            .and_then(|envelope| envelope.message())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Request failed (code {code})"));
        self.runtime.notifications().notify(Notice {
            code: Some(code.to_owned()),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, CredentialKind, CredentialPair};
    use crate::test_support::{
        harness, harness_with, json_failure, json_success, without_access_header, Harness, ACCESS,
        REFRESH,
    };
    use futures::future::join_all;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn json_mock<'a>(
        server: &'a MockServer,
        path: &str,
        token: &str,
        body: String,
    ) -> httpmock::Mock<'a> {
        let (path, token) = (path.to_owned(), token.to_owned());
        server.mock(move |when, then| {
            when.method(GET).path(path).header(ACCESS, token);
            then.status(200)
                .header("content-type", "application/json")
                .body(body);
        })
    }

    fn refresh_mock<'a>(server: &'a MockServer, presented: &str, at: &str, rt: &str) -> httpmock::Mock<'a> {
        let presented = presented.to_owned();
        let body = json_success(serde_json::json!({ "accessToken": at, "refreshToken": rt }));
        server.mock(move |when, then| {
            when.method(GET).path("/auth/refresh").header(REFRESH, presented);
            then.status(200)
                .header("content-type", "application/json")
                .delay(Duration::from_millis(150))
                .body(body);
        })
    }

    fn delivered(outcome: Outcome) -> ApiResponse {
        match outcome {
            Outcome::Delivered(response) => response,
            Outcome::SignedOut(reason) => panic!("unexpectedly signed out: {reason}"),
        }
    }

    #[tokio::test]
    async fn skip_auth_sends_no_credential_and_skips_classification() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/login")
                .matches(without_access_header);
            then.status(200)
                .header("content-type", "application/json")
                .body(json_failure("1008", "invalid"));
        });

        let outcome = client
            .execute(RequestContext::post("/auth/login").skip_auth())
            .await
            .unwrap();

        mock.assert_hits(1);
        assert_eq!(delivered(outcome).failure_code(), Some("1008"));
        assert!(recorder.logins().is_empty());
        assert_eq!(client.store().get().unwrap().access_token(), Some("at1"));
    }

    #[tokio::test]
    async fn valid_access_makes_exactly_one_call() {
        let server = MockServer::start();
        let Harness { client, .. } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        let call = json_mock(&server, "/customers", "at1", json_success(serde_json::json!([1, 2])));
        let refresh = server.mock(|when, then| {
            when.path("/auth/refresh");
            then.status(500);
        });

        let response = delivered(client.execute(RequestContext::get("/customers")).await.unwrap());

        call.assert_hits(1);
        refresh.assert_hits(0);
        assert!(response.envelope().unwrap().is_success());
    }

    fn store_refresh_only(client: &AuthenticatedClient, refresh: &str) {
        let now = chrono::Utc::now();
        client
            .store()
            .set(&CredentialPair {
                access: Credential::new(CredentialKind::Access, "stale", now - chrono::Duration::minutes(1)),
                refresh: Credential::new(CredentialKind::Refresh, refresh, now + chrono::Duration::days(1)),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn missing_access_refreshes_before_request() {
        let server = MockServer::start();
        let Harness { client, .. } = harness(&server);
        store_refresh_only(&client, "rt1");
        let refresh = refresh_mock(&server, "rt1", "at2", "rt2");
        let call = json_mock(&server, "/orders", "at2", json_success(serde_json::json!({ "n": 3 })));

        let response = delivered(client.execute(RequestContext::get("/orders")).await.unwrap());

        refresh.assert_hits(1);
        call.assert_hits(1);
        assert_eq!(response.json::<serde_json::Value>().unwrap()["data"]["n"], 3);
    }

    #[tokio::test]
    async fn failed_proactive_refresh_skips_request() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        store_refresh_only(&client, "rt1");
        let refresh = server.mock(|when, then| {
            when.method(GET).path("/auth/refresh");
            then.status(200)
                .header("content-type", "application/json")
                .body(json_failure("1007", "refresh expired"));
        });
        let call = server.mock(|when, then| {
            when.path("/orders");
            then.status(200);
        });

        let outcome = client.execute(RequestContext::get("/orders")).await.unwrap();

        refresh.assert_hits(1);
        call.assert_hits(0);
        assert!(matches!(outcome, Outcome::SignedOut(LoginReason::SessionEnded)));
        assert_eq!(recorder.logins(), vec![LoginReason::SessionEnded]);
        assert!(client.store().get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn proactive_refresh_counts_as_the_only_refresh() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        store_refresh_only(&client, "rt1");
        let first = refresh_mock(&server, "rt1", "at2", "rt2");
        let second = refresh_mock(&server, "rt2", "at3", "rt3");
        let call = json_mock(&server, "/orders", "at2", json_failure("1006", "expired"));

        let response = delivered(client.execute(RequestContext::get("/orders")).await.unwrap());

        first.assert_hits(1);
        second.assert_hits(0);
        call.assert_hits(1);
        assert_eq!(response.failure_code(), Some("1006"));
        assert!(recorder.logins().is_empty());
    }

    #[tokio::test]
    async fn no_credentials_redirects_without_request() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        let any = server.mock(|_when, then| {
            then.status(200);
        });

        let outcome = client.execute(RequestContext::get("/orders")).await.unwrap();

        any.assert_hits(0);
        assert!(matches!(outcome, Outcome::SignedOut(LoginReason::NotAuthenticated)));
        assert_eq!(recorder.logins(), vec![LoginReason::NotAuthenticated]);
    }

    #[tokio::test]
    async fn expired_access_refreshes_and_retries_once() {
        let server = MockServer::start();
        let Harness { client, .. } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        let first = json_mock(&server, "/invoices", "at1", json_failure("1006", "expired"));
        let refresh = refresh_mock(&server, "rt1", "at2", "rt2");
        let retry = json_mock(
            &server,
            "/invoices",
            "at2",
            json_success(serde_json::json!({ "total": 12 })),
        );

        let response = delivered(client.execute(RequestContext::get("/invoices")).await.unwrap());

        first.assert_hits(1);
        refresh.assert_hits(1);
        retry.assert_hits(1);
        assert!(response.envelope().unwrap().is_success());
        let stored = client.store().get().unwrap();
        assert_eq!(stored.access_token(), Some("at2"));
        assert_eq!(stored.refresh_token(), Some("rt2"));
    }

    #[tokio::test]
    async fn retried_failure_is_returned_without_second_refresh() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/invoices", "at1", json_failure("1006", "expired"));
        let refresh = refresh_mock(&server, "rt1", "at2", "rt2");
        let retry = json_mock(&server, "/invoices", "at2", json_failure("1006", "still expired"));

        let response = delivered(client.execute(RequestContext::get("/invoices")).await.unwrap());

        refresh.assert_hits(1);
        retry.assert_hits(1);
        assert_eq!(response.failure_code(), Some("1006"));
        assert!(recorder.logins().is_empty());
    }

    #[tokio::test]
    async fn retried_response_is_returned_whatever_its_code() {
        for code in ["1001", "1007", "1008", "1009"] {
            let server = MockServer::start();
            let Harness { client, recorder } = harness(&server);
            client.store().import("at1", "rt1").unwrap();
            json_mock(&server, "/invoices", "at1", json_failure("1006", "expired"));
            let refresh = refresh_mock(&server, "rt1", "at2", "rt2");
            let retry = json_mock(&server, "/invoices", "at2", json_failure(code, "rejected"));

            let outcome = client.execute(RequestContext::get("/invoices")).await.unwrap();

            refresh.assert_hits(1);
            retry.assert_hits(1);
            assert_eq!(delivered(outcome).failure_code(), Some(code));
            assert!(recorder.logins().is_empty());
            assert_eq!(recorder.session_clears(), 0);
            assert_eq!(client.store().get().unwrap().access_token(), Some("at2"));
        }
    }

    #[tokio::test]
    async fn retried_application_failure_still_notifies() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/products", "at1", json_failure("1006", "expired"));
        refresh_mock(&server, "rt1", "at2", "rt2");
        json_mock(&server, "/products", "at2", json_failure("1010", "SKU is required"));

        let response = delivered(client.execute(RequestContext::get("/products")).await.unwrap());

        assert_eq!(response.failure_code(), Some("1010"));
        assert_eq!(recorder.notices().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_expiries_share_a_single_refresh() {
        let server = MockServer::start();
        let Harness { client, .. } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        let first = json_mock(&server, "/stock", "at1", json_failure("1006", "expired"));
        let refresh = refresh_mock(&server, "rt1", "at2", "rt2");
        let retry = json_mock(&server, "/stock", "at2", json_success(serde_json::json!({})));

        let outcomes = join_all((0..4).map(|_| client.execute(RequestContext::get("/stock")))).await;

        refresh.assert_hits(1);
        first.assert_hits(4);
        retry.assert_hits(4);
        for outcome in outcomes {
            assert!(delivered(outcome.unwrap()).envelope().unwrap().is_success());
        }
    }

    #[tokio::test]
    async fn failed_refresh_ends_session_once() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/stock", "at1", json_failure("1006", "expired"));
        let refresh = server.mock(|when, then| {
            when.method(GET).path("/auth/refresh");
            then.status(200)
                .header("content-type", "application/json")
                .delay(Duration::from_millis(150))
                .body(json_success(serde_json::json!({ "accessToken": "at2" })));
        });

        let outcomes = join_all((0..3).map(|_| client.execute(RequestContext::get("/stock")))).await;

        refresh.assert_hits(1);
        for outcome in outcomes {
            assert!(matches!(outcome.unwrap(), Outcome::SignedOut(LoginReason::SessionEnded)));
        }
        assert_eq!(recorder.logins(), vec![LoginReason::SessionEnded]);
        assert_eq!(recorder.session_clears(), 1);
        assert!(client.store().get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_logout_codes_clear_everything() {
        for code in ["1007", "1008", "1009"] {
            let server = MockServer::start();
            let Harness { client, recorder } = harness(&server);
            client.store().import("at1", "rt1").unwrap();
            json_mock(&server, "/ledger", "at1", json_failure(code, "nope"));

            let outcome = client.execute(RequestContext::get("/ledger")).await.unwrap();

            assert!(matches!(outcome, Outcome::SignedOut(LoginReason::SessionEnded)));
            assert!(client.store().get().unwrap().is_empty());
            assert_eq!(recorder.session_clears(), 1);
            assert_eq!(recorder.logins(), vec![LoginReason::SessionEnded]);
            assert!(recorder.notices().is_empty());
        }
    }

    #[tokio::test]
    async fn concurrent_forced_logouts_navigate_once() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        let ledger = server.mock(|when, then| {
            when.method(GET).path("/ledger").header(ACCESS, "at1");
            then.status(200)
                .header("content-type", "application/json")
                .delay(Duration::from_millis(100))
                .body(json_failure("1008", "invalid"));
        });

        let outcomes = join_all((0..4).map(|_| client.execute(RequestContext::get("/ledger")))).await;

        ledger.assert_hits(4);
        for outcome in outcomes {
            assert!(matches!(outcome.unwrap(), Outcome::SignedOut(LoginReason::SessionEnded)));
        }
        assert_eq!(recorder.logins(), vec![LoginReason::SessionEnded]);
        assert_eq!(recorder.session_clears(), 1);
        assert!(client.store().get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn not_authenticated_redirects_and_keeps_credentials() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/ledger", "at1", json_failure("1001", "login"));

        let outcome = client.execute(RequestContext::get("/ledger")).await.unwrap();

        assert!(matches!(outcome, Outcome::SignedOut(LoginReason::NotAuthenticated)));
        assert_eq!(recorder.logins(), vec![LoginReason::NotAuthenticated]);
        assert_eq!(recorder.session_clears(), 0);
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn forbidden_stays_on_page() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/admin", "at1", json_failure("1003", "forbidden"));

        let response = delivered(client.execute(RequestContext::get("/admin")).await.unwrap());

        assert_eq!(response.failure_code(), Some("1003"));
        assert!(recorder.logins().is_empty());
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn invalid_request_notifies_user() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/products", "at1", json_failure("1010", "SKU is required"));

        let response = delivered(client.execute(RequestContext::get("/products")).await.unwrap());

        assert_eq!(response.failure_code(), Some("1010"));
        assert_eq!(
            recorder.notices(),
            vec![Notice {
                code: Some("1010".into()),
                message: "SKU is required".into(),
            }]
        );
    }

    #[tokio::test]
    async fn unmapped_codes_follow_configured_policy() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/products", "at1", json_failure("2001", "duplicate"));
        client.execute(RequestContext::get("/products")).await.unwrap();
        assert!(recorder.notices().is_empty());

        let server = MockServer::start();
        let Harness { client, recorder } = harness_with(&server, |config| {
            config.notify_unmapped_failures = true;
        });
        client.store().import("at1", "rt1").unwrap();
        json_mock(&server, "/products", "at1", json_failure("2001", "duplicate"));
        client.execute(RequestContext::get("/products")).await.unwrap();
        assert_eq!(recorder.notices().len(), 1);
    }

    #[tokio::test]
    async fn binary_download_is_not_classified() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        server.mock(|when, then| {
            when.method(GET).path("/reports/export").header(ACCESS, "at1");
            then.status(200)
                .header("content-type", "application/octet-stream")
                .body(r#"{"success": false, "errorCode": "1008"}"#);
        });

        let response = delivered(client.execute(RequestContext::get("/reports/export")).await.unwrap());

        assert!(response.envelope().is_none());
        assert!(recorder.logins().is_empty());
        assert_eq!(client.store().get().unwrap().access_token(), Some("at1"));
    }

    #[tokio::test]
    async fn transport_failures_propagate_untouched() {
        let server = MockServer::start();
        let Harness { client, recorder } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        server.mock(|when, then| {
            when.path("/slow");
            then.status(200).delay(Duration::from_secs(3));
        });

        let err = client
            .execute(RequestContext::get("/slow").with_timeout(Duration::from_millis(200)))
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Transport(TransportError::Timeout(_))));
        assert!(recorder.logins().is_empty());
        assert_eq!(client.store().get().unwrap().access_token(), Some("at1"));
    }

    #[tokio::test]
    async fn fetch_data_decodes_payload() {
        let server = MockServer::start();
        let Harness { client, .. } = harness(&server);
        client.store().import("at1", "rt1").unwrap();
        json_mock(
            &server,
            "/customers/7",
            "at1",
            json_success(serde_json::json!({ "id": 7, "name": "Acme" })),
        );

        let customer: serde_json::Value = client.get_data("/customers/7").await.unwrap();
        assert_eq!(customer["name"], "Acme");
    }
}
