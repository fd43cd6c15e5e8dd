use std::sync::{Arc, Mutex};

use httpmock::prelude::HttpMockRequest;
use httpmock::MockServer;
use serde_json::{json, Value};

use crate::auth::{
    AuthRuntime, LoginReason, MemoryStorage, NavigationSink, Notice, NotificationSink,
    SessionSink, SessionSnapshot,
};
use crate::config::ClientConfig;
use crate::http::AuthenticatedClient;

/// Header names as httpmock sees them on the wire.
pub const ACCESS: &str = "authorization-accesstoken-dev";
pub const REFRESH: &str = "authorization-refreshtoken-dev";

/// Request matcher for calls that carry no access credential header.
pub fn without_access_header(request: &HttpMockRequest) -> bool {
    request
        .headers
        .as_ref()
        .map_or(true, |headers| !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(ACCESS)))
}

/// Records everything the pipeline hands to the host application.
#[derive(Default)]
pub struct Recorder {
    snapshots: Mutex<Vec<SessionSnapshot>>,
    notices: Mutex<Vec<Notice>>,
    logins: Mutex<Vec<LoginReason>>,
    session_clears: Mutex<usize>,
}

impl Recorder {
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn logins(&self) -> Vec<LoginReason> {
        self.logins.lock().unwrap().clone()
    }

    pub fn session_clears(&self) -> usize {
        *self.session_clears.lock().unwrap()
    }
}

impl SessionSink for Recorder {
    fn publish(&self, snapshot: SessionSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    fn clear(&self) {
        *self.session_clears.lock().unwrap() += 1;
    }
}

impl NotificationSink for Recorder {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

impl NavigationSink for Recorder {
    fn to_login(&self, reason: LoginReason) {
        self.logins.lock().unwrap().push(reason);
    }
}

pub struct Harness {
    pub client: AuthenticatedClient,
    pub recorder: Arc<Recorder>,
}

pub fn harness(server: &MockServer) -> Harness {
    harness_with(server, |_| {})
}

pub fn harness_with(server: &MockServer, customize: impl FnOnce(&mut ClientConfig)) -> Harness {
    let mut config = ClientConfig::with_base_url(&server.base_url()).unwrap();
    customize(&mut config);
    let recorder = Arc::new(Recorder::default());
    let runtime = AuthRuntime::new(recorder.clone(), recorder.clone(), recorder.clone());
    let client =
        AuthenticatedClient::new(config, Arc::new(MemoryStorage::default()), runtime).unwrap();
    Harness { client, recorder }
}

pub fn json_success(data: Value) -> String {
    json!({ "success": true, "data": data }).to_string()
}

pub fn json_failure(code: &str, message: &str) -> String {
    json!({ "success": false, "errorCode": code, "message": message }).to_string()
}
