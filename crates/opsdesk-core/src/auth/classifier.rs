//! Mapping from server error codes to the action the client takes.

use std::fmt;

/// What the request pipeline does about a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemediationAction {
    /// Nothing beyond returning the response.
    Silent,
    RetryAfterRefresh,
    ForceLogout,
    RedirectToLogin,
    ShowErrorToUser,
    /// Access denied; the calling screen renders its own denied state.
    StayOnPage,
}

impl RemediationAction {
    /// Whether the end user sees a notification for this action.
    pub fn notifies_user(self) -> bool {
        matches!(self, RemediationAction::ShowErrorToUser)
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            RemediationAction::Silent => "silent",
            RemediationAction::RetryAfterRefresh => "retry-after-refresh",
            RemediationAction::ForceLogout => "force-logout",
            RemediationAction::RedirectToLogin => "redirect-to-login",
            RemediationAction::ShowErrorToUser => "show-error",
            RemediationAction::StayOnPage => "stay-on-page",
        };
        write!(f, "{value}")
    }
}

pub const NOT_AUTHENTICATED: &str = "1001";
pub const FORBIDDEN: &str = "1003";
pub const ACCESS_EXPIRED: &str = "1006";
pub const REFRESH_EXPIRED: &str = "1007";
pub const ACCESS_INVALID: &str = "1008";
pub const REFRESH_INVALID: &str = "1009";
pub const INVALID_REQUEST: &str = "1010";

/// Fixed code table. Unknown codes are `Silent`.
pub fn classify(code: &str) -> RemediationAction {
    match code.trim() {
        NOT_AUTHENTICATED => RemediationAction::RedirectToLogin,
        FORBIDDEN => RemediationAction::StayOnPage,
        ACCESS_EXPIRED => RemediationAction::RetryAfterRefresh,
        REFRESH_EXPIRED | ACCESS_INVALID | REFRESH_INVALID => RemediationAction::ForceLogout,
        INVALID_REQUEST => RemediationAction::ShowErrorToUser,
        _ => RemediationAction::Silent,
    }
}

/// Table lookup plus the deployment's policy for codes outside the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    notify_unmapped: bool,
}

impl ErrorClassifier {
    pub fn new(notify_unmapped: bool) -> Self {
        Self { notify_unmapped }
    }

    pub fn is_mapped(code: &str) -> bool {
        matches!(
            code.trim(),
            NOT_AUTHENTICATED
                | FORBIDDEN
                | ACCESS_EXPIRED
                | REFRESH_EXPIRED
                | ACCESS_INVALID
                | REFRESH_INVALID
                | INVALID_REQUEST
        )
    }

    pub fn classify(&self, code: &str) -> RemediationAction {
        if self.notify_unmapped && !Self::is_mapped(code) {
            return RemediationAction::ShowErrorToUser;
        }
        classify(code)
    }
}
