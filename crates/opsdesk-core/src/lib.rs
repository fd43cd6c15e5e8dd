//! Authenticated request pipeline for the OpsDesk admin console.
//!
//! Every outgoing call goes through [`AuthenticatedClient`], which attaches the
//! stored access credential, classifies server failure codes, and refreshes the
//! credential pair at most once per call. Host applications plug in their own
//! session, notification, and navigation sinks through [`auth::AuthRuntime`].

pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;

#[cfg(test)]
mod test_support;

pub use config::{ClientConfig, ConfigError, ConfigLocator};
pub use http::{AuthenticatedClient, Outcome, RequestContext};
pub use lifecycle::{RestoreOutcome, SessionLifecycle};
