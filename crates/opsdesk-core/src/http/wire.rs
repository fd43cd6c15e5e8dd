use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;

use crate::config::ClientConfig;

use super::{ApiResponse, RequestBody, RequestContext, RequestError, TransportError};

/// Credential header attached to one outgoing request.
#[derive(Clone, Copy)]
pub(crate) struct AttachedCredential<'a> {
    pub header: &'a str,
    pub token: &'a str,
}

/// Issues requests against the configured base URL. Shared by the executor and the
/// refresh exchange so both resolve targets and apply timeouts the same way.
#[derive(Debug, Clone)]
pub(crate) struct Wire {
    http: Client,
    config: Arc<ClientConfig>,
}

impl Wire {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn send(
        &self,
        context: &RequestContext,
        credential: Option<AttachedCredential<'_>>,
    ) -> Result<ApiResponse, RequestError> {
        let url = self.config.resolve(&context.target)?;
        let mut request = self
            .http
            .request(context.method.clone(), url.clone())
            .headers(context.headers.clone())
            .timeout(context.timeout.unwrap_or_else(|| self.config.request_timeout()));

        if let Some(credential) = credential {
            let name = HeaderName::from_bytes(credential.header.as_bytes())
                .map_err(|_| RequestError::Header(credential.header.to_owned()))?;
            let value = HeaderValue::from_str(credential.token)
                .map_err(|_| RequestError::Header(credential.header.to_owned()))?;
            request = request.header(name, value);
        }

        request = match &context.body {
            Some(RequestBody::Json(body)) => request.json(body),
            Some(RequestBody::Bytes { content_type, data }) => request
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
            None => request,
        };

        debug!(method = %context.method, %url, authenticated = credential.is_some(), "sending request");
        let response = request.send().await.map_err(TransportError::from)?;
        Ok(ApiResponse::read(response).await?)
    }
}
