use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::RequestError;

/// Request payload. Kept by value so the call can be re-issued after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
}

/// One in-flight call: created per call, consumed by the executor, never persisted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Path relative to the configured base URL, or an absolute URL.
    pub target: String,
    pub body: Option<RequestBody>,
    pub headers: HeaderMap,
    pub skip_auth: bool,
    /// Overrides the client's default request timeout.
    pub timeout: Option<Duration>,
}

impl RequestContext {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            headers: HeaderMap::new(),
            skip_auth: false,
            timeout: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(RequestBody::Json(serde_json::to_value(body)?));
        Ok(self)
    }

    pub fn with_bytes(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = Some(RequestBody::Bytes {
            content_type: content_type.into(),
            data,
        });
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, RequestError> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RequestError::Header(name.to_owned()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| RequestError::Header(name.to_owned()))?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Send without any credential header and return the raw response unclassified.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
