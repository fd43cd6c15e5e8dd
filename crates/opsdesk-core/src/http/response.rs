use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::lenient::optional_string_or_number;
use super::{FetchError, TransportError};

/// Structured result envelope decoded at the network boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success {
        data: Option<Value>,
        message: Option<String>,
    },
    Failure {
        code: Option<String>,
        message: Option<String>,
        data: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    success: bool,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl From<RawEnvelope> for Envelope {
    fn from(raw: RawEnvelope) -> Self {
        if raw.success {
            Envelope::Success {
                data: raw.data,
                message: raw.message,
            }
        } else {
            Envelope::Failure {
                code: raw.error_code,
                message: raw.message,
                data: raw.data,
            }
        }
    }
}

impl Envelope {
    /// Decode only when the declared content type is JSON. Anything else, including
    /// malformed JSON, yields `None` and the response is treated as opaque.
    pub fn decode(content_type: Option<&str>, body: &[u8]) -> Option<Self> {
        if !content_type.is_some_and(is_json_media_type) {
            return None;
        }
        serde_json::from_slice::<RawEnvelope>(body)
            .ok()
            .map(Envelope::from)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn failure_code(&self) -> Option<&str> {
        match self {
            Envelope::Failure { code, .. } => code.as_deref(),
            Envelope::Success { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Envelope::Success { message, .. } | Envelope::Failure { message, .. } => {
                message.as_deref()
            }
        }
    }
}

fn is_json_media_type(value: &str) -> bool {
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// A fully-read HTTP response plus its decoded envelope, if any.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    envelope: Option<Envelope>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let envelope = Envelope::decode(content_type, &body);
        Self {
            status,
            headers,
            body,
            envelope,
        }
    }

    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, TransportError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self::new(status, headers, body))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Error code of a failure envelope; `None` for successes and opaque bodies.
    pub fn failure_code(&self) -> Option<&str> {
        self.envelope.as_ref().and_then(Envelope::failure_code)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Decode the `data` member of a success envelope. Opaque bodies with a
    /// success status are decoded whole.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        match self.envelope {
            Some(Envelope::Success { data, .. }) => {
                Ok(serde_json::from_value(data.unwrap_or(Value::Null))?)
            }
            Some(Envelope::Failure { code, message, .. }) => Err(FetchError::Failed {
                message: message.unwrap_or_else(|| format!("request failed with status {}", self.status)),
                code,
            }),
            None if self.status.is_success() => Ok(serde_json::from_slice(&self.body)?),
            None => Err(FetchError::Unexpected {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            }),
        }
    }
}
