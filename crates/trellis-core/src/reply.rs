//! Handler results and chain responses.

use crate::error::{TrellisError, TrellisResult};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;

/// MIME type used for downloads whose type is unknown.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// What a handler returns.
///
/// `Json` content is serialized as UTF-8 JSON with non-ASCII characters
/// preserved. `Raw` is a response wrapper: its headers are passed through and
/// its content is written verbatim, which is how binary downloads work.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Structured content, serialized to JSON.
    Json {
        /// Response status.
        status: StatusCode,
        /// Content to serialize.
        body: Value,
    },
    /// Pre-rendered content with its own headers.
    Raw {
        /// Response status.
        status: StatusCode,
        /// Headers to pass through.
        headers: HeaderMap,
        /// Body bytes.
        content: Bytes,
    },
}

impl Reply {
    /// A `200 OK` JSON reply.
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self::Json {
            status: StatusCode::OK,
            body,
        }
    }

    /// Serializes `value` into a `200 OK` JSON reply.
    pub fn to_json<T: Serialize>(value: &T) -> TrellisResult<Self> {
        Ok(Self::json(serde_json::to_value(value)?))
    }

    /// A `200 OK` reply with verbatim content and no extra headers.
    #[must_use]
    pub fn raw(content: impl Into<Bytes>) -> Self {
        Self::Raw {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            content: content.into(),
        }
    }

    /// An attachment reply for `filename`.
    ///
    /// `content_type` defaults to `application/octet-stream`.
    pub fn download(
        filename: &str,
        content_type: Option<&str>,
        content: impl Into<Bytes>,
    ) -> TrellisResult<Self> {
        let content = content.into();
        let disposition = format!("attachment;filename={filename};filename*=utf-8 {filename}");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, header_value(&disposition)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content.len()));
        headers.insert(
            CONTENT_TYPE,
            header_value(content_type.unwrap_or(OCTET_STREAM))?,
        );
        Ok(Self::Raw {
            status: StatusCode::OK,
            headers,
            content,
        })
    }

    /// Replaces the status.
    #[must_use]
    pub fn with_status(mut self, new_status: StatusCode) -> Self {
        match &mut self {
            Self::Json { status, .. } | Self::Raw { status, .. } => *status = new_status,
        }
        self
    }

    /// Adds a header, turning JSON content into a response wrapper.
    #[must_use]
    pub fn with_header(self, name: HeaderName, value: HeaderValue) -> Self {
        match self {
            Self::Json { status, body } => {
                let mut headers = HeaderMap::new();
                headers.insert(name, value);
                Self::Raw {
                    status,
                    headers,
                    content: Bytes::from(json_bytes(&body)),
                }
            }
            Self::Raw {
                status,
                mut headers,
                content,
            } => {
                headers.insert(name, value);
                Self::Raw {
                    status,
                    headers,
                    content,
                }
            }
        }
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Json { status, .. } | Self::Raw { status, .. } => *status,
        }
    }

    /// Returns true for response wrappers.
    pub fn is_wrapper(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }

    /// Returns the JSON content, if this is a JSON reply.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json { body, .. } => Some(body),
            Self::Raw { .. } => None,
        }
    }

    /// Renders the body bytes. Empty JSON content renders as `[]`.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Json { body, .. } => Bytes::from(json_bytes(body)),
            Self::Raw { content, .. } => content.clone(),
        }
    }
}

impl From<Value> for Reply {
    fn from(body: Value) -> Self {
        Self::json(body)
    }
}

fn header_value(value: &str) -> TrellisResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TrellisError::internal_with_source(format!("invalid header value {value:?}"), e))
}

fn json_bytes(body: &Value) -> Vec<u8> {
    if body.is_null() {
        return b"[]".to_vec();
    }
    serde_json::to_vec(body).unwrap_or_default()
}

/// The outcome of running a request through a chain.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// Response status.
    pub status: StatusCode,
    /// Response content.
    pub reply: Reply,
    /// Headers added by chain stages.
    pub headers: HeaderMap,
}

impl ResponseContext {
    /// Builds a response from a handler result. A missing result is empty JSON.
    #[must_use]
    pub fn from_reply(reply: Option<Reply>, headers: HeaderMap) -> Self {
        let reply = reply.unwrap_or_else(|| Reply::json(Value::Null));
        Self {
            status: reply.status(),
            reply,
            headers,
        }
    }

    /// Builds the structured error response for `err`.
    #[must_use]
    pub fn from_error(err: &TrellisError, headers: HeaderMap) -> Self {
        let status = err.status_code();
        let body = serde_json::to_value(err.to_body()).unwrap_or(Value::Null);
        Self {
            status,
            reply: Reply::Json { status, body },
            headers,
        }
    }

    /// The `404` response used when nothing is mounted for a path.
    #[must_use]
    pub fn not_found() -> Self {
        Self::from_error(&TrellisError::not_found("Not Found"), HeaderMap::new())
    }

    /// Renders the body bytes.
    pub fn body_bytes(&self) -> Bytes {
        self.reply.to_bytes()
    }
}
