//! Request body decoding.
//!
//! Bodies fall into three classes by media type:
//!
//! - **structured** (`application/x-www-form-urlencoded`, `application/json`):
//!   parsed as a JSON object whose members become keyword arguments. A form
//!   body that is not JSON is decoded as urlencoded pairs instead.
//! - **multipart** (`multipart/form-data`): text fields become keyword
//!   arguments and file parts are collected into [`UploadedFiles`].
//! - **opaque** (`text/plain` and everything else): left alone, handlers read
//!   the raw bytes from their environment.
//!
//! Structured bodies that fail to parse are ignored. A malformed multipart
//! body is a bad request.

use std::io;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;
use trellis_core::{media_type, Kwargs, TrellisError, TrellisResult, DEFAULT_CONTENT_TYPE};

/// `application/x-www-form-urlencoded`.
pub const FORM_URLENCODED: &str = DEFAULT_CONTENT_TYPE;
/// `application/json`.
pub const APPLICATION_JSON: &str = "application/json";
/// `text/plain`.
pub const TEXT_PLAIN: &str = "text/plain";
/// `multipart/form-data`.
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Content types a route accepts when it names none.
pub const DEFAULT_ROUTE_CONTENT_TYPES: [&str; 4] =
    [FORM_URLENCODED, APPLICATION_JSON, TEXT_PLAIN, MULTIPART_FORM_DATA];

/// Default cap on the number of multipart fields.
pub const DEFAULT_MAX_FIELDS: usize = 100;

/// Default cap on the size of one multipart field (10 MB).
pub const DEFAULT_MAX_FIELD_SIZE: usize = 10 * 1024 * 1024;

/// How a body of a given media type is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyClass {
    /// JSON object, or urlencoded pairs for forms.
    Structured,
    /// `multipart/form-data`.
    Multipart,
    /// Kept as raw bytes.
    Opaque,
}

impl BodyClass {
    /// Classifies a bare, lowercased media type.
    pub fn of(media_type: &str) -> Self {
        match media_type {
            FORM_URLENCODED | APPLICATION_JSON => Self::Structured,
            MULTIPART_FORM_DATA => Self::Multipart,
            _ => Self::Opaque,
        }
    }
}

/// Limits applied to multipart bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartLimits {
    /// Maximum number of fields.
    pub max_fields: usize,
    /// Maximum size of a single field in bytes.
    pub max_field_size: usize,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_fields: DEFAULT_MAX_FIELDS,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
        }
    }
}

/// A file part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// The form field name.
    pub name: String,
    /// The file name sent by the client.
    pub file_name: Option<String>,
    /// The part's declared media type.
    pub content_type: Option<String>,
    /// The file content.
    pub data: Bytes,
}

/// File parts of a multipart body, in body order.
///
/// Pushed into the request args when a multipart body carried files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedFiles(Vec<UploadedFile>);

impl UploadedFiles {
    /// Returns the first file sent under `name`.
    pub fn get(&self, name: &str) -> Option<&UploadedFile> {
        self.0.iter().find(|f| f.name == name)
    }

    /// Iterates over all files.
    pub fn iter(&self) -> impl Iterator<Item = &UploadedFile> {
        self.0.iter()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no files.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<UploadedFile> for UploadedFiles {
    fn from_iter<I: IntoIterator<Item = UploadedFile>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A decoded request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBody {
    /// Keyword arguments taken from the body.
    pub kwargs: Kwargs,
    /// File parts, for multipart bodies.
    pub files: UploadedFiles,
}

/// Decodes `body` according to the `Content-Type` header value.
pub async fn parse_body(content_type: Option<&str>, body: Bytes) -> TrellisResult<ParsedBody> {
    parse_body_with_limits(content_type, body, MultipartLimits::default()).await
}

/// Like [`parse_body`], with explicit multipart limits.
pub async fn parse_body_with_limits(
    content_type: Option<&str>,
    body: Bytes,
    limits: MultipartLimits,
) -> TrellisResult<ParsedBody> {
    let media = media_type(content_type);
    match BodyClass::of(&media) {
        BodyClass::Structured => Ok(ParsedBody {
            kwargs: parse_structured(&media, &body),
            files: UploadedFiles::default(),
        }),
        BodyClass::Multipart => {
            parse_multipart(content_type.unwrap_or(MULTIPART_FORM_DATA), body, limits).await
        }
        BodyClass::Opaque => Ok(ParsedBody::default()),
    }
}

fn parse_structured(media: &str, body: &[u8]) -> Kwargs {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Kwargs::new();
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => return map,
        Ok(other) => {
            debug!(kind = json_kind(&other), "ignoring non-object JSON body");
            return Kwargs::new();
        }
        Err(e) if media == APPLICATION_JSON => {
            debug!(error = %e, "ignoring unparsable JSON body");
            return Kwargs::new();
        }
        Err(_) => {}
    }

    match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
        Ok(pairs) => {
            let mut kwargs = Kwargs::new();
            for (key, value) in pairs {
                kwargs.entry(key).or_insert(Value::String(value));
            }
            kwargs
        }
        Err(e) => {
            debug!(error = %e, "ignoring unparsable form body");
            Kwargs::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

async fn parse_multipart(
    content_type: &str,
    body: Bytes,
    limits: MultipartLimits,
) -> TrellisResult<ParsedBody> {
    let boundary = multer::parse_boundary(content_type).map_err(|_| {
        TrellisError::bad_request("missing or invalid boundary in multipart Content-Type")
    })?;

    let stream = futures_util::stream::once(async move { Ok::<_, io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut parsed = ParsedBody::default();
    let mut files = Vec::new();
    let mut count = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TrellisError::bad_request(format!("multipart parse error: {e}")))?
    {
        count += 1;
        if count > limits.max_fields {
            return Err(TrellisError::bad_request(format!(
                "too many multipart fields (max {})",
                limits.max_fields
            )));
        }

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(ToString::to_string);
        let part_type = field.content_type().map(ToString::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| TrellisError::bad_request(format!("multipart read error: {e}")))?;

        if data.len() > limits.max_field_size {
            return Err(TrellisError::bad_request(format!(
                "multipart field '{name}' exceeds {} bytes",
                limits.max_field_size
            )));
        }

        if file_name.is_some() {
            files.push(UploadedFile {
                name,
                file_name,
                content_type: part_type,
                data,
            });
        } else {
            let text = String::from_utf8_lossy(&data).into_owned();
            parsed.kwargs.entry(name).or_insert(Value::String(text));
        }
    }

    parsed.files = files.into_iter().collect();
    Ok(parsed)
}
