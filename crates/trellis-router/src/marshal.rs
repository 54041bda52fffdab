//! Turning chain responses into HTTP responses.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::Response;
use http_body_util::Full;
use trellis_core::{Reply, ResponseContext};

/// Media type used when the request path says nothing about the response.
pub const DEFAULT_RESPONSE_TYPE: &str = "application/json";

/// Guesses a media type from the extension of the last path segment.
pub fn guess_mime(path: &str) -> Option<&'static str> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, extension) = segment.rsplit_once('.')?;

    let mime = match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" | "map" => "application/json",
        "xml" => "application/xml",
        "atom" => "application/atom+xml",
        "txt" | "text" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",

        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "gzip" => "application/gzip",
        "tar" => "application/x-tar",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",

        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

/// Sets the response `Content-Type` from the request path unless the reply
/// or a chain stage already chose one.
pub fn apply_content_type(response: &mut ResponseContext, path: &str) {
    let declared = match &response.reply {
        Reply::Raw { headers, .. } => headers.contains_key(CONTENT_TYPE),
        Reply::Json { .. } => false,
    };
    if declared || response.headers.contains_key(CONTENT_TYPE) {
        return;
    }
    let mime = guess_mime(path).unwrap_or(DEFAULT_RESPONSE_TYPE);
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(mime));
}

/// Renders a chain response.
///
/// JSON replies are serialized; response wrappers contribute their headers
/// and content verbatim. Headers added by chain stages come last.
pub fn into_http_response(response: ResponseContext) -> Response<Full<Bytes>> {
    let body = response.body_bytes();
    let mut http_response = Response::new(Full::new(body));
    *http_response.status_mut() = response.status;

    let headers = http_response.headers_mut();
    if let Reply::Raw {
        headers: wrapper, ..
    } = response.reply
    {
        for (name, value) in &wrapper {
            headers.append(name, value.clone());
        }
    }
    for (name, value) in &response.headers {
        if name == CONTENT_TYPE && headers.contains_key(CONTENT_TYPE) {
            continue;
        }
        headers.append(name, value.clone());
    }
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_RESPONSE_TYPE));
    }
    http_response
}
