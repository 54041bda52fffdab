//! Request context types.
//!
//! The [`RequestContext`] carries all per-request state through the
//! middleware chain and into the router. It is created once per request,
//! passed by `&mut` from stage to stage, and dropped when the response is
//! written. Stages hand values to later stages through [`Args`], a typed
//! map keyed by the value's type.

use crate::handler::Kwargs;
use crate::reply::Reply;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
///
/// # Example
///
/// ```
/// use trellis_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Ambient per-request values shared between chain stages and handlers.
///
/// Each value is keyed by its type. [`Args::push`] only inserts when no
/// value of that type is present yet, so the first stage to set a value
/// wins. Cloning is cheap: values are reference counted.
///
/// ```
/// use trellis_core::Args;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct SessionId(String);
///
/// let mut args = Args::new();
/// assert!(args.push(SessionId("a".into())));
/// assert!(!args.push(SessionId("b".into())));
/// assert_eq!(args.get::<SessionId>(), Some(&SessionId("a".into())));
/// assert_eq!(args.take::<SessionId>(), Some(SessionId("a".into())));
/// assert!(args.get::<SessionId>().is_none());
/// ```
#[derive(Clone, Default)]
pub struct Args {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Args {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` unless a value of the same type is present.
    ///
    /// Returns `true` if the value was inserted.
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) -> bool {
        let key = TypeId::of::<T>();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(key, Arc::new(value));
        true
    }

    /// Inserts `value`, replacing any existing value of the same type.
    pub fn replace<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Returns a reference to the value of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Removes and returns the value of type `T`.
    pub fn take<T: Any + Send + Sync + Clone>(&mut self) -> Option<T> {
        let value = self.values.remove(&TypeId::of::<T>())?;
        let value = value.downcast::<T>().ok()?;
        Some(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Returns true if a value of type `T` is present.
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no value is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args").field("len", &self.values.len()).finish()
    }
}

/// Per-request state flowing through the middleware chain.
///
/// # Example
///
/// ```
/// use trellis_core::RequestContext;
/// use http::Method;
///
/// let mut ctx = RequestContext::new(Method::GET, "/v1/users/7")
///     .with_query("verbose=1");
/// ctx.mount("/v1", true);
///
/// assert_eq!(ctx.script_name(), "/v1");
/// assert_eq!(ctx.path_info(), "/users/7");
/// assert_eq!(ctx.query_string(), Some("verbose=1"));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    method: Method,
    script_name: String,
    path_info: String,
    query_string: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    kwargs: Kwargs,
    args: Args,
    best_content_type: Option<String>,
    response_headers: HeaderMap,
    result: Option<Reply>,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for `method` on `path` with no headers or body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            script_name: String::new(),
            path_info: path.into(),
            query_string: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            kwargs: Kwargs::new(),
            args: Args::new(),
            best_content_type: None,
            response_headers: HeaderMap::new(),
            result: None,
            started_at: Instant::now(),
        }
    }

    /// Creates a context from decoded HTTP request parts and a collected body.
    #[must_use]
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let mut ctx = Self::new(parts.method, parts.uri.path());
        ctx.query_string = parts.uri.query().map(str::to_string);
        ctx.headers = parts.headers;
        ctx.body = body;
        ctx
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the raw request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    /// Returns the request ID.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Overrides the request ID.
    pub fn set_request_id(&mut self, id: RequestId) {
        self.request_id = id;
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the mount path consumed so far.
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Returns the path below the mount point.
    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    /// Returns the full request path (mount path plus path info).
    pub fn full_path(&self) -> String {
        format!("{}{}", self.script_name, self.path_info)
    }

    /// Returns the raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as text.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the raw `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    /// Returns the declared content length, or the body length when the
    /// header is absent. An unparsable header counts as zero.
    pub fn content_length(&self) -> usize {
        match self.header(CONTENT_LENGTH) {
            Some(value) => value.trim().parse().unwrap_or(0),
            None => self.body.len(),
        }
    }

    /// Returns the raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the declared portion of the body.
    pub fn declared_body(&self) -> Bytes {
        let len = self.content_length().min(self.body.len());
        self.body.slice(..len)
    }

    /// Returns the keyword arguments (query plus parsed body).
    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    /// Returns the keyword arguments mutably.
    pub fn kwargs_mut(&mut self) -> &mut Kwargs {
        &mut self.kwargs
    }

    /// Returns the ambient argument map.
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Returns the ambient argument map mutably.
    pub fn args_mut(&mut self) -> &mut Args {
        &mut self.args
    }

    /// Returns the negotiated response MIME type.
    pub fn best_content_type(&self) -> Option<&str> {
        self.best_content_type.as_deref()
    }

    /// Records the negotiated response MIME type.
    pub fn set_best_content_type(&mut self, mime: Option<String>) {
        self.best_content_type = mime;
    }

    /// Moves `app_url` from the path onto the mount path.
    ///
    /// With `strip` the prefix is removed from the path info; otherwise only
    /// the mount path grows (used when a version header picked the mount).
    pub fn mount(&mut self, app_url: &str, strip: bool) {
        self.script_name.push_str(app_url);
        if strip {
            self.path_info = self
                .path_info
                .strip_prefix(app_url)
                .unwrap_or(&self.path_info)
                .to_string();
        }
    }

    /// Headers to append to the response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Appends a header to the response.
    pub fn append_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.append(name, value);
    }

    /// Removes and returns the accumulated response headers.
    pub fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }

    /// Stores the handler result.
    pub fn set_result(&mut self, reply: Reply) {
        self.result = Some(reply);
    }

    /// Returns the handler result, if set.
    pub fn result(&self) -> Option<&Reply> {
        self.result.as_ref()
    }

    /// Removes and returns the handler result.
    pub fn take_result(&mut self) -> Option<Reply> {
        self.result.take()
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::COOKIE;

    #[derive(Debug, Clone, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_request_id_is_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_args_push_keeps_first_value() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        assert!(ctx.args_mut().push(Marker(1)));
        assert!(!ctx.args_mut().push(Marker(2)));
        assert_eq!(ctx.args().get::<Marker>(), Some(&Marker(1)));

        ctx.args_mut().replace(Marker(3));
        assert_eq!(ctx.args().get::<Marker>(), Some(&Marker(3)));
    }

    #[test]
    fn test_args_take_with_outstanding_clone() {
        let mut args = Args::new();
        args.push(Marker(9));
        let snapshot = args.clone();
        assert_eq!(args.take::<Marker>(), Some(Marker(9)));
        assert!(!args.contains::<Marker>());
        assert_eq!(snapshot.get::<Marker>(), Some(&Marker(9)));
    }

    #[test]
    fn test_from_parts() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/api/items?page=2")
            .header(COOKIE, "session_id=abc")
            .body(())
            .unwrap();
        let (parts, ()) = request.into_parts();
        let ctx = RequestContext::from_parts(parts, Bytes::from_static(b"{}"));

        assert_eq!(ctx.method(), Method::POST);
        assert_eq!(ctx.path_info(), "/api/items");
        assert_eq!(ctx.query_string(), Some("page=2"));
        assert_eq!(ctx.header(COOKIE), Some("session_id=abc"));
        assert_eq!(ctx.content_length(), 2);
    }

    #[test]
    fn test_declared_body_respects_content_length() {
        let ctx = RequestContext::new(Method::POST, "/")
            .with_header(CONTENT_LENGTH, HeaderValue::from_static("3"))
            .with_body("abcdef");
        assert_eq!(ctx.declared_body(), Bytes::from_static(b"abc"));

        let bad = RequestContext::new(Method::POST, "/")
            .with_header(CONTENT_LENGTH, HeaderValue::from_static("many"))
            .with_body("abc");
        assert!(bad.declared_body().is_empty());
    }

    #[test]
    fn test_mount_without_strip() {
        let mut ctx = RequestContext::new(Method::GET, "/users");
        ctx.mount("/v2", false);
        assert_eq!(ctx.script_name(), "/v2");
        assert_eq!(ctx.path_info(), "/users");
        assert_eq!(ctx.full_path(), "/v2/users");
    }
}
