//! Route declarations and the per-shell route table.
//!
//! A route is a regular expression matched against the whole path below the
//! mount point. Every route is filed under each `(method, content type)`
//! pair it accepts, and a lookup scans only the matching bucket, in
//! registration order.
//!
//! # Example
//!
//! ```rust
//! use http::Method;
//! use trellis_core::{handler_fn, Reply};
//! use trellis_router::{HandlerRef, Route, RouteTable};
//! use serde_json::json;
//!
//! let mut table = RouteTable::new();
//! let route = Route::new(r"/users/(?P<id>\d+)").methods([Method::GET]);
//! let show = handler_fn(|_env, _kwargs| async { Ok(Reply::json(json!({}))) });
//! table
//!     .insert(&route, HandlerRef::function("show_user"), std::sync::Arc::new(show))
//!     .unwrap();
//!
//! let found = table
//!     .lookup("/users/7", &Method::GET, "application/json")
//!     .unwrap();
//! assert_eq!(found.target.function, "show_user");
//! assert_eq!(found.params["id"], "7");
//! ```

use std::collections::HashMap;
use std::fmt;

use http::Method;
use regex::Regex;
use serde_json::Value;
use trellis_core::{BoxedHandler, Kwargs, TrellisError, TrellisResult};

use crate::content::DEFAULT_ROUTE_CONTENT_TYPES;
use crate::error::RouterError;

/// Wraps `pattern` in `^`/`$` anchors unless it already has them.
#[must_use]
pub fn anchor(pattern: &str) -> String {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

/// A route declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pattern: String,
    methods: Vec<Method>,
    content_types: Vec<String>,
}

impl Route {
    /// Declares a route for `pattern`.
    ///
    /// Without further calls the route accepts `GET` with the default content
    /// types (form-urlencoded, JSON, plain text and multipart).
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods: Vec::new(),
            content_types: Vec::new(),
        }
    }

    /// Sets the accepted methods.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Adds one accepted method.
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Sets the accepted request content types.
    pub fn content_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.content_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the pattern as declared.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the effective methods.
    pub fn effective_methods(&self) -> Vec<Method> {
        if self.methods.is_empty() {
            vec![Method::GET]
        } else {
            self.methods.clone()
        }
    }

    /// Returns the effective content types, lowercased.
    pub fn effective_content_types(&self) -> Vec<String> {
        if self.content_types.is_empty() {
            DEFAULT_ROUTE_CONTENT_TYPES
                .iter()
                .map(|t| (*t).to_string())
                .collect()
        } else {
            self.content_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect()
        }
    }

    fn compile(&self) -> Result<Regex, RouterError> {
        Regex::new(&anchor(&self.pattern)).map_err(|source| RouterError::InvalidPattern {
            pattern: self.pattern.clone(),
            source,
        })
    }
}

/// The bucket a route is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    method: Method,
    content_type: String,
}

impl RouteKey {
    /// Creates a key. The content type is lowercased.
    pub fn new(method: Method, content_type: &str) -> Self {
        Self {
            method,
            content_type: content_type.to_ascii_lowercase(),
        }
    }

    /// Returns the method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the content type.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// Names the function a route resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    /// The model instance owning the handler, `None` for free functions.
    pub model: Option<String>,
    /// The function name.
    pub function: String,
}

impl HandlerRef {
    /// A free function.
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            model: None,
            function: name.into(),
        }
    }

    /// A method of a model instance.
    pub fn method(model: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            function: name.into(),
        }
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{model}.{}", self.function),
            None => f.write_str(&self.function),
        }
    }
}

struct RouteEntry {
    regex: Regex,
    target: HandlerRef,
    handler: BoxedHandler,
}

/// A successful lookup.
pub struct RouteMatch<'a> {
    /// The function the route names.
    pub target: &'a HandlerRef,
    /// The handler to call.
    pub handler: &'a BoxedHandler,
    /// Named captures of the route pattern.
    pub params: Kwargs,
}

impl fmt::Debug for RouteMatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("target", &self.target)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Route table of a shell.
#[derive(Default)]
pub struct RouteTable {
    buckets: HashMap<RouteKey, Vec<RouteEntry>>,
    routes: usize,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files `route` under each method and content type it accepts.
    pub fn insert(
        &mut self,
        route: &Route,
        target: HandlerRef,
        handler: BoxedHandler,
    ) -> Result<(), RouterError> {
        let regex = route.compile()?;
        let content_types = route.effective_content_types();
        for content_type in &content_types {
            if content_type.parse::<mime::Mime>().is_err() {
                return Err(RouterError::InvalidContentType {
                    pattern: route.pattern.clone(),
                    content_type: content_type.clone(),
                });
            }
        }

        for method in route.effective_methods() {
            for content_type in &content_types {
                self.buckets
                    .entry(RouteKey::new(method.clone(), content_type))
                    .or_default()
                    .push(RouteEntry {
                        regex: regex.clone(),
                        target: target.clone(),
                        handler: handler.clone(),
                    });
            }
        }
        self.routes += 1;
        Ok(())
    }

    /// Finds the first route registered for `(method, content_type)` whose
    /// pattern matches the whole of `path`.
    pub fn lookup(
        &self,
        path: &str,
        method: &Method,
        content_type: &str,
    ) -> TrellisResult<RouteMatch<'_>> {
        let key = RouteKey::new(method.clone(), content_type);
        let entries = self.buckets.get(&key).map_or(&[][..], Vec::as_slice);

        for entry in entries {
            let Some(captures) = entry.regex.captures(path) else {
                continue;
            };
            let mut params = Kwargs::new();
            for name in entry.regex.capture_names().flatten() {
                if let Some(value) = captures.name(name) {
                    params.insert(name.to_string(), Value::String(value.as_str().to_string()));
                }
            }
            return Ok(RouteMatch {
                target: &entry.target,
                handler: &entry.handler,
                params,
            });
        }

        Err(TrellisError::not_found(format!(
            "Resource Handler not found for {method} {path} ({content_type})"
        )))
    }

    /// Number of routes inserted.
    pub fn len(&self) -> usize {
        self.routes
    }

    /// Returns true if no route was inserted.
    pub fn is_empty(&self) -> bool {
        self.routes == 0
    }

    /// Iterates over the keys that have at least one route.
    pub fn keys(&self) -> impl Iterator<Item = &RouteKey> {
        self.buckets.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_core::{handler_fn, Reply};

    fn handler(tag: &'static str) -> BoxedHandler {
        Arc::new(handler_fn(move |_env, _kwargs| async move {
            Ok(Reply::json(json!(tag)))
        }))
    }

    #[test]
    fn test_anchor() {
        assert_eq!(anchor("/a"), "^/a$");
        assert_eq!(anchor("^/a$"), "^/a$");
        assert_eq!(anchor("^/a"), "^/a$");
    }

    #[test]
    fn test_default_method_and_content_types() {
        let route = Route::new("/x");
        assert_eq!(route.effective_methods(), vec![Method::GET]);
        assert_eq!(route.effective_content_types().len(), 4);

        let mut table = RouteTable::new();
        table.insert(&route, HandlerRef::function("x"), handler("x")).unwrap();
        assert_eq!(table.keys().count(), 4);
        assert!(table
            .lookup("/x", &Method::GET, "multipart/form-data")
            .is_ok());
    }

    #[test]
    fn test_one_entry_per_method_and_content_type() {
        let route = Route::new("/x")
            .methods([Method::GET, Method::POST])
            .content_types(["application/json"]);
        let mut table = RouteTable::new();
        table.insert(&route, HandlerRef::function("x"), handler("x")).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.keys().count(), 2);
        assert!(table.lookup("/x", &Method::POST, "application/json").is_ok());
        assert!(table.lookup("/x", &Method::POST, "text/plain").is_err());
        assert!(table.lookup("/x", &Method::PUT, "application/json").is_err());
    }

    #[test]
    fn test_whole_path_must_match() {
        let mut table = RouteTable::new();
        table
            .insert(&Route::new("/users"), HandlerRef::function("list"), handler("list"))
            .unwrap();

        assert!(table.lookup("/users", &Method::GET, "text/plain").is_ok());
        let err = table
            .lookup("/users/1", &Method::GET, "text/plain")
            .unwrap_err();
        assert_eq!(err.error_code(), Some(104));
        assert!(table.lookup("/api/users", &Method::GET, "text/plain").is_err());
    }

    #[test]
    fn test_first_registered_match_wins() {
        let mut table = RouteTable::new();
        table
            .insert(&Route::new("/users/me"), HandlerRef::method("users", "me"), handler("me"))
            .unwrap();
        table
            .insert(
                &Route::new(r"/users/(?P<id>\w+)"),
                HandlerRef::method("users", "show"),
                handler("show"),
            )
            .unwrap();

        let found = table.lookup("/users/me", &Method::GET, "text/plain").unwrap();
        assert_eq!(found.target.to_string(), "users.me");
        assert!(found.params.is_empty());

        let found = table.lookup("/users/ada", &Method::GET, "text/plain").unwrap();
        assert_eq!(found.target.to_string(), "users.show");
        assert_eq!(found.params["id"], json!("ada"));
    }

    #[test]
    fn test_content_type_key_is_case_insensitive() {
        let route = Route::new("/x").content_types(["Application/JSON"]);
        let mut table = RouteTable::new();
        table.insert(&route, HandlerRef::function("x"), handler("x")).unwrap();
        assert!(table.lookup("/x", &Method::GET, "application/json").is_ok());
    }

    #[test]
    fn test_invalid_pattern() {
        let mut table = RouteTable::new();
        let err = table
            .insert(&Route::new("/x/(unclosed"), HandlerRef::function("x"), handler("x"))
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidPattern { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalid_content_type() {
        let mut table = RouteTable::new();
        let err = table
            .insert(
                &Route::new("/x").content_types(["json"]),
                HandlerRef::function("x"),
                handler("x"),
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidContentType { .. }));
    }
}
