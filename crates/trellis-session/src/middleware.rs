//! Chain stages that attach session and token material to requests.

use std::collections::HashMap;

use http::header::{HeaderValue, COOKIE, SET_COOKIE};
use trellis_core::{BoxFuture, Kwargs, RequestContext, TrellisResult};
use trellis_middleware::Middleware;
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session_id";

/// The session id of the current request, pushed into the request args.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    /// Returns the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds a cookie value in `Cookie` headers.
pub fn cookie_value<'a>(ctx: &'a RequestContext, name: &str) -> Option<&'a str> {
    ctx.headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Gives every request a session id.
///
/// The id comes from the `session_id` cookie or is a fresh UUID v4. It is
/// sent back in a `Set-Cookie` header on every successful response. Ids are
/// never rotated.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionMiddleware;

impl SessionMiddleware {
    /// Creates the stage.
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for SessionMiddleware {
    fn name(&self) -> &str {
        "session"
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            let id = cookie_value(ctx, SESSION_COOKIE)
                .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
            ctx.args_mut().replace(SessionId(id));
            Ok(())
        })
    }

    fn on_success<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            let Some(id) = ctx.args().get::<SessionId>().cloned() else {
                return Ok(());
            };
            if let Ok(value) = HeaderValue::from_str(&format!("{SESSION_COOKIE}={id}; Path=/")) {
                ctx.append_response_header(SET_COOKIE, value);
            }
            Ok(())
        })
    }
}

/// Token material captured from the request, pushed into the request args.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenMaterial {
    /// Request headers by upper-cased name with dashes turned into
    /// underscores (`X-Auth-Token` is `X_AUTH_TOKEN`).
    pub headers: HashMap<String, String>,
    /// Keyword arguments known when the stage ran.
    pub kwargs: Kwargs,
}

impl TokenMaterial {
    /// Looks up a header by any spelling of its name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&header_key(name)).map(String::as_str)
    }
}

/// Normalizes a header name the way [`TokenMaterial`] stores it.
pub fn header_key(name: &str) -> String {
    name.trim().to_ascii_uppercase().replace('-', "_")
}

/// Captures token material for [`TokenGuard`](crate::TokenGuard)s further in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenMiddleware;

impl TokenMiddleware {
    /// Creates the stage.
    pub fn new() -> Self {
        Self
    }

    fn capture(ctx: &RequestContext) -> TokenMaterial {
        let mut headers = HashMap::new();
        for (name, value) in ctx.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(header_key(name.as_str()))
                    .or_insert_with(|| value.to_string());
            }
        }
        TokenMaterial {
            headers,
            kwargs: ctx.kwargs().clone(),
        }
    }
}

impl Middleware for TokenMiddleware {
    fn name(&self) -> &str {
        "token"
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            let material = Self::capture(ctx);
            ctx.args_mut().replace(material);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderName;
    use http::Method;
    use serde_json::json;

    fn with_cookie(cookie: &'static str) -> RequestContext {
        RequestContext::new(Method::GET, "/").with_header(COOKIE, HeaderValue::from_static(cookie))
    }

    #[test]
    fn test_cookie_value() {
        let ctx = with_cookie("theme=dark; session_id=abc123; lang=en");
        assert_eq!(cookie_value(&ctx, "session_id"), Some("abc123"));
        assert_eq!(cookie_value(&ctx, "lang"), Some("en"));
        assert_eq!(cookie_value(&ctx, "missing"), None);
        assert_eq!(cookie_value(&with_cookie("session_id="), "session_id"), None);
    }

    #[tokio::test]
    async fn test_reuses_cookie_session_id() {
        let mut ctx = with_cookie("session_id=abc123");
        let mw = SessionMiddleware::new();
        mw.process_request(&mut ctx).await.unwrap();
        mw.on_success(&mut ctx).await.unwrap();

        assert_eq!(ctx.args().get::<SessionId>().unwrap().as_str(), "abc123");
        assert_eq!(
            ctx.response_headers()[SET_COOKIE],
            "session_id=abc123; Path=/"
        );
    }

    #[tokio::test]
    async fn test_issues_new_session_id() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        let mw = SessionMiddleware::new();
        mw.process_request(&mut ctx).await.unwrap();

        let id = ctx.args().get::<SessionId>().unwrap().clone();
        assert_eq!(Uuid::parse_str(id.as_str()).unwrap().get_version_num(), 4);
    }

    #[tokio::test]
    async fn test_no_cookie_on_error() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        let mw = SessionMiddleware::new();
        mw.process_request(&mut ctx).await.unwrap();
        let _ = mw
            .on_error(&mut ctx, trellis_core::TrellisError::bad_request("x"))
            .await;
        assert!(!ctx.response_headers().contains_key(SET_COOKIE));
    }

    #[tokio::test]
    async fn test_token_material() {
        let mut ctx = RequestContext::new(Method::GET, "/").with_header(
            HeaderName::from_static("x-auth-token"),
            HeaderValue::from_static("tok"),
        );
        ctx.kwargs_mut().insert("user".into(), json!("ada"));

        TokenMiddleware::new().process_request(&mut ctx).await.unwrap();
        let material = ctx.args().get::<TokenMaterial>().unwrap();
        assert_eq!(material.header("X-Auth-Token"), Some("tok"));
        assert_eq!(material.headers.get("X_AUTH_TOKEN").map(String::as_str), Some("tok"));
        assert_eq!(material.kwargs["user"], json!("ada"));
    }
}
