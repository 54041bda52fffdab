//! HTTP server.
//!
//! The server is a thin edge in front of an [`Application`]: it accepts
//! HTTP/1.1 connections with Hyper, collects each request body (bounded in
//! size and time), turns the request into a [`RequestContext`], calls the
//! application held by its [`AppHandle`] and writes the resulting
//! [`ResponseContext`] back.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = trellis::loadapp("config:deploy/app.ini")?;
//!     let server = Server::new(ServerConfig::default(), app);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::Instrument;

use trellis_core::{Application, RequestContext, ResponseContext, TrellisError};
use trellis_router::into_http_response;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::reload::AppHandle;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Type alias for HTTP response body.
pub type ResponseBody = Full<Bytes>;

/// Type alias for the HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// The Trellis HTTP server.
pub struct Server {
    config: ServerConfig,
    app: AppHandle,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server for `app`.
    #[must_use]
    pub fn new(config: ServerConfig, app: Arc<dyn Application>) -> Self {
        Self::with_handle(config, AppHandle::new(app))
    }

    /// Creates a server answering from a shared, replaceable application.
    #[must_use]
    pub fn with_handle(config: ServerConfig, app: AppHandle) -> Self {
        Self { config, app }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the application handle, for reloading.
    #[must_use]
    pub fn app(&self) -> &AppHandle {
        &self.app
    }

    /// Runs until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds the configured address and runs until `shutdown` triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self.config.socket_addr().map_err(|e| {
            ServerError::Bind(format!("Invalid address '{}': {e}", self.config.http_addr()))
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("Failed to bind to {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown`
    /// triggers, then waits up to the shutdown timeout for open connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = Arc::clone(&server);
                            let connection = tracker.open();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, remote_addr, shutdown).await {
                                    tracing::debug!(remote = %remote_addr, error = %e, "connection error");
                                }
                                drop(connection);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        let timeout = server.config.shutdown_timeout();
        tracing::info!(
            timeout = ?timeout,
            connections = tracker.open_connections(),
            "waiting for open connections"
        );
        tokio::select! {
            () = tracker.idle() => tracing::info!("all connections closed"),
            () = tokio::time::sleep(timeout) => tracing::warn!(
                connections = tracker.open_connections(),
                "shutdown timeout reached with connections still open"
            ),
        }

        tracing::info!("server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let server = Arc::clone(self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle(req).await) }
        });

        let conn = http1::Builder::new()
            .keep_alive(self.config.keep_alive())
            .serve_connection(io, service);
        tokio::pin!(conn);

        let mut draining = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => return result,
                () = shutdown.recv(), if !draining => {
                    tracing::debug!(remote = %remote_addr, "closing connection for shutdown");
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }

    /// Answers one request.
    ///
    /// The body is collected up to the configured size within the request
    /// timeout; the application then has another request timeout to answer.
    pub async fn handle<B>(&self, req: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let span = tracing::debug_span!("request", method = %req.method(), path = %req.uri().path());
        async move {
            let (parts, body) = req.into_parts();
            let limited = Limited::new(body, self.config.max_body_size());
            let body = match tokio::time::timeout(self.config.request_timeout(), limited.collect()).await {
                Ok(Ok(collected)) => collected.to_bytes(),
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "request body rejected");
                    return error_response(&TrellisError::bad_request(format!(
                        "Failed to read request body: {e}"
                    )));
                }
                Err(_) => {
                    tracing::warn!("request body collection timed out");
                    return error_response(&TrellisError::bad_request("Request body timed out"));
                }
            };

            let mut ctx = RequestContext::from_parts(parts, body);
            let app = self.app.load();
            match tokio::time::timeout(self.config.request_timeout(), app.call(&mut ctx)).await {
                Ok(response) => into_http_response(response),
                Err(_) => {
                    tracing::warn!(request_id = %ctx.request_id(), "application timed out");
                    error_response(&TrellisError::internal("application timed out"))
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn error_response(err: &TrellisError) -> HttpResponse {
    into_http_response(ResponseContext::from_error(err, HeaderMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use trellis_core::{BoxFuture, Reply};

    struct Echo;

    impl Application for Echo {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext> {
            Box::pin(async move {
                let reply = Reply::json(json!({
                    "method": ctx.method().as_str(),
                    "path": ctx.path_info(),
                    "query": ctx.query_string(),
                    "body": String::from_utf8_lossy(ctx.body()),
                }));
                ResponseContext::from_reply(Some(reply), HeaderMap::new())
            })
        }
    }

    struct Slow;

    impl Application for Slow {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ResponseContext::from_reply(None, HeaderMap::new())
            })
        }
    }

    fn server(app: Arc<dyn Application>) -> Server {
        let config = ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .request_timeout(Duration::from_millis(200))
            .max_body_size(16)
            .shutdown_timeout(Duration::from_millis(100))
            .build();
        Server::new(config, app)
    }

    async fn json_body(response: HttpResponse) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(method: Method, uri: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_reaches_application() {
        let response = server(Arc::new(Echo))
            .handle(request(Method::POST, "/users?id=7", "name=ada"))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(
            json_body(response).await,
            json!({"method": "POST", "path": "/users", "query": "id=7", "body": "name=ada"})
        );
    }

    #[tokio::test]
    async fn test_oversized_body_is_bad_request() {
        let response = server(Arc::new(Echo))
            .handle(request(Method::POST, "/", "this body is longer than sixteen bytes"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["err_code"], 100);
    }

    #[tokio::test]
    async fn test_slow_application_times_out() {
        let response = server(Arc::new(Slow)).handle(request(Method::GET, "/", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await, json!({"err_msg": ""}));
    }

    #[tokio::test]
    async fn test_run_invalid_address() {
        let config = ServerConfig::builder().http_addr("not-a-valid-address").build();
        let result = Server::new(config, Arc::new(Echo))
            .run_with_shutdown(ShutdownSignal::new())
            .await;
        assert!(matches!(result, Err(ServerError::Bind(msg)) if msg.contains("Invalid address")));
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server(Arc::new(Echo)).run_with_shutdown(shutdown),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
