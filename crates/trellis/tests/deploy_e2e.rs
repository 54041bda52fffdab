//! Deployment files assembled and exercised end to end.

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde_json::{json, Value};
use trellis::prelude::*;
use trellis::config::ConfigError;
use trellis::router::ShellBuilder;
use trellis::session::TokenIssuer;
use trellis_core::BoxFuture;

type Log = Arc<Mutex<Vec<String>>>;

const CONNECTION: &str = "memory://tokens:0";

const DEPLOY: &str = "\
[DEFAULT]
greeting = hello

[composite:main]
use = egg:trellis#urlmap
/api = api
/open = open_app
/secure = secure
/wrapped = wrapped
not_found_app = lost

[pipeline:api]
pipeline = auth log main_app

[pipeline:secure]
pipeline = session token main_app

[filter:auth]
use = egg:tests#order
label = auth
require_header = x-user

[filter:log]
use = egg:tests#order
label = log

[filter:session]
use = egg:trellis#session

[filter:token]
use = egg:trellis#token

[app:main_app]
shell = users

[app:open_app]
shell = users

[app:wrapped]
shell = users
filter-with = log

[composite:lost]
use = egg:tests#lost

[shell:users]
models = greeter accounts

[model:greeter]
model = tests.Greeter

[model:accounts]
model = accounts
connection = memory://tokens:0
";

/// Logs its label and optionally insists on a header.
struct Recorder {
    label: String,
    require_header: Option<String>,
    log: Log,
}

impl Middleware for Recorder {
    fn name(&self) -> &str {
        &self.label
    }

    fn process_request<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            self.log.lock().push(self.label.clone());
            match &self.require_header {
                Some(header) if ctx.header(header.as_str()).is_none() => {
                    Err(TrellisError::authentication_failed("Authentication failed"))
                }
                _ => Ok(()),
            }
        })
    }
}

/// Answers everything nobody else mounts.
struct Lost;

impl Application for Lost {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext> {
        let path = ctx.path_info().to_string();
        Box::pin(async move {
            let reply = Reply::json(json!({ "lost": path })).with_status(StatusCode::NOT_FOUND);
            ResponseContext::from_reply(Some(reply), Default::default())
        })
    }
}

struct Greeter {
    greeting: String,
}

impl Model for Greeter {
    fn create(config: &Settings) -> TrellisResult<Self> {
        Ok(Self {
            greeting: config.require("greeting")?.to_string(),
        })
    }

    fn routes(routes: &mut ModelRoutes<Self>) {
        routes.route(Route::new("/greet"), "greet", |me: Arc<Self>, _env: Environ, _kwargs: Kwargs| async move {
            Ok(Reply::json(json!({ "msg": me.greeting })))
        });
    }
}

fn factories(log: &Log) -> FactoryRegistry {
    let mut factories = FactoryRegistry::new();

    let filter_log = Arc::clone(log);
    factories.filter("order", move |settings: &Settings| {
        Ok(Recorder {
            label: settings.get_str("label").unwrap_or("anonymous").to_string(),
            require_header: settings.get_str("require_header").map(ToString::to_string),
            log: Arc::clone(&filter_log),
        })
    });
    factories.app("lost", |_: &Settings| Ok(Lost));

    let handler_log = Arc::clone(log);
    let connections = Arc::clone(factories.connections());
    factories
        .models_mut()
        .register::<Greeter>("tests.Greeter")
        .register_fn("accounts", move |builder: &mut ShellBuilder, _name: &str, config: Settings| {
            let log = Arc::clone(&handler_log);
            builder.function(
                Route::new("/whoami"),
                "whoami",
                handler_fn(move |_env: Environ, _kwargs: Kwargs| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().push("handler".to_string());
                        Ok(Reply::json(json!({ "ok": true })))
                    }
                }),
            )?;

            let connection = config.get_str("connection").unwrap_or(CONNECTION).to_string();
            let guard = TokenGuard::new(
                TokenGuardConfig::new(["user"], TokenSource::Headers(vec!["X-Auth-Token".into()]))
                    .with_prefix("login:")
                    .with_connection(connection),
                Arc::clone(&connections),
                handler_fn(|_env: Environ, kwargs: Kwargs| async move {
                    Ok(Reply::json(json!({ "user": kwargs["user"] })))
                }),
            );
            builder.function(Route::new("/profile"), "profile", guard)?;
            Ok(())
        });
    factories
}

fn deploy(text: &str, log: &Log) -> (Arc<dyn Application>, Arc<Connections>) {
    let factories = factories(log);
    let connections = Arc::clone(factories.connections());
    let app = Deployment::parse(text, "/srv/deploy/app.ini", None, Arc::new(factories))
        .unwrap()
        .build()
        .unwrap();
    (app, connections)
}

fn build_err(text: &str, log: &Log) -> DeployError {
    Deployment::parse(text, "/srv/app.ini", None, Arc::new(factories(log)))
        .unwrap()
        .build()
        .err()
        .expect("deployment should not assemble")
}

async fn call(app: &Arc<dyn Application>, ctx: &mut RequestContext) -> (StatusCode, Value) {
    let response = app.call(ctx).await;
    let body = response.reply.as_json().cloned().unwrap_or(Value::Null);
    (response.status, body)
}

fn with_user(ctx: RequestContext) -> RequestContext {
    ctx.with_header(HeaderName::from_static("x-user"), HeaderValue::from_static("ada"))
}

#[tokio::test]
async fn test_pipeline_runs_filters_in_declared_order() {
    let log = Log::default();
    let (app, _) = deploy(DEPLOY, &log);

    let mut ctx = with_user(RequestContext::new(Method::GET, "/api/whoami"));
    let (status, body) = call(&app, &mut ctx).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
    assert_eq!(*log.lock(), vec!["auth", "log", "handler"]);
}

#[tokio::test]
async fn test_filter_failure_stops_the_request() {
    let log = Log::default();
    let (app, _) = deploy(DEPLOY, &log);

    let mut ctx = RequestContext::new(Method::GET, "/api/whoami");
    let (status, body) = call(&app, &mut ctx).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"err_msg": "Authentication failed", "err_code": 401}));
    assert_eq!(*log.lock(), vec!["auth"]);
}

#[tokio::test]
async fn test_mounts_have_separate_chains() {
    let log = Log::default();
    let (app, _) = deploy(DEPLOY, &log);

    let mut ctx = RequestContext::new(Method::GET, "/open/whoami");
    let (status, _) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*log.lock(), vec!["handler"]);

    log.lock().clear();
    let mut ctx = RequestContext::new(Method::GET, "/wrapped/whoami");
    let (status, _) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*log.lock(), vec!["log", "handler"]);
}

#[tokio::test]
async fn test_model_sees_default_settings() {
    let log = Log::default();
    let (app, _) = deploy(DEPLOY, &log);

    let mut ctx = RequestContext::new(Method::GET, "/open/greet");
    let (status, body) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"msg": "hello"}));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let log = Log::default();
    let (app, _) = deploy(DEPLOY, &log);

    let mut ctx = with_user(RequestContext::new(Method::GET, "/api/missing"));
    let (status, body) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["err_code"], 104);

    let mut ctx = RequestContext::new(Method::GET, "/elsewhere");
    let (status, body) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"lost": "/elsewhere"}));
}

#[tokio::test]
async fn test_json_post_to_unknown_route_is_not_found() {
    let log = Log::default();
    let (app, _) = deploy(DEPLOY, &log);

    let mut ctx = with_user(RequestContext::new(Method::POST, "/api/nowhere"))
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_body(r#"{"name": "ada"}"#);
    let (status, body) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["err_code"], 104);
    assert!(body["err_msg"].is_string());
    assert_eq!(*log.lock(), vec!["auth", "log"]);
}

#[tokio::test]
async fn test_no_mount_without_fallback_is_structured_404() {
    let log = Log::default();
    let text = "\
[composite:main]
use = egg:trellis#urlmap
/open = open_app

[app:open_app]
shell = users

[shell:users]
models = accounts

[model:accounts]
model = accounts
";
    let (app, _) = deploy(text, &log);

    let mut ctx = RequestContext::new(Method::GET, "/closed/whoami");
    let (status, body) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["err_code"], 104);
}

#[tokio::test]
async fn test_token_pipeline() {
    let log = Log::default();
    let (app, connections) = deploy(DEPLOY, &log);

    let store = connections.connect("token_session", CONNECTION).unwrap();
    let issuer = TokenIssuer::new(store, "login:", Duration::from_secs(3600));
    let old = issuer.issue(&["ada"], &["read"]).await.unwrap();

    let request = |token: &str| {
        RequestContext::new(Method::GET, "/secure/profile")
            .with_query("user=ada")
            .with_header(
                HeaderName::from_static("x-auth-token"),
                HeaderValue::from_str(token).unwrap(),
            )
    };

    let mut ctx = request(&old);
    let response = app.call(&mut ctx).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.reply.as_json(), Some(&json!({"user": "ada"})));
    assert!(response.headers[SET_COOKIE]
        .to_str()
        .unwrap()
        .starts_with("session_id="));

    let current = issuer.issue(&["ada"], &["read"]).await.unwrap();
    let (status, body) = call(&app, &mut request(&old)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"err_msg": "Invalid token", "err_code": 403}));

    let (status, _) = call(&app, &mut request(&current)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_platform_mounts_services() {
    let log = Log::default();
    let text = format!(
        "{DEPLOY}
[platform:edge]
start = web admin

[service:web]
entry = open_app

[service:admin]
entry = api
path = /admin
"
    );
    let factories = factories(&log);
    let app = Deployment::parse(&text, "/srv/deploy/app.ini", Some("edge"), Arc::new(factories))
        .unwrap()
        .build()
        .unwrap();

    let mut ctx = with_user(RequestContext::new(Method::GET, "/admin/whoami"));
    let (status, _) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*log.lock(), vec!["auth", "log", "handler"]);

    let mut ctx = RequestContext::new(Method::GET, "/greet");
    let (status, body) = call(&app, &mut ctx).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"msg": "hello"}));
}

#[test]
fn test_unknown_filter_factory() {
    let log = Log::default();
    let text = "\
[pipeline:main]
pipeline = missing app

[filter:missing]
use = egg:tests#nobody

[app:app]
shell = users
";
    let err = build_err(text, &log);
    assert!(
        matches!(&err, DeployError::UnknownFactory { kind: "filter", name, .. } if name == "nobody"),
        "{err}"
    );
}

#[test]
fn test_model_failure_names_the_model() {
    let log = Log::default();
    let text = "\
[app:main]
shell = users

[shell:users]
models = greeter

[model:greeter]
model = tests.Greeter
";
    let err = build_err(text, &log);
    assert!(err.to_string().contains("greeter"), "{err}");
}

#[tokio::test]
async fn test_loadapp_follows_config_references() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.ini"),
        "[composite:main]\nuse = egg:trellis#urlmap\n/api = config:api.ini#api\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("api.ini"),
        "[pipeline:api]\npipeline = request_id app\n\n[filter:request_id]\nuse = egg:trellis#request_id\n\n[app:app]\nshell = empty\n",
    )
    .unwrap();

    let uri = format!("config:{}#main", dir.path().join("main.ini").display());
    let app = trellis::loadapp(&uri).unwrap();

    let mut ctx = RequestContext::new(Method::GET, "/api/anything");
    let response = app.call(&mut ctx).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.headers.contains_key("x-request-id"));
}

#[test]
fn test_url_maps_mounting_each_other_are_rejected() {
    let log = Log::default();
    let text = "\
[composite:main]
use = egg:trellis#urlmap
/open = open_app
/more = more

[composite:more]
use = egg:trellis#urlmap
/again = main

[app:open_app]
shell = users
";
    let err = build_err(text, &log);
    assert!(
        matches!(&err, DeployError::Config(ConfigError::CycleDetected { chain }) if chain.contains("[composite:more]")),
        "{err}"
    );
}

#[test]
fn test_loadapp_missing_file() {
    let err = trellis::loadapp("config:/nonexistent/trellis/app.ini")
        .err()
        .expect("the file does not exist");
    assert!(matches!(err, DeployError::Config(_)), "{err}");
}
