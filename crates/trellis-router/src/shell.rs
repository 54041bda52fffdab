//! Virtual shells: named bundles of models and their routes.
//!
//! A [`Model`] is a handler group constructed once from its `[model:...]`
//! settings. Loading a model into a [`ShellBuilder`] instantiates it and
//! files its routes; free functions can be routed directly. The finished
//! [`Shell`] is immutable and runs one request at a time per call, handing
//! each handler the settings of the model that owns it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use http::Method;
//! use serde_json::json;
//! use trellis_core::{Environ, Kwargs, Reply, Settings, TrellisResult};
//! use trellis_router::{Model, ModelRoutes, Route, Shell};
//!
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! impl Model for Greeter {
//!     fn create(config: &Settings) -> TrellisResult<Self> {
//!         let greeting = config.get_str("greeting").unwrap_or("hello").to_string();
//!         Ok(Self { greeting })
//!     }
//!
//!     fn routes(routes: &mut ModelRoutes<Self>) {
//!         routes.route(Route::new("/greet"), "greet", |me: Arc<Self>, _env, kwargs: Kwargs| async move {
//!             Ok(Reply::json(json!({ "msg": me.greeting, "to": kwargs.get("name") })))
//!         });
//!     }
//! }
//!
//! let mut builder = Shell::builder("default");
//! builder.model::<Greeter>("greeter", Settings::new()).unwrap();
//! let shell = builder.build();
//! assert_eq!(shell.models().collect::<Vec<_>>(), vec!["greeter"]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, instrument};
use trellis_core::{
    handler_fn, BoxedHandler, Environ, Handler, HandlerResult, Kwargs, Settings, TrellisResult,
};

use crate::error::RouterError;
use crate::route::{HandlerRef, Route, RouteTable};

/// A group of handlers sharing one configured instance.
pub trait Model: Sized + Send + Sync + 'static {
    /// Builds the instance from its settings.
    fn create(config: &Settings) -> TrellisResult<Self>;

    /// Declares the model's routes.
    fn routes(routes: &mut ModelRoutes<Self>);
}

/// Route declarations collected from one model instance.
pub struct ModelRoutes<M> {
    model: Arc<M>,
    entries: Vec<(Route, String, BoxedHandler)>,
}

impl<M: Model> ModelRoutes<M> {
    fn new(model: M) -> Self {
        Self {
            model: Arc::new(model),
            entries: Vec::new(),
        }
    }

    /// Routes `route` to an async method of the model.
    pub fn route<F, Fut>(&mut self, route: Route, function: &str, func: F) -> &mut Self
    where
        F: Fn(Arc<M>, Environ, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let model = Arc::clone(&self.model);
        let func = Arc::new(func);
        let handler = handler_fn(move |env: Environ, kwargs: Kwargs| {
            let model = Arc::clone(&model);
            let func = Arc::clone(&func);
            async move { (*func)(model, env, kwargs).await }
        });
        self.entries
            .push((route, function.to_string(), Arc::new(handler)));
        self
    }

    /// Routes `route` to an already built handler, such as a wrapped one.
    pub fn route_handler(
        &mut self,
        route: Route,
        function: &str,
        handler: impl Handler,
    ) -> &mut Self {
        self.entries
            .push((route, function.to_string(), Arc::new(handler)));
        self
    }

    /// Returns the model instance.
    pub fn model(&self) -> &Arc<M> {
        &self.model
    }
}

type ModelLoader =
    Arc<dyn Fn(&mut ShellBuilder, &str, Settings) -> Result<(), RouterError> + Send + Sync>;

/// Maps model identifiers used in configuration to model types.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    loaders: HashMap<String, ModelLoader>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.loaders.keys().collect();
        ids.sort();
        f.debug_struct("ModelRegistry").field("models", &ids).finish()
    }
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers model type `M` under `id`.
    pub fn register<M: Model>(&mut self, id: impl Into<String>) -> &mut Self {
        self.loaders.insert(
            id.into(),
            Arc::new(|builder: &mut ShellBuilder, name: &str, config: Settings| {
                builder.model::<M>(name, config).map(|_| ())
            }),
        );
        self
    }

    /// Registers a loader that routes free functions, for handler groups
    /// that keep no state.
    pub fn register_fn<F>(&mut self, id: impl Into<String>, loader: F) -> &mut Self
    where
        F: Fn(&mut ShellBuilder, &str, Settings) -> Result<(), RouterError>
            + Send
            + Sync
            + 'static,
    {
        self.loaders.insert(id.into(), Arc::new(loader));
        self
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.loaders.contains_key(id)
    }

    /// Loads model `id` into `builder` as instance `name`.
    pub fn load(
        &self,
        builder: &mut ShellBuilder,
        id: &str,
        name: &str,
        config: Settings,
    ) -> Result<(), RouterError> {
        let loader = self
            .loaders
            .get(id)
            .ok_or_else(|| RouterError::UnknownModel {
                name: id.to_string(),
            })?;
        loader(builder, name, config)
    }
}

/// Builder for [`Shell`].
#[derive(Debug)]
pub struct ShellBuilder {
    name: String,
    table: RouteTable,
    configs: IndexMap<String, Arc<Settings>>,
    functions: Vec<String>,
}

impl ShellBuilder {
    /// Starts an empty shell called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: RouteTable::new(),
            configs: IndexMap::new(),
            functions: Vec::new(),
        }
    }

    /// Instantiates model `M` as `name` and files its routes.
    pub fn model<M: Model>(&mut self, name: &str, config: Settings) -> Result<&mut Self, RouterError> {
        if self.configs.contains_key(name) {
            return Err(RouterError::DuplicateModel {
                shell: self.name.clone(),
                name: name.to_string(),
            });
        }

        let instance = M::create(&config).map_err(|source| RouterError::Model {
            name: name.to_string(),
            source,
        })?;
        let mut routes = ModelRoutes::new(instance);
        M::routes(&mut routes);

        for (route, function, handler) in routes.entries {
            self.table
                .insert(&route, HandlerRef::method(name, function), handler)?;
        }
        self.configs.insert(name.to_string(), Arc::new(config));
        debug!(shell = %self.name, model = %name, "model loaded");
        Ok(self)
    }

    /// Routes `route` to a free function.
    pub fn function(
        &mut self,
        route: Route,
        function: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouterError> {
        self.table
            .insert(&route, HandlerRef::function(function), Arc::new(handler))?;
        self.functions.push(function.to_string());
        Ok(self)
    }

    /// Finishes the shell.
    pub fn build(self) -> Shell {
        Shell {
            name: self.name,
            table: self.table,
            configs: self.configs,
            functions: self.functions,
            empty: Arc::new(Settings::new()),
        }
    }
}

/// A named, immutable set of routes.
#[derive(Debug)]
pub struct Shell {
    name: String,
    table: RouteTable,
    configs: IndexMap<String, Arc<Settings>>,
    functions: Vec<String>,
    empty: Arc<Settings>,
}

impl Shell {
    /// Starts a builder.
    pub fn builder(name: impl Into<String>) -> ShellBuilder {
        ShellBuilder::new(name)
    }

    /// Returns the shell name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the loaded model instances, in load order.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Names of the routed free functions.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }

    /// Returns the route table.
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Routes the request described by `env` and calls the handler.
    ///
    /// Named captures of the matched pattern are added to `kwargs` unless the
    /// request already supplied a value under the same name.
    #[instrument(skip_all, fields(shell = %self.name, method = %env.method(), url = %env.url()))]
    pub async fn run(&self, env: Environ, mut kwargs: Kwargs) -> HandlerResult {
        let found = self
            .table
            .lookup(env.url(), env.method(), env.content_type())?;

        for (key, value) in found.params {
            kwargs.entry(key).or_insert(value);
        }

        let config = found
            .target
            .model
            .as_ref()
            .and_then(|m| self.configs.get(m))
            .map_or_else(|| Arc::clone(&self.empty), Arc::clone);

        debug!(handler = %found.target, "dispatching");
        found.handler.call(env.with_config(config), kwargs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use serde_json::json;
    use trellis_core::{Args, MethodInfo, Reply, TrellisError};

    struct Counter {
        start: i64,
    }

    impl Model for Counter {
        fn create(config: &Settings) -> TrellisResult<Self> {
            let start = config
                .get_str("start")
                .unwrap_or("0")
                .parse()
                .map_err(|_| TrellisError::bad_request("start must be a number"))?;
            Ok(Self { start })
        }

        fn routes(routes: &mut ModelRoutes<Self>) {
            routes
                .route(
                    Route::new(r"/count/(?P<step>\d+)"),
                    "count",
                    |me: Arc<Self>, env: Environ, kwargs: Kwargs| async move {
                        let step: i64 = kwargs["step"]
                            .as_str()
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                        Ok(Reply::json(json!({
                            "value": me.start + step,
                            "unit": env.config().get_str("unit"),
                        })))
                    },
                )
                .route(
                    Route::new("/reset").methods([Method::POST]),
                    "reset",
                    |_me: Arc<Self>, _env: Environ, _kwargs: Kwargs| async {
                        Ok(Reply::json(json!({"value": 0})))
                    },
                );
        }
    }

    fn env(method: Method, url: &str) -> Environ {
        Environ::new(
            MethodInfo {
                method,
                url: url.to_string(),
                content_type: "application/json".to_string(),
                file: Bytes::new(),
            },
            Args::new(),
            Arc::new(Settings::new()),
        )
    }

    fn shell() -> Shell {
        let mut builder = Shell::builder("main");
        let config: Settings = [("start", "10"), ("unit", "apples")].into_iter().collect();
        builder.model::<Counter>("counter", config).unwrap();
        builder
            .function(
                Route::new("/ping"),
                "ping",
                handler_fn(|env: Environ, _kwargs| async move {
                    Ok(Reply::json(json!({"configured": env.config().iter().count()})))
                }),
            )
            .unwrap();
        builder.build()
    }

    #[tokio::test]
    async fn test_model_handler_sees_instance_and_config() {
        let reply = shell()
            .run(env(Method::GET, "/count/5"), Kwargs::new())
            .await
            .unwrap();
        assert_eq!(reply.as_json(), Some(&json!({"value": 15, "unit": "apples"})));
    }

    #[tokio::test]
    async fn test_request_kwargs_win_over_captures() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("step".into(), json!("1"));
        let reply = shell().run(env(Method::GET, "/count/5"), kwargs).await.unwrap();
        assert_eq!(reply.as_json().unwrap()["value"], json!(11));
    }

    #[tokio::test]
    async fn test_free_function_gets_empty_config() {
        let reply = shell()
            .run(env(Method::GET, "/ping"), Kwargs::new())
            .await
            .unwrap();
        assert_eq!(reply.as_json(), Some(&json!({"configured": 0})));
    }

    #[tokio::test]
    async fn test_method_mismatch_is_not_found() {
        let err = shell()
            .run(env(Method::GET, "/reset"), Kwargs::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), Some(104));
    }

    #[test]
    fn test_model_create_failure() {
        let mut builder = Shell::builder("main");
        let config: Settings = [("start", "lots")].into_iter().collect();
        let err = builder.model::<Counter>("counter", config).unwrap_err();
        assert!(matches!(err, RouterError::Model { .. }));
    }

    #[test]
    fn test_duplicate_model_name() {
        let mut builder = Shell::builder("main");
        builder.model::<Counter>("counter", Settings::new()).unwrap();
        let err = builder.model::<Counter>("counter", Settings::new()).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateModel { .. }));
    }

    #[test]
    fn test_registry_loads_by_id() {
        let mut registry = ModelRegistry::new();
        registry.register::<Counter>("counter");
        registry.register_fn("health", |builder, name, _config| {
            builder.function(
                Route::new("/health"),
                name,
                handler_fn(|_env, _kwargs| async { Ok(Reply::json(json!("ok"))) }),
            )?;
            Ok(())
        });

        let mut builder = Shell::builder("main");
        registry
            .load(&mut builder, "counter", "c1", Settings::new())
            .unwrap();
        registry
            .load(&mut builder, "health", "health", Settings::new())
            .unwrap();
        let err = registry
            .load(&mut builder, "missing", "m", Settings::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownModel { .. }));

        let shell = builder.build();
        assert_eq!(shell.models().collect::<Vec<_>>(), vec!["c1"]);
        assert_eq!(shell.functions().collect::<Vec<_>>(), vec!["health"]);
        assert_eq!(shell.table().len(), 3);
    }
}
