//! Named factories available to deployment files.
//!
//! A section such as `[filter:auth]` with `use = egg:myapp#auth` asks for
//! the filter factory called `auth`. A [`FactoryRegistry`] maps those names
//! to code. The built-in names are:
//!
//! | Name | Kind | Builds |
//! |------|------|--------|
//! | `session` | filter | [`SessionMiddleware`] |
//! | `token` | filter | [`TokenMiddleware`] |
//! | `request_id` | filter | [`RequestIdMiddleware`] (`trust_incoming = true` keeps client ids) |
//! | `access_log` | filter | [`AccessLogMiddleware`] (`slow_threshold_ms = <n>`) |
//! | `urlmap` | composite | a URL map of the section's `<path> = <app>` entries |
//! | `shell`, `service`, `platform` | app | applied by the loader to `app:`, `service:` and `platform:` sections |
//!
//! Model identifiers named by `[model:]` sections are looked up in the
//! registry's [`ModelRegistry`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use trellis_core::{Application, Settings, TrellisError, TrellisResult};
use trellis_middleware::{AccessLogMiddleware, Middleware, RequestIdMiddleware};
use trellis_router::ModelRegistry;
use trellis_session::{Connections, SessionMiddleware, TokenMiddleware};

/// Builds a filter stage from its section settings.
pub type FilterFactory =
    Arc<dyn Fn(&Settings) -> TrellisResult<Arc<dyn Middleware>> + Send + Sync>;

/// Builds an application from its section settings.
pub type AppFactory =
    Arc<dyn Fn(&Settings) -> TrellisResult<Arc<dyn Application>> + Send + Sync>;

/// Factory names handled by the assembler itself.
pub(crate) const URLMAP_FACTORY: &str = "urlmap";
pub(crate) const SHELL_FACTORY: &str = "shell";
pub(crate) const SERVICE_FACTORY: &str = "service";
pub(crate) const PLATFORM_FACTORY: &str = "platform";

/// Filter, application and model factories, plus the store connections
/// they share.
#[derive(Clone)]
pub struct FactoryRegistry {
    filters: HashMap<String, FilterFactory>,
    apps: HashMap<String, AppFactory>,
    models: ModelRegistry,
    connections: Arc<Connections>,
    provided: BTreeSet<String>,
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut filters: Vec<_> = self.filters.keys().collect();
        filters.sort();
        let mut apps: Vec<_> = self.apps.keys().collect();
        apps.sort();
        f.debug_struct("FactoryRegistry")
            .field("filters", &filters)
            .field("apps", &apps)
            .field("models", &self.models)
            .field("provided", &self.provided)
            .finish_non_exhaustive()
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FactoryRegistry {
    /// Creates a registry holding the built-in filters.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry
            .filter("session", |_| Ok(SessionMiddleware::new()))
            .filter("token", |_| Ok(TokenMiddleware::new()))
            .filter("request_id", |settings| {
                Ok(if flag(settings, "trust_incoming")? {
                    RequestIdMiddleware::trust_incoming()
                } else {
                    RequestIdMiddleware::new()
                })
            })
            .filter("access_log", |settings| {
                let stage = AccessLogMiddleware::new();
                Ok(match settings.get_str("slow_threshold_ms") {
                    Some(raw) => {
                        let millis = raw.trim().parse::<u64>().map_err(|_| {
                            TrellisError::internal(format!("slow_threshold_ms is not a number: {raw:?}"))
                        })?;
                        stage.with_slow_threshold(Duration::from_millis(millis))
                    }
                    None => stage,
                })
            });
        registry
    }

    /// Creates a registry with no factories at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
            apps: HashMap::new(),
            models: ModelRegistry::new(),
            connections: Arc::new(Connections::new()),
            provided: BTreeSet::new(),
        }
    }

    /// Registers a filter factory, replacing any of the same name.
    pub fn filter<F, M>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Settings) -> TrellisResult<M> + Send + Sync + 'static,
        M: Middleware,
    {
        self.filters.insert(
            name.into(),
            Arc::new(move |settings: &Settings| {
                factory(settings).map(|m| Arc::new(m) as Arc<dyn Middleware>)
            }),
        );
        self
    }

    /// Registers an application factory, replacing any of the same name.
    pub fn app<F, A>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Settings) -> TrellisResult<A> + Send + Sync + 'static,
        A: Application,
    {
        self.apps.insert(
            name.into(),
            Arc::new(move |settings: &Settings| {
                factory(settings).map(|a| Arc::new(a) as Arc<dyn Application>)
            }),
        );
        self
    }

    /// Declares a name that `require` entries may ask for.
    pub fn provide(&mut self, name: impl Into<String>) -> &mut Self {
        self.provided.insert(name.into());
        self
    }

    /// Uses `connections` as the shared store registry.
    #[must_use]
    pub fn with_connections(mut self, connections: Arc<Connections>) -> Self {
        self.connections = connections;
        self
    }

    /// The model registry.
    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// The model registry, for registering models.
    pub fn models_mut(&mut self) -> &mut ModelRegistry {
        &mut self.models
    }

    /// Store connections shared by everything built from this registry.
    pub fn connections(&self) -> &Arc<Connections> {
        &self.connections
    }

    /// Names declared with [`FactoryRegistry::provide`].
    pub fn provided(&self) -> impl Iterator<Item = &str> {
        self.provided.iter().map(String::as_str)
    }

    pub(crate) fn filter_factory(&self, name: &str) -> Option<&FilterFactory> {
        self.filters.get(name)
    }

    pub(crate) fn app_factory(&self, name: &str) -> Option<&AppFactory> {
        self.apps.get(name)
    }
}

fn flag(settings: &Settings, key: &str) -> TrellisResult<bool> {
    match settings.get_str(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "true" | "yes" | "on" | "1") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "no" | "off" | "0") => Ok(false),
        Some(v) => Err(TrellisError::internal(format!("{key} is not a boolean: {v:?}"))),
    }
}
