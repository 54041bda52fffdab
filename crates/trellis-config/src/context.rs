//! Resolved configuration nodes.
//!
//! A [`Context`] describes how to build one runtime component. Contexts
//! form a tree: a pipeline holds its filters and its application, a shell
//! holds its models, a `filter-with` wrapper holds the filter and the
//! component it wraps. [`Context::create`] hands the node to a
//! [`ContextFactory`], which decides what the node turns into.

use crate::error::ConfigError;
use crate::loader::ConfigLoader;
use crate::value::ConfValue;
use indexmap::IndexMap;
use std::path::Path;
use trellis_core::Settings;

/// An ordered string map of configuration keys.
pub type Conf = IndexMap<String, String>;

/// The kind of component a section describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// `[app:]` / `[application:]`: an application built around a shell.
    App,
    /// `[filter:]`: a middleware stage.
    Filter,
    /// `[filter-app:]`: a filter bound to the application named by `next`.
    FilterApp,
    /// Synthesized by `filter-with`: a filter wrapping another component.
    FilterWith,
    /// `[pipeline:]`: filters terminating in one application.
    Pipeline,
    /// `[composite:]`: an application dispatching to other applications.
    Composite,
    /// `[shell:]` / `[sh:]`: a container of models.
    Shell,
    /// `[model:]` / `[mod:]`: a named handler container.
    Model,
    /// `[service:]`: an application bound to an entry point.
    Service,
    /// `[platform:]` / `[pf:]`: a set of services started together.
    Platform,
}

const SECTION_PREFIXES: &[(&str, ObjectType)] = &[
    ("app", ObjectType::App),
    ("application", ObjectType::App),
    ("composite", ObjectType::Composite),
    ("composit", ObjectType::Composite),
    ("platform", ObjectType::Platform),
    ("pf", ObjectType::Platform),
    ("shell", ObjectType::Shell),
    ("sh", ObjectType::Shell),
    ("model", ObjectType::Model),
    ("mod", ObjectType::Model),
    ("service", ObjectType::Service),
    ("pipeline", ObjectType::Pipeline),
    ("filter-app", ObjectType::FilterApp),
    ("filter", ObjectType::Filter),
];

impl ObjectType {
    /// Returns the canonical name of this type.
    pub const fn name(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Filter => "filter",
            Self::FilterApp => "filter-app",
            Self::FilterWith => "filter-with",
            Self::Pipeline => "pipeline",
            Self::Composite => "composite",
            Self::Shell => "shell",
            Self::Model => "model",
            Self::Service => "service",
            Self::Platform => "platform",
        }
    }

    /// Section prefixes searched when a name of this type is looked up.
    ///
    /// Application lookups accept every kind of section, so a pipeline can
    /// terminate in a composite, a shell can list models, and so on.
    pub fn lookup_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::App | Self::FilterWith => &[
                "app",
                "application",
                "composite",
                "composit",
                "platform",
                "pf",
                "shell",
                "sh",
                "filter-app",
                "model",
                "mod",
                "service",
                "pipeline",
                "filter",
            ],
            Self::Filter => &["filter"],
            Self::FilterApp => &["filter-app"],
            Self::Pipeline => &["pipeline"],
            Self::Composite => &["composite", "composit"],
            Self::Shell => &["shell", "sh"],
            Self::Model => &["model", "mod"],
            Self::Service => &["service"],
            Self::Platform => &["platform", "pf"],
        }
    }

    /// Splits a section header into its type and name.
    ///
    /// ```
    /// use trellis_config::ObjectType;
    ///
    /// assert_eq!(ObjectType::from_section("sh:main"), Some((ObjectType::Shell, "main")));
    /// assert_eq!(ObjectType::from_section("filter-app:x"), Some((ObjectType::FilterApp, "x")));
    /// assert_eq!(ObjectType::from_section("pipeline"), Some((ObjectType::Pipeline, "main")));
    /// assert_eq!(ObjectType::from_section("unknown:x"), None);
    /// ```
    pub fn from_section(section: &str) -> Option<(Self, &str)> {
        let (prefix, name) = match section.split_once(':') {
            Some((prefix, name)) => (prefix.trim(), name.trim()),
            None => (section.trim(), "main"),
        };
        SECTION_PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, ty)| (*ty, name))
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A reference to a named factory.
///
/// Parsed from `use = egg:<dist>#<name>`, `use = call:<name>` or an explicit
/// factory key such as `paste.filter_factory = <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryRef {
    /// Factory name looked up in the factory registry.
    pub name: String,
    /// Distribution named by an `egg:` reference.
    pub distribution: Option<String>,
    /// The key or scheme the reference came from.
    pub protocol: String,
}

impl FactoryRef {
    /// Parses a factory reference.
    ///
    /// ```
    /// use trellis_config::FactoryRef;
    ///
    /// let r = FactoryRef::parse("egg:trellis#urlmap", "use");
    /// assert_eq!(r.name, "urlmap");
    /// assert_eq!(r.distribution.as_deref(), Some("trellis"));
    ///
    /// assert_eq!(FactoryRef::parse("egg:trellis", "use").name, "main");
    /// assert_eq!(FactoryRef::parse("call:session", "use").name, "session");
    /// assert_eq!(FactoryRef::parse("token", "paste.filter_factory").name, "token");
    /// ```
    pub fn parse(reference: &str, protocol: &str) -> Self {
        let reference = reference.trim();
        if let Some(rest) = reference.strip_prefix("egg:") {
            let (dist, name) = match rest.split_once('#') {
                Some((dist, name)) => (dist.trim(), name.trim()),
                None => (rest.trim(), "main"),
            };
            return Self {
                name: name.to_string(),
                distribution: Some(dist.to_string()),
                protocol: protocol.to_string(),
            };
        }
        let name = reference.strip_prefix("call:").unwrap_or(reference).trim();
        Self {
            name: name.to_string(),
            distribution: None,
            protocol: protocol.to_string(),
        }
    }

    /// Creates a reference to a built-in factory.
    pub fn builtin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            distribution: None,
            protocol: "builtin".to_string(),
        }
    }
}

/// A resolved configuration node.
#[derive(Debug, Clone)]
pub struct Context {
    /// What this node builds.
    pub object_type: ObjectType,
    /// Name the node was requested under.
    pub name: String,
    /// Section header the node came from; empty for direct factory references.
    pub section: String,
    /// Process-wide values (defaults plus `set` additions).
    pub global_conf: Conf,
    /// Section-scoped values.
    pub local_conf: Conf,
    /// Factory that produces the component.
    pub factory: Option<FactoryRef>,
    /// Filters of a pipeline (application order) or the non-terminal models of a shell.
    pub filter_contexts: Vec<Context>,
    /// Terminal application of a pipeline or the last model of a shell.
    pub app_context: Option<Box<Context>>,
    /// Component wrapped by `filter-app` or `filter-with`.
    pub next_context: Option<Box<Context>>,
    /// Model identifier of a model node.
    pub model: Option<String>,
    loader: ConfigLoader,
}

impl Context {
    pub(crate) fn new(
        object_type: ObjectType,
        name: &str,
        section: &str,
        loader: ConfigLoader,
        global_conf: Conf,
        local_conf: Conf,
    ) -> Self {
        Self {
            object_type,
            name: name.to_string(),
            section: section.to_string(),
            global_conf,
            local_conf,
            factory: None,
            filter_contexts: Vec::new(),
            app_context: None,
            next_context: None,
            model: None,
            loader,
        }
    }

    /// The loader of the file this node was defined in.
    pub fn loader(&self) -> &ConfigLoader {
        &self.loader
    }

    /// Path of the file this node was defined in.
    pub fn source(&self) -> &Path {
        self.loader.path()
    }

    /// Name of the factory, if any.
    pub fn factory_name(&self) -> Option<&str> {
        self.factory.as_ref().map(|f| f.name.as_str())
    }

    /// Resolves value indirection in the local configuration.
    pub fn resolved_conf(&self) -> Result<IndexMap<String, ConfValue>, ConfigError> {
        self.loader.resolve_conf(&self.section, &self.local_conf)
    }

    /// Global values overlaid with the resolved local values.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings: Settings = self
            .global_conf
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in self.resolved_conf()? {
            settings.insert(key, value.into_setting());
        }
        Ok(settings)
    }

    /// Builds the component this node describes.
    ///
    /// Nothing is cached: every call runs the factory again.
    pub fn create<F: ContextFactory>(&self, factory: &F) -> Result<F::Output, F::Error> {
        match self.object_type {
            ObjectType::App => factory.app(self),
            ObjectType::Filter => factory.filter(self),
            ObjectType::FilterApp => factory.filter_app(self),
            ObjectType::FilterWith => factory.filter_with(self),
            ObjectType::Pipeline => factory.pipeline(self),
            ObjectType::Composite => factory.composite(self),
            ObjectType::Shell => factory.shell(self),
            ObjectType::Model => factory.model(self),
            ObjectType::Service => factory.service(self),
            ObjectType::Platform => factory.platform(self),
        }
    }
}

/// Turns contexts into components, one method per object type.
pub trait ContextFactory {
    /// What the factory produces.
    type Output;
    /// Error raised by the factory.
    type Error: From<ConfigError>;

    /// Builds an application.
    fn app(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a filter.
    fn filter(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a filter bound to its `next` application.
    fn filter_app(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a filter wrapping another component.
    fn filter_with(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a pipeline.
    fn pipeline(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a shell.
    fn shell(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a model.
    fn model(&self, ctx: &Context) -> Result<Self::Output, Self::Error>;

    /// Builds a composite. Defaults to [`ContextFactory::app`].
    fn composite(&self, ctx: &Context) -> Result<Self::Output, Self::Error> {
        self.app(ctx)
    }

    /// Builds a service. Defaults to [`ContextFactory::app`].
    fn service(&self, ctx: &Context) -> Result<Self::Output, Self::Error> {
        self.app(ctx)
    }

    /// Builds a platform. Defaults to [`ContextFactory::app`].
    fn platform(&self, ctx: &Context) -> Result<Self::Output, Self::Error> {
        self.app(ctx)
    }
}
