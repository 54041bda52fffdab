//! Turning resolved configuration into a running application.
//!
//! The [`Assembler`] is the [`ContextFactory`] for deployment files. Walking
//! the context tree it:
//!
//! - builds shells from `[shell:]` and `[model:]` sections,
//! - registers a [`UrlMiddleware`] for every `app:` section under the mount
//!   path it is reached through,
//! - registers each filter of a pipeline after the stage it wraps, so the
//!   first filter named in `pipeline = ...` is the first to see a request,
//! - records the mounts of `urlmap` composites and platforms.
//!
//! Once the walk is done the chain registrations are frozen and the recorded
//! mounts become [`UrlMap`]s of [`ChainApp`]s.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use trellis_config::{ConfigError, Context, ContextFactory, ObjectType};
use trellis_core::{
    Application, BoxFuture, RequestContext, Settings, TrellisError, TrellisResult,
};
use trellis_middleware::{mount_key, ChainApp, ChainRegistry, ChainRegistryBuilder, Middleware};
use trellis_router::{MountPath, Shell, ShellBuilder, UrlMap, UrlMiddleware};
use trellis_telemetry::{init_logging, LogConfig};

use crate::error::DeployError;
use crate::registry::{
    FactoryRegistry, PLATFORM_FACTORY, SERVICE_FACTORY, SHELL_FACTORY, URLMAP_FACTORY,
};

/// Builds the application described by `ctx`.
pub fn assemble(ctx: &Context, factories: &FactoryRegistry) -> Result<Arc<dyn Application>, DeployError> {
    let assembler = Assembler::new(factories);
    let root = assembler.create_at("/".to_string(), ctx)?;
    let registry = Arc::new(assembler.finish());
    debug!(mounts = ?registry.mounts().collect::<Vec<_>>(), "assembly finished");
    realize(root, &registry, &ctx.section)
}

/// What one context node turned into.
pub(crate) enum Component {
    /// The chain registered under a mount key, ending in an application.
    Chain(String),
    /// Applications to mount under URL prefixes.
    Map(MapPlan),
    /// A filter stage, not yet registered.
    Stage(Arc<dyn Middleware>),
    /// A finished shell.
    Shell(Arc<Shell>),
    /// A model loaded into the shell being built.
    Model,
    /// An application from a registered factory.
    App(Arc<dyn Application>),
}

impl Component {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Chain(_) => "chain",
            Self::Map(_) => "url map",
            Self::Stage(_) => "filter",
            Self::Shell(_) => "shell",
            Self::Model => "model",
            Self::App(_) => "application",
        }
    }
}

pub(crate) struct MapPlan {
    mounts: Vec<(String, Component)>,
    not_found: Option<Box<Component>>,
}

#[derive(Default)]
struct State {
    chains: ChainRegistryBuilder,
    mounts: Vec<String>,
    /// Sections being assembled, outermost first.
    nodes: Vec<String>,
    shells: HashMap<String, Arc<Shell>>,
    building: Option<ShellBuilder>,
}

/// The [`ContextFactory`] that assembles deployments.
pub(crate) struct Assembler<'a> {
    factories: &'a FactoryRegistry,
    state: RefCell<State>,
}

impl<'a> Assembler<'a> {
    pub(crate) fn new(factories: &'a FactoryRegistry) -> Self {
        Self {
            factories,
            state: RefCell::new(State::default()),
        }
    }

    pub(crate) fn finish(self) -> ChainRegistry {
        self.state.into_inner().chains.build()
    }

    fn current_mount(&self) -> String {
        self.state
            .borrow()
            .mounts
            .last()
            .cloned()
            .unwrap_or_else(|| "/".to_string())
    }

    /// Creates `ctx` with `key` as the current mount.
    ///
    /// URL maps, services and platforms reach their applications through
    /// here, so a section that ends up mounting itself fails with
    /// [`ConfigError::CycleDetected`].
    fn create_at(&self, key: String, ctx: &Context) -> Result<Component, DeployError> {
        let node = format!("{}[{}]", ctx.source().display(), ctx.section);
        {
            let mut state = self.state.borrow_mut();
            if state.nodes.contains(&node) {
                let mut chain = state.nodes.clone();
                chain.push(node);
                return Err(ConfigError::CycleDetected {
                    chain: chain.join(" -> "),
                }
                .into());
            }
            state.nodes.push(node);
            state.mounts.push(key);
        }
        let created = ctx.create(self);
        let mut state = self.state.borrow_mut();
        state.mounts.pop();
        state.nodes.pop();
        created
    }

    fn register(&self, mount: &str, ctx: &Context, middleware: Arc<dyn Middleware>, shell: Option<String>) {
        self.state.borrow_mut().chains.register(
            mount,
            ctx.name.clone(),
            middleware,
            ctx.global_conf.clone(),
            ctx.local_conf.clone(),
            shell,
        );
    }

    fn settings(ctx: &Context) -> Result<Settings, DeployError> {
        Ok(ctx.settings()?)
    }

    fn factory_name<'c>(ctx: &'c Context) -> Result<&'c str, DeployError> {
        ctx.factory_name().ok_or_else(|| {
            ConfigError::NoFactory {
                section: ctx.section.clone(),
            }
            .into()
        })
    }

    /// Builds the stage of a filter context.
    fn stage(&self, ctx: &Context) -> Result<Arc<dyn Middleware>, DeployError> {
        match ctx.create(self)? {
            Component::Stage(stage) => Ok(stage),
            other => Err(DeployError::assembly(
                &ctx.section,
                format!("expected a filter, found a {}", other.kind()),
            )),
        }
    }

    /// Builds the component a filter wraps, registering it first under the
    /// current mount.
    fn terminal(&self, owner: &Context, next: &Context) -> Result<String, DeployError> {
        let mount = self.current_mount();
        match next.create(self)? {
            Component::Chain(key) if key == mount => Ok(key),
            Component::App(app) => {
                self.register(&mount, next, Arc::new(ApplicationStage { app }), None);
                Ok(mount)
            }
            other => Err(DeployError::assembly(
                &owner.section,
                format!("'{}' is a {} and cannot be wrapped by filters", next.name, other.kind()),
            )),
        }
    }

    fn custom_app(&self, ctx: &Context, name: &str) -> Result<Component, DeployError> {
        let factory = self
            .factories
            .app_factory(name)
            .ok_or_else(|| DeployError::UnknownFactory {
                kind: "app",
                name: name.to_string(),
                section: ctx.section.clone(),
            })?;
        let app = factory(&Self::settings(ctx)?).map_err(|source| DeployError::Factory {
            name: name.to_string(),
            section: ctx.section.clone(),
            source,
        })?;
        Ok(Component::App(app))
    }

    fn shell_named(&self, owner: &Context, name: &str) -> Result<Arc<Shell>, DeployError> {
        if let Some(shell) = self.state.borrow().shells.get(name) {
            return Ok(Arc::clone(shell));
        }
        let shell = match owner
            .loader()
            .get_context(ObjectType::Shell, Some(name), Some(&owner.global_conf))
        {
            Ok(ctx) => match ctx.create(self)? {
                Component::Shell(shell) => shell,
                other => {
                    return Err(DeployError::assembly(
                        &owner.section,
                        format!("shell '{name}' built a {}", other.kind()),
                    ))
                }
            },
            Err(ConfigError::SectionNotFound { .. }) => {
                info!(shell = name, section = %owner.section, "no shell section, serving an empty shell");
                Arc::new(Shell::builder(name).build())
            }
            Err(e) => return Err(e.into()),
        };
        self.state
            .borrow_mut()
            .shells
            .insert(name.to_string(), Arc::clone(&shell));
        Ok(shell)
    }

    fn url_map(&self, ctx: &Context) -> Result<Component, DeployError> {
        let parent = self.current_mount();
        let mut mounts = Vec::new();
        for (expr, app_name) in &ctx.local_conf {
            if expr == "not_found_app" {
                continue;
            }
            let path: MountPath = expr.parse()?;
            let child = ctx
                .loader()
                .get_context(ObjectType::App, Some(app_name), Some(&ctx.global_conf))?;
            let component = self.create_at(child_mount(&parent, &path), &child)?;
            mounts.push((expr.clone(), component));
        }

        let not_found = match ctx
            .local_conf
            .get("not_found_app")
            .or_else(|| ctx.global_conf.get("not_found_app"))
        {
            Some(name) => {
                let child = ctx
                    .loader()
                    .get_context(ObjectType::App, Some(name), Some(&ctx.global_conf))?;
                let key = mount_key(&format!("{}/!not_found", parent.trim_end_matches('/')));
                Some(Box::new(self.create_at(key, &child)?))
            }
            None => None,
        };

        Ok(Component::Map(MapPlan { mounts, not_found }))
    }
}

impl ContextFactory for Assembler<'_> {
    type Output = Component;
    type Error = DeployError;

    fn app(&self, ctx: &Context) -> Result<Component, DeployError> {
        let factory = Self::factory_name(ctx)?;
        if factory != SHELL_FACTORY {
            return self.custom_app(ctx, factory);
        }
        let shell_name = ctx
            .local_conf
            .get("shell")
            .ok_or_else(|| ConfigError::missing_key(&ctx.section, "shell"))?;
        let shell = self.shell_named(ctx, shell_name)?;
        let mount = self.current_mount();
        self.register(
            &mount,
            ctx,
            Arc::new(UrlMiddleware::new(shell)),
            Some(shell_name.clone()),
        );
        Ok(Component::Chain(mount))
    }

    fn filter(&self, ctx: &Context) -> Result<Component, DeployError> {
        let name = Self::factory_name(ctx)?;
        let factory = self
            .factories
            .filter_factory(name)
            .ok_or_else(|| DeployError::UnknownFactory {
                kind: "filter",
                name: name.to_string(),
                section: ctx.section.clone(),
            })?;
        if let Some(dist) = ctx.factory.as_ref().and_then(|f| f.distribution.as_deref()) {
            debug!(factory = name, distribution = dist, "filter factory from distribution");
        }
        let stage = factory(&Self::settings(ctx)?).map_err(|source| DeployError::Factory {
            name: name.to_string(),
            section: ctx.section.clone(),
            source,
        })?;
        Ok(Component::Stage(stage))
    }

    fn filter_app(&self, ctx: &Context) -> Result<Component, DeployError> {
        let next = ctx
            .next_context
            .as_deref()
            .ok_or_else(|| ConfigError::missing_key(&ctx.section, "next"))?;
        let mount = self.terminal(ctx, next)?;
        let stage = self.filter(ctx).and_then(|c| match c {
            Component::Stage(stage) => Ok(stage),
            other => Err(DeployError::assembly(&ctx.section, format!("built a {}", other.kind()))),
        })?;
        self.register(&mount, ctx, stage, None);
        Ok(Component::Chain(mount))
    }

    fn filter_with(&self, ctx: &Context) -> Result<Component, DeployError> {
        let next = ctx
            .next_context
            .as_deref()
            .ok_or_else(|| DeployError::assembly(&ctx.section, "filter-with wraps nothing"))?;
        let mount = self.terminal(ctx, next)?;
        for filter in &ctx.filter_contexts {
            let stage = self.stage(filter)?;
            self.register(&mount, filter, stage, None);
        }
        Ok(Component::Chain(mount))
    }

    fn pipeline(&self, ctx: &Context) -> Result<Component, DeployError> {
        let app = ctx
            .app_context
            .as_deref()
            .ok_or_else(|| ConfigError::missing_key(&ctx.section, "pipeline"))?;
        let mount = self.terminal(ctx, app)?;
        // Innermost filter first; the chain runs them back to front.
        for filter in &ctx.filter_contexts {
            let stage = self.stage(filter)?;
            self.register(&mount, filter, stage, None);
        }
        Ok(Component::Chain(mount))
    }

    fn shell(&self, ctx: &Context) -> Result<Component, DeployError> {
        let previous = self
            .state
            .borrow_mut()
            .building
            .replace(ShellBuilder::new(ctx.name.clone()));
        let models = ctx.filter_contexts.iter().chain(ctx.app_context.as_deref());
        for model in models {
            if model.object_type != ObjectType::Model {
                return Err(DeployError::assembly(
                    &ctx.section,
                    format!("'{}' is a {}, not a model", model.name, model.object_type),
                ));
            }
            model.create(self)?;
        }
        let builder = std::mem::replace(&mut self.state.borrow_mut().building, previous)
            .ok_or_else(|| DeployError::assembly(&ctx.section, "shell builder went missing"))?;
        let shell = builder.build();
        debug!(shell = %shell.name(), models = ?shell.models().collect::<Vec<_>>(), "shell built");
        Ok(Component::Shell(Arc::new(shell)))
    }

    fn model(&self, ctx: &Context) -> Result<Component, DeployError> {
        let id = ctx
            .model
            .as_deref()
            .ok_or_else(|| ConfigError::missing_key(&ctx.section, "model"))?;
        let settings = Self::settings(ctx)?;
        let mut state = self.state.borrow_mut();
        let builder = state
            .building
            .as_mut()
            .ok_or_else(|| DeployError::assembly(&ctx.section, "a model can only be loaded by a shell"))?;
        self.factories.models().load(builder, id, &ctx.name, settings)?;
        Ok(Component::Model)
    }

    fn composite(&self, ctx: &Context) -> Result<Component, DeployError> {
        match Self::factory_name(ctx)? {
            URLMAP_FACTORY => self.url_map(ctx),
            other => self.custom_app(ctx, other),
        }
    }

    fn service(&self, ctx: &Context) -> Result<Component, DeployError> {
        let factory = Self::factory_name(ctx)?;
        if factory != SERVICE_FACTORY {
            return self.custom_app(ctx, factory);
        }
        let entry = ctx
            .local_conf
            .get("entry")
            .ok_or_else(|| ConfigError::missing_key(&ctx.section, "entry"))?;
        let app = ctx
            .loader()
            .get_context(ObjectType::App, Some(entry), Some(&ctx.global_conf))?;
        self.create_at(self.current_mount(), &app)
    }

    fn platform(&self, ctx: &Context) -> Result<Component, DeployError> {
        let factory = Self::factory_name(ctx)?;
        if factory != PLATFORM_FACTORY {
            return self.custom_app(ctx, factory);
        }

        let log_config = LogConfig::from_settings(&Self::settings(ctx)?)?;
        if let Err(e) = init_logging(&log_config) {
            debug!(error = %e, "logging already configured, keeping it");
        }

        let start = ctx
            .local_conf
            .get("start")
            .ok_or_else(|| ConfigError::missing_key(&ctx.section, "start"))?;
        let parent = self.current_mount();
        let mut mounts = Vec::new();
        for name in start.split_whitespace() {
            let service = ctx
                .loader()
                .get_context(ObjectType::Service, Some(name), Some(&ctx.global_conf))?;
            let expr = service
                .local_conf
                .get("path")
                .cloned()
                .unwrap_or_else(|| "/".to_string());
            let path: MountPath = expr.parse()?;
            info!(platform = %ctx.name, service = name, path = %path, "starting service");
            let component = self.create_at(child_mount(&parent, &path), &service)?;
            mounts.push((expr, component));
        }
        Ok(Component::Map(MapPlan {
            mounts,
            not_found: None,
        }))
    }
}

/// The chain key of `path` mounted below `parent`.
fn child_mount(parent: &str, path: &MountPath) -> String {
    let mut key = parent.trim_end_matches('/').to_string();
    if let Some(domain) = path.domain() {
        key.push_str("/@");
        key.push_str(domain);
    }
    key.push_str(path.url());
    mount_key(&key)
}

fn realize(
    component: Component,
    registry: &Arc<ChainRegistry>,
    section: &str,
) -> Result<Arc<dyn Application>, DeployError> {
    match component {
        Component::Chain(key) => Ok(Arc::new(ChainApp::new(Arc::clone(registry), &key))),
        Component::App(app) => Ok(app),
        Component::Map(plan) => {
            let mut map = UrlMap::new();
            for (expr, child) in plan.mounts {
                map.mount(&expr, realize(child, registry, section)?)?;
            }
            if let Some(not_found) = plan.not_found {
                map = map.with_not_found(realize(*not_found, registry, section)?);
            }
            Ok(Arc::new(map))
        }
        other => Err(DeployError::assembly(
            section,
            format!("a {} cannot serve requests", other.kind()),
        )),
    }
}

/// Runs an application from a factory as the last stage of a chain.
struct ApplicationStage {
    app: Arc<dyn Application>,
}

impl Middleware for ApplicationStage {
    fn name(&self) -> &str {
        "application"
    }

    fn process_request<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, TrellisResult<()>> {
        Box::pin(async move {
            let response = self.app.call(ctx).await;
            for (name, value) in &response.headers {
                ctx.append_response_header(name.clone(), value.clone());
            }
            if response.status.is_server_error() {
                return Err(TrellisError::internal(format!(
                    "application answered {}",
                    response.status
                )));
            }
            ctx.set_result(response.reply);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_config::ConfigLoader;

    fn context(text: &str, name: &str) -> Context {
        ConfigLoader::parse(text, "/srv/app.ini")
            .unwrap()
            .get_context(ObjectType::App, Some(name), None)
            .unwrap()
    }

    fn registrations(text: &str, name: &str) -> Vec<(String, Vec<String>)> {
        let factories = FactoryRegistry::new();
        let assembler = Assembler::new(&factories);
        context(text, name).create(&assembler).unwrap();
        let registry = assembler.finish();
        let mut mounts: Vec<_> = registry.mounts().map(ToString::to_string).collect();
        mounts.sort();
        mounts
            .into_iter()
            .map(|m| {
                let names = registry
                    .chain(&m)
                    .unwrap()
                    .iter()
                    .map(|r| r.name.clone())
                    .collect();
                (m, names)
            })
            .collect()
    }

    const DEPLOY: &str = "\
[composite:main]
use = egg:trellis#urlmap
/ = root
/api = api
domain example.com /api = api

[pipeline:api]
pipeline = session token request_id api_app

[app:api_app]
shell = users

[app:root]
shell = users

[filter:session]
use = egg:trellis#session

[filter:token]
use = egg:trellis#token

[filter:request_id]
use = egg:trellis#request_id
";

    #[test]
    fn test_pipeline_registers_app_then_filters_inside_out() {
        let regs = registrations(DEPLOY, "api");
        assert_eq!(
            regs,
            vec![(
                "/".to_string(),
                vec!["api_app".into(), "request_id".into(), "token".into(), "session".into()]
            )]
        );
    }

    #[test]
    fn test_url_map_gives_each_mount_its_chain() {
        let regs = registrations(DEPLOY, "main");
        let mounts: Vec<_> = regs.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(mounts, vec!["/", "/@example.com/api", "/api"]);
        assert_eq!(regs[0].1, vec!["root"]);
        assert_eq!(regs[1].1, regs[2].1);
    }

    #[test]
    fn test_child_mount_keys() {
        let root: MountPath = "/".parse().unwrap();
        let api: MountPath = "/api".parse().unwrap();
        let domain: MountPath = "domain example.com /v1".parse().unwrap();
        assert_eq!(child_mount("/", &root), "/");
        assert_eq!(child_mount("/", &api), "/api");
        assert_eq!(child_mount("/api", &api), "/api/api");
        assert_eq!(child_mount("/", &domain), "/@example.com/v1");
    }

    #[test]
    fn test_pipeline_cannot_end_in_url_map() {
        let text = "\
[pipeline:main]
pipeline = session inner

[composite:inner]
use = egg:trellis#urlmap
/ = app

[app:app]
shell = s

[filter:session]
use = egg:trellis#session
";
        let factories = FactoryRegistry::new();
        let err = assemble(&context(text, "main"), &factories)
            .err()
            .expect("a pipeline cannot wrap a url map");
        assert!(matches!(err, DeployError::Assembly { .. }), "{err}");
    }

    #[test]
    fn test_model_outside_shell_is_rejected() {
        let text = "[model:users]\nmodel = users\n";
        let factories = FactoryRegistry::new();
        let err = assemble(&context(text, "users"), &factories)
            .err()
            .expect("a bare model cannot be assembled");
        assert!(err.to_string().contains("only be loaded by a shell"), "{err}");
    }

    fn cycle_chain(text: &str, name: &str) -> String {
        let factories = FactoryRegistry::new();
        match assemble(&context(text, name), &factories) {
            Err(DeployError::Config(ConfigError::CycleDetected { chain })) => chain,
            Err(other) => panic!("expected a cycle, got {other}"),
            Ok(_) => panic!("expected a cycle"),
        }
    }

    #[test]
    fn test_url_map_mounting_itself_is_a_cycle() {
        let text = "[composite:main]\nuse = egg:trellis#urlmap\n/ = main\n";
        let chain = cycle_chain(text, "main");
        assert_eq!(chain, "/srv/app.ini[composite:main] -> /srv/app.ini[composite:main]");
    }

    #[test]
    fn test_url_maps_mounting_each_other_is_a_cycle() {
        let text = "\
[composite:main]
use = egg:trellis#urlmap
/o = other

[composite:other]
use = egg:trellis#urlmap
/x = main
";
        let chain = cycle_chain(text, "main");
        assert!(chain.contains("[composite:other]"), "{chain}");
        assert!(chain.ends_with("[composite:main]"), "{chain}");
    }

    #[test]
    fn test_not_found_app_pointing_back_is_a_cycle() {
        let text = "\
[composite:main]
use = egg:trellis#urlmap
/api = api
not_found_app = main

[app:api]
shell = users
";
        cycle_chain(text, "main");
    }

    #[test]
    fn test_platform_service_mounting_the_platform_is_a_cycle() {
        let text = "\
[platform:main]
start = web

[service:web]
entry = main
";
        let chain = cycle_chain(text, "main");
        assert!(chain.contains("[service:web]"), "{chain}");
    }

    #[test]
    fn test_same_app_mounted_twice_is_not_a_cycle() {
        let regs = registrations(
            "[composite:main]\nuse = egg:trellis#urlmap\n/a = app\n/b = app\n\n[app:app]\nshell = s\n",
            "main",
        );
        let mounts: Vec<_> = regs.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(mounts, vec!["/a", "/b"]);
    }
}
