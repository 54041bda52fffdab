//! Section resolution.
//!
//! [`ConfigLoader`] owns one parsed file and turns its sections into
//! [`Context`] trees. Each section type has its own rules:
//!
//! | Section | Required key | Result |
//! |---|---|---|
//! | `app:` | `shell` | application around the named shell (built-in `shell` factory) |
//! | `pipeline:` | `pipeline` | filters in reverse declaration order plus the final application |
//! | `shell:` | `models` | last model as `app_context`, the rest as `filter_contexts` |
//! | `model:` | `model` | minimal node carrying the last token as its model |
//! | `service:` | `entry` | service around an entry application (built-in `service` factory) |
//! | `platform:` | `start` | set of services (built-in `platform` factory) |
//! | `filter-app:` | `next` | filter bound to the `next` application |
//! | `composite:`, `filter:` | `use` or a factory key | whatever the factory builds |
//!
//! Every section also understands `set X` / `get X` indirection,
//! `require`, `use` and, for applications and filters, `filter-with`.
//! Resolution keeps a stack of the sections being resolved so that a
//! section which (directly or through other files) refers back to itself
//! fails with [`ConfigError::CycleDetected`] instead of recursing forever.

use crate::context::{Conf, Context, FactoryRef, ObjectType};
use crate::error::ConfigError;
use crate::ini::IniDocument;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Maximum nesting of section and value references.
pub const MAX_RESOLVE_DEPTH: usize = 32;

/// Stack of the nodes currently being resolved.
#[derive(Debug, Default)]
pub(crate) struct ResolveGuard {
    stack: Vec<String>,
}

impl ResolveGuard {
    pub(crate) fn scoped<T>(
        &mut self,
        key: String,
        f: impl FnOnce(&mut Self) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        if self.stack.contains(&key) {
            let mut chain = self.stack.clone();
            chain.push(key);
            return Err(ConfigError::CycleDetected {
                chain: chain.join(" -> "),
            });
        }
        if self.stack.len() >= MAX_RESOLVE_DEPTH {
            return Err(ConfigError::DepthExceeded {
                depth: MAX_RESOLVE_DEPTH,
            });
        }
        self.stack.push(key);
        let result = f(self);
        self.stack.pop();
        result
    }
}

#[derive(Debug, Clone)]
struct LoaderInner {
    path: PathBuf,
    document: IniDocument,
    provided: BTreeSet<String>,
}

/// Loads one configuration file and resolves its sections.
///
/// Cloning is cheap; clones share the parsed document.
///
/// # Example
///
/// ```
/// use trellis_config::{ConfigLoader, ObjectType};
///
/// let loader = ConfigLoader::parse(
///     "[pipeline:main]\npipeline = auth log api\n\n\
///      [filter:auth]\nuse = egg:trellis#token\n\n\
///      [filter:log]\nuse = egg:trellis#access_log\n\n\
///      [app:api]\nshell = main\n",
///     "/srv/app.ini",
/// )
/// .unwrap();
///
/// let ctx = loader.get_context(ObjectType::App, Some("main"), None).unwrap();
/// assert_eq!(ctx.object_type, ObjectType::Pipeline);
/// let filters: Vec<_> = ctx.filter_contexts.iter().map(|c| c.name.as_str()).collect();
/// assert_eq!(filters, vec!["log", "auth"]);
/// assert_eq!(ctx.app_context.unwrap().name, "api");
/// ```
#[derive(Clone)]
pub struct ConfigLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl ConfigLoader {
    /// Loads and parses a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self::parse(&text, path)
    }

    /// Parses text as if it had been read from `path`.
    ///
    /// `here` and `__file__` defaults are derived from `path` unless the
    /// document sets them itself.
    pub fn parse(text: &str, path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut document = IniDocument::parse(text)?;
        let here = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        document.set_default("here", here, false);
        document.set_default("__file__", path.display().to_string(), false);
        Ok(Self {
            inner: Arc::new(LoaderInner {
                path,
                document,
                provided: BTreeSet::new(),
            }),
        })
    }

    /// Declares requirement names that `require` entries may name.
    #[must_use]
    pub fn with_provided<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = Arc::make_mut(&mut self.inner);
        inner.provided.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds defaults without overriding the document's own.
    #[must_use]
    pub fn with_defaults(mut self, conf: &Conf) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        for (k, v) in conf {
            inner.document.set_default(k.clone(), v.clone(), false);
        }
        self
    }

    /// Path of the loaded file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Directory of the loaded file.
    pub fn here(&self) -> &Path {
        self.inner.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// The parsed document.
    pub fn document(&self) -> &IniDocument {
        &self.inner.document
    }

    /// Requirement names this loader satisfies.
    pub fn provided(&self) -> impl Iterator<Item = &str> {
        self.inner.provided.iter().map(String::as_str)
    }

    /// The `[DEFAULT]` values with interpolation applied.
    pub fn global_conf(&self) -> Result<Conf, ConfigError> {
        self.inner.document.interpolated_defaults()
    }

    /// Loads another file relative to this one.
    ///
    /// The new loader inherits the provided requirements and takes
    /// `global_conf` as defaults where its own document is silent.
    pub fn sibling(&self, relative: &str, global_conf: Option<&Conf>) -> Result<Self, ConfigError> {
        let relative = relative.trim().replace('\\', "/");
        let candidate = Path::new(&relative);
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.here().join(candidate)
        };
        let mut loader = Self::from_file(&path)?.with_provided(self.inner.provided.iter().cloned());
        if let Some(conf) = global_conf {
            loader = loader.with_defaults(conf);
        }
        Ok(loader)
    }

    /// Resolves the section called exactly `section` (for example `pipeline:main`).
    pub fn resolve(&self, section: &str, object_type: ObjectType) -> Result<Context, ConfigError> {
        let (_, name) = ObjectType::from_section(section).ok_or_else(|| {
            ConfigError::SectionNotFound {
                name: section.to_string(),
            }
        })?;
        if !self.document().has_section(section) {
            return Err(ConfigError::SectionNotFound {
                name: section.to_string(),
            });
        }
        let mut guard = ResolveGuard::default();
        self.section_context(section, object_type, name, None, &mut guard)
    }

    /// Resolves `name` (default `main`) as a node of `object_type`.
    ///
    /// `name` may also be `config:<file>#<name>` to resolve in another file,
    /// or `egg:`/`call:` to refer to a factory directly.
    pub fn get_context(
        &self,
        object_type: ObjectType,
        name: Option<&str>,
        global_conf: Option<&Conf>,
    ) -> Result<Context, ConfigError> {
        let mut guard = ResolveGuard::default();
        self.context_inner(object_type, name, global_conf, &mut guard)
    }

    pub(crate) fn context_inner(
        &self,
        object_type: ObjectType,
        name: Option<&str>,
        global_conf: Option<&Conf>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("main");

        if let Some(rest) = name.strip_prefix("config:") {
            let (file, inner_name) = match rest.split_once('#') {
                Some((file, inner_name)) => (file, Some(inner_name)),
                None => (rest, None),
            };
            let other = self.sibling(file, global_conf)?;
            return other.context_inner(object_type, inner_name, global_conf, guard);
        }

        if name.starts_with("egg:") || name.starts_with("call:") {
            let mut ctx = Context::new(
                object_type,
                name,
                "",
                self.clone(),
                global_conf.cloned().unwrap_or_default(),
                Conf::new(),
            );
            ctx.factory = Some(FactoryRef::parse(name, "use"));
            return Ok(ctx);
        }

        let section = self.find_section(object_type, name)?;
        self.section_context(&section, object_type, name, global_conf, guard)
    }

    fn find_section(&self, object_type: ObjectType, name: &str) -> Result<String, ConfigError> {
        let prefixes = object_type.lookup_prefixes();
        let found: Vec<&str> = self
            .document()
            .sections()
            .filter(|section| match section.split_once(':') {
                Some((prefix, n)) => prefixes.contains(&prefix.trim()) && n.trim() == name,
                None => name == "main" && prefixes.contains(&section.trim()),
            })
            .collect();

        match found.as_slice() {
            [] => Err(ConfigError::SectionNotFound {
                name: format!("{object_type}:{name}"),
            }),
            [one] => Ok((*one).to_string()),
            many => Err(ConfigError::AmbiguousSection {
                name: name.to_string(),
                candidates: many.join(", "),
            }),
        }
    }

    fn section_context(
        &self,
        section: &str,
        object_type: ObjectType,
        name: &str,
        global_conf: Option<&Conf>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        let key = format!("{}[{section}]", self.path().display());
        guard.scoped(key, |guard| {
            self.build_section_context(section, object_type, name, global_conf, guard)
        })
    }

    fn build_section_context(
        &self,
        section: &str,
        object_type: ObjectType,
        name: &str,
        global_conf: Option<&Conf>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        let doc = self.document();
        let defaults = doc.interpolated_defaults()?;

        let mut global_conf = global_conf.cloned().unwrap_or_default();
        global_conf.extend(defaults.clone());

        let mut local_conf = Conf::new();
        let mut global_additions = Conf::new();
        let mut get_from_globals = Vec::new();

        for option in doc.options(section)? {
            if let Some(target) = option.strip_prefix("set ") {
                let value = doc.get(section, option)?;
                global_additions.insert(target.trim().to_string(), value.clone());
                global_conf.insert(target.trim().to_string(), value);
            } else if let Some(target) = option.strip_prefix("get ") {
                get_from_globals.push((target.trim().to_string(), doc.get(section, option)?));
            } else if defaults.contains_key(option) {
                // Global option visible through [DEFAULT].
                continue;
            } else {
                local_conf.insert(option.to_string(), doc.get(section, option)?);
            }
        }

        for (local_key, global_key) in get_from_globals {
            let value = global_conf
                .get(&global_key)
                .ok_or_else(|| ConfigError::unresolved(section, &global_key))?;
            local_conf.insert(local_key, value.clone());
        }

        let filter_with = if matches!(object_type, ObjectType::App | ObjectType::Filter) {
            local_conf.shift_remove("filter-with")
        } else {
            None
        };

        if let Some(requirements) = local_conf.shift_remove("require") {
            self.check_requirements(&requirements)?;
        }

        let (kind, _) = ObjectType::from_section(section).ok_or_else(|| {
            ConfigError::SectionNotFound {
                name: section.to_string(),
            }
        })?;

        let mut parts = SectionParts {
            section,
            name,
            global_conf,
            local_conf,
            global_additions,
        };

        let context = match kind {
            ObjectType::Pipeline => self.pipeline_context(parts, guard)?,
            ObjectType::Shell => self.shell_context(parts, guard)?,
            ObjectType::Model => Self::model_context(self, parts)?,
            ObjectType::FilterApp => self.filter_app_context(parts, guard)?,
            ObjectType::App => {
                require_key(&parts, "shell")?;
                parts
                    .local_conf
                    .entry("shell_class".to_string())
                    .or_insert_with(|| "default".to_string());
                self.context_from_use(kind, parts, Some("shell"), guard)?
            }
            ObjectType::Service => {
                require_key(&parts, "entry")?;
                self.context_from_use(kind, parts, Some("service"), guard)?
            }
            ObjectType::Platform => {
                require_key(&parts, "start")?;
                self.context_from_use(kind, parts, Some("platform"), guard)?
            }
            ObjectType::Composite | ObjectType::Filter | ObjectType::FilterWith => {
                self.context_from_use(kind, parts, None, guard)?
            }
        };

        debug!(section, kind = %context.object_type, "resolved configuration section");

        match filter_with {
            Some(filter_name) => {
                let filter = self.context_inner(
                    ObjectType::Filter,
                    Some(&filter_name),
                    Some(&context.global_conf),
                    guard,
                )?;
                let mut wrapper = Context::new(
                    ObjectType::FilterWith,
                    name,
                    section,
                    self.clone(),
                    context.global_conf.clone(),
                    Conf::new(),
                );
                wrapper.filter_contexts = vec![filter];
                wrapper.next_context = Some(Box::new(context));
                Ok(wrapper)
            }
            None => Ok(context),
        }
    }

    fn pipeline_context(
        &self,
        mut parts: SectionParts<'_>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        let pipeline = take_required(&mut parts, "pipeline")?;
        reject_extra(&parts)?;

        let names: Vec<&str> = pipeline.split_whitespace().collect();
        let (app_name, filters) = names.split_last().ok_or_else(|| {
            ConfigError::invalid_value("pipeline", format!("[{}] lists no application", parts.section))
        })?;

        let mut context = parts.into_context(ObjectType::Pipeline, self);
        context.filter_contexts = filters
            .iter()
            .rev()
            .map(|filter| {
                self.context_inner(ObjectType::Filter, Some(filter), Some(&context.global_conf), guard)
            })
            .collect::<Result<_, _>>()?;
        context.app_context = Some(Box::new(self.context_inner(
            ObjectType::App,
            Some(app_name),
            Some(&context.global_conf),
            guard,
        )?));
        Ok(context)
    }

    fn shell_context(
        &self,
        mut parts: SectionParts<'_>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        let models = take_required(&mut parts, "models")?;
        reject_extra(&parts)?;

        let names: Vec<&str> = models.split_whitespace().collect();
        let (last, others) = names.split_last().ok_or_else(|| {
            ConfigError::invalid_value("models", format!("[{}] lists no model", parts.section))
        })?;

        let mut context = parts.into_context(ObjectType::Shell, self);
        context.app_context = Some(Box::new(self.context_inner(
            ObjectType::App,
            Some(last),
            Some(&context.global_conf),
            guard,
        )?));
        context.filter_contexts = others
            .iter()
            .map(|model| self.context_inner(ObjectType::App, Some(model), Some(&context.global_conf), guard))
            .collect::<Result<_, _>>()?;
        Ok(context)
    }

    fn model_context(&self, mut parts: SectionParts<'_>) -> Result<Context, ConfigError> {
        let model = take_required(&mut parts, "model")?;
        let last = model
            .split_whitespace()
            .last()
            .ok_or_else(|| ConfigError::invalid_value("model", format!("[{}] is empty", parts.section)))?
            .to_string();
        let mut context = parts.into_context(ObjectType::Model, self);
        context.model = Some(last);
        Ok(context)
    }

    fn filter_app_context(
        &self,
        mut parts: SectionParts<'_>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        let next = take_required(&mut parts, "next")?;
        let next_context =
            self.context_inner(ObjectType::App, Some(&next), Some(&parts.global_conf), guard)?;
        let mut context = self.context_from_use(ObjectType::FilterApp, parts, None, guard)?;
        context.next_context = Some(Box::new(next_context));
        Ok(context)
    }

    fn context_from_use(
        &self,
        kind: ObjectType,
        mut parts: SectionParts<'_>,
        default_factory: Option<&str>,
        guard: &mut ResolveGuard,
    ) -> Result<Context, ConfigError> {
        if let Some(reference) = parts.local_conf.shift_remove("use") {
            let lookup = match kind {
                ObjectType::Filter | ObjectType::FilterApp => ObjectType::Filter,
                _ => ObjectType::App,
            };
            let mut used =
                self.context_inner(lookup, Some(&reference), Some(&parts.global_conf), guard)?;
            used.global_conf.extend(parts.global_additions);
            used.local_conf.extend(parts.local_conf);
            used.object_type = kind;
            used.name = parts.name.to_string();
            used.section = parts.section.to_string();
            return Ok(used);
        }

        let explicit = parts
            .local_conf
            .keys()
            .find(|k| is_factory_key(k))
            .cloned();
        let factory = match explicit {
            Some(key) => {
                let value = parts.local_conf.shift_remove(&key).unwrap_or_default();
                FactoryRef::parse(&value, &key)
            }
            None => match default_factory {
                Some(name) => FactoryRef::builtin(name),
                None => {
                    return Err(ConfigError::NoFactory {
                        section: parts.section.to_string(),
                    })
                }
            },
        };

        let mut context = parts.into_context(kind, self);
        context.factory = Some(factory);
        Ok(context)
    }

    fn check_requirements(&self, requirements: &str) -> Result<(), ConfigError> {
        for entry in requirements.split_whitespace() {
            let name = entry
                .split(['<', '>', '=', '!', '~', '[', ';'])
                .next()
                .unwrap_or(entry)
                .trim();
            if !self.inner.provided.contains(name) {
                return Err(ConfigError::DependencyUnavailable {
                    requirement: entry.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn is_factory_key(key: &str) -> bool {
    key == "factory" || (key.starts_with("paste.") && key.ends_with("_factory"))
}

/// Values gathered from one section before its type-specific rules run.
struct SectionParts<'a> {
    section: &'a str,
    name: &'a str,
    global_conf: Conf,
    local_conf: Conf,
    global_additions: Conf,
}

impl SectionParts<'_> {
    fn into_context(self, kind: ObjectType, loader: &ConfigLoader) -> Context {
        Context::new(
            kind,
            self.name,
            self.section,
            loader.clone(),
            self.global_conf,
            self.local_conf,
        )
    }
}

fn require_key(parts: &SectionParts<'_>, key: &str) -> Result<(), ConfigError> {
    if parts.local_conf.contains_key(key) {
        Ok(())
    } else {
        Err(ConfigError::missing_key(parts.section, key))
    }
}

fn take_required(parts: &mut SectionParts<'_>, key: &str) -> Result<String, ConfigError> {
    parts
        .local_conf
        .shift_remove(key)
        .ok_or_else(|| ConfigError::missing_key(parts.section, key))
}

fn reject_extra(parts: &SectionParts<'_>) -> Result<(), ConfigError> {
    if parts.local_conf.is_empty() {
        return Ok(());
    }
    Err(ConfigError::ExtraSettings {
        section: parts.section.to_string(),
        keys: parts
            .local_conf
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn loader(text: &str) -> ConfigLoader {
        ConfigLoader::parse(text, "/etc/trellis/app.ini").unwrap()
    }

    const DEPLOY: &str = "\
[DEFAULT]
log_level = debug

[composite:main]
use = egg:trellis#urlmap
/ = api

[pipeline:api]
pipeline = session token main_app

[filter:session]
use = egg:trellis#session

[filter:token]
paste.filter_factory = token
set token_expiry = 60

[app:main_app]
shell = default

[shell:default]
models = users orders

[model:users]
model = demo.models.Users
connection = memory://localhost:0

[model:orders]
model = demo.models Orders
";

    #[test]
    fn test_composite_uses_egg_factory() {
        let ctx = loader(DEPLOY).get_context(ObjectType::App, None, None).unwrap();
        assert_eq!(ctx.object_type, ObjectType::Composite);
        assert_eq!(ctx.factory_name(), Some("urlmap"));
        assert_eq!(ctx.local_conf.get("/").map(String::as_str), Some("api"));
        assert_eq!(ctx.global_conf.get("log_level").map(String::as_str), Some("debug"));
        assert!(!ctx.local_conf.contains_key("log_level"));
    }

    #[test]
    fn test_pipeline_filters_are_reversed() {
        let ctx = loader(DEPLOY)
            .get_context(ObjectType::App, Some("api"), None)
            .unwrap();
        assert_eq!(ctx.object_type, ObjectType::Pipeline);
        let names: Vec<_> = ctx.filter_contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["token", "session"]);
        assert!(ctx.filter_contexts.iter().all(|c| c.object_type == ObjectType::Filter));

        let app = ctx.app_context.unwrap();
        assert_eq!(app.object_type, ObjectType::App);
        assert_eq!(app.factory_name(), Some("shell"));
        assert_eq!(app.local_conf.get("shell").map(String::as_str), Some("default"));
    }

    #[test]
    fn test_explicit_factory_and_set_indirection() {
        let ctx = loader(DEPLOY)
            .get_context(ObjectType::Filter, Some("token"), None)
            .unwrap();
        let factory = ctx.factory.unwrap();
        assert_eq!(factory.name, "token");
        assert_eq!(factory.protocol, "paste.filter_factory");
        assert_eq!(ctx.global_conf.get("token_expiry").map(String::as_str), Some("60"));
        assert!(ctx.local_conf.is_empty());
    }

    #[test]
    fn test_shell_and_models() {
        let ctx = loader(DEPLOY)
            .get_context(ObjectType::Shell, Some("default"), None)
            .unwrap();
        assert_eq!(ctx.object_type, ObjectType::Shell);
        let last = ctx.app_context.unwrap();
        assert_eq!(last.object_type, ObjectType::Model);
        assert_eq!(last.model.as_deref(), Some("Orders"));
        assert_eq!(ctx.filter_contexts.len(), 1);
        let users = &ctx.filter_contexts[0];
        assert_eq!(users.model.as_deref(), Some("demo.models.Users"));
        assert_eq!(
            users.local_conf.get("connection").map(String::as_str),
            Some("memory://localhost:0")
        );
    }

    #[test]
    fn test_resolve_by_section_header() {
        let ctx = loader(DEPLOY)
            .resolve("pipeline:api", ObjectType::Pipeline)
            .unwrap();
        assert_eq!(ctx.filter_contexts.len(), 2);

        let err = loader(DEPLOY)
            .resolve("pipeline:nope", ObjectType::Pipeline)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SectionNotFound { .. }));
    }

    #[test]
    fn test_missing_required_keys() {
        let cases = [
            ("[pipeline:main]\nfoo = bar\n", "pipeline"),
            ("[app:main]\nfoo = bar\n", "shell"),
            ("[shell:main]\nfoo = bar\n", "models"),
            ("[model:main]\nfoo = bar\n", "model"),
            ("[service:main]\nfoo = bar\n", "entry"),
            ("[platform:main]\nfoo = bar\n", "start"),
            ("[filter-app:main]\nuse = egg:trellis#session\n", "next"),
        ];
        for (text, key) in cases {
            let err = loader(text)
                .get_context(ObjectType::App, None, None)
                .unwrap_err();
            match err {
                ConfigError::MissingRequiredKey { key: missing, .. } => assert_eq!(missing, key),
                other => panic!("expected missing {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_pipeline_rejects_extra_settings() {
        let err = loader("[pipeline:main]\npipeline = api\ndebug = true\n\n[app:api]\nshell = x\n")
            .get_context(ObjectType::App, None, None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ExtraSettings { ref keys, .. } if keys == "debug"));
    }

    #[test]
    fn test_get_copies_global_value() {
        let ctx = loader("[DEFAULT]\ndb = memory://x:1\n\n[filter:f]\nuse = call:session\nget store = db\n")
            .get_context(ObjectType::Filter, Some("f"), None)
            .unwrap();
        assert_eq!(ctx.local_conf.get("store").map(String::as_str), Some("memory://x:1"));

        let err = loader("[filter:f]\nuse = call:session\nget store = nope\n")
            .get_context(ObjectType::Filter, Some("f"), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_use_refers_to_other_section() {
        let ctx = loader(
            "[filter:base]\nuse = egg:trellis#token\nexpired_time = 10\n\n\
             [filter:strict]\nuse = base\nexpired_time = 5\n",
        )
        .get_context(ObjectType::Filter, Some("strict"), None)
        .unwrap();
        assert_eq!(ctx.name, "strict");
        assert_eq!(ctx.factory_name(), Some("token"));
        assert_eq!(ctx.local_conf.get("expired_time").map(String::as_str), Some("5"));
    }

    #[test]
    fn test_filter_with_wraps_app() {
        let ctx = loader("[app:main]\nshell = s\nfilter-with = log\n\n[filter:log]\nuse = egg:trellis#access_log\n")
            .get_context(ObjectType::App, None, None)
            .unwrap();
        assert_eq!(ctx.object_type, ObjectType::FilterWith);
        assert_eq!(ctx.filter_contexts[0].factory_name(), Some("access_log"));
        assert_eq!(ctx.next_context.unwrap().factory_name(), Some("shell"));
    }

    #[test]
    fn test_filter_app_binds_next() {
        let ctx = loader("[filter-app:main]\nuse = egg:trellis#session\nnext = api\n\n[app:api]\nshell = s\n")
            .get_context(ObjectType::App, None, None)
            .unwrap();
        assert_eq!(ctx.object_type, ObjectType::FilterApp);
        assert_eq!(ctx.factory_name(), Some("session"));
        assert_eq!(ctx.next_context.unwrap().name, "api");
    }

    #[test]
    fn test_require_checks_provided_names() {
        let text = "[filter:f]\nuse = call:session\nrequire = trellis-session>=0.1\n";
        let err = loader(text)
            .get_context(ObjectType::Filter, Some("f"), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DependencyUnavailable { .. }));

        let ok = loader(text)
            .with_provided(["trellis-session"])
            .get_context(ObjectType::Filter, Some("f"), None)
            .unwrap();
        assert!(!ok.local_conf.contains_key("require"));
    }

    #[test]
    fn test_no_factory_is_an_error() {
        let err = loader("[filter:f]\nlevel = 3\n")
            .get_context(ObjectType::Filter, Some("f"), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoFactory { .. }));
    }

    #[test]
    fn test_self_referencing_pipeline_is_a_cycle() {
        let err = loader("[pipeline:main]\npipeline = main\n")
            .get_context(ObjectType::App, None, None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::CycleDetected { .. }), "{err:?}");
    }

    #[test]
    fn test_mutual_use_is_a_cycle() {
        let err = loader("[filter:a]\nuse = b\n\n[filter:b]\nuse = a\n")
            .get_context(ObjectType::Filter, Some("a"), None)
            .unwrap_err();
        match err {
            ConfigError::CycleDetected { chain } => {
                assert!(chain.contains("[filter:a]"));
                assert!(chain.contains("[filter:b]"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_section() {
        let err = loader("[app:main]\nshell = a\n\n[pipeline:main]\npipeline = x\n")
            .get_context(ObjectType::App, None, None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousSection { .. }));
    }

    #[test]
    fn test_config_reference_to_other_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("main.ini"),
            "[pipeline:main]\npipeline = session config:apps.ini#api\n\n\
             [filter:session]\nuse = egg:trellis#session\n",
        )
        .unwrap();
        fs::write(dir.path().join("apps.ini"), "[app:api]\nshell = main\n").unwrap();

        let loader = ConfigLoader::from_file(dir.path().join("main.ini")).unwrap();
        let ctx = loader.get_context(ObjectType::App, None, None).unwrap();
        let app = ctx.app_context.unwrap();
        assert_eq!(app.name, "api");
        assert!(app.source().ends_with("apps.ini"));
        assert!(app.global_conf.contains_key("here"));
    }

    #[test]
    fn test_cross_file_cycle() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ini"), "[app:main]\nuse = config:b.ini#main\nshell = x\n").unwrap();
        fs::write(dir.path().join("b.ini"), "[app:main]\nuse = config:a.ini#main\nshell = x\n").unwrap();

        let loader = ConfigLoader::from_file(dir.path().join("a.ini")).unwrap();
        let err = loader.get_context(ObjectType::App, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::CycleDetected { .. }), "{err:?}");
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::from_file("/definitely/not/here.ini").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_here_default() {
        let loader = loader("[app:main]\nshell = s\n");
        let conf = loader.global_conf().unwrap();
        assert_eq!(conf.get("here").map(String::as_str), Some("/etc/trellis"));
        assert_eq!(conf.get("__file__").map(String::as_str), Some("/etc/trellis/app.ini"));
    }
}
