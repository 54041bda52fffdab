//! Value indirection.
//!
//! Option values can refer to other configuration instead of holding text:
//!
//! - `config:normal:<path>:<section>` reads every key of a section in
//!   another file
//! - `config:<app>` resolves an application, in this file or in
//!   `<file>#<name>`
//! - `version:apply:<v>` takes the sibling option `<key>_<v>`
//! - `version:default:<v>` gathers every `<key>_<version>` sibling into a
//!   [`VersionSet`] whose default is `<v>`
//!
//! Resolution runs through the same guard as section resolution, so a value
//! that ends up referring to itself is reported as a cycle.

use crate::context::{Conf, Context, ObjectType};
use crate::error::ConfigError;
use crate::loader::{ConfigLoader, ResolveGuard};
use indexmap::IndexMap;
use trellis_core::{SettingValue, Settings, VersionSet};

/// A resolved option value.
#[derive(Debug, Clone)]
pub enum ConfValue {
    /// Plain text.
    Text(String),
    /// Keys of a section loaded through `config:normal:`.
    Section(IndexMap<String, ConfValue>),
    /// An application loaded through `config:`.
    App(Box<Context>),
    /// Alternatives gathered by `version:default:`.
    Versioned(VersionSet<ConfValue>),
}

impl ConfValue {
    /// Returns the text, if this is a plain value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to a runtime setting. Applications are represented by name.
    pub fn into_setting(self) -> SettingValue {
        match self {
            Self::Text(s) => SettingValue::Text(s),
            Self::Section(map) => SettingValue::Section(
                map.into_iter()
                    .map(|(k, v)| (k, v.into_setting()))
                    .collect::<Settings>(),
            ),
            Self::App(ctx) => SettingValue::Text(ctx.name),
            Self::Versioned(set) => SettingValue::Versioned(set.map(Self::into_setting)),
        }
    }
}

impl ConfigLoader {
    /// Resolves every value of `conf`, a section-scoped map from `scope`.
    pub fn resolve_conf(
        &self,
        scope: &str,
        conf: &Conf,
    ) -> Result<IndexMap<String, ConfValue>, ConfigError> {
        let mut guard = ResolveGuard::default();
        conf.keys()
            .map(|key| Ok((key.clone(), self.value_inner(scope, key, conf, &mut guard)?)))
            .collect()
    }

    /// Resolves the value stored under `key` in `conf`.
    ///
    /// # Example
    ///
    /// ```
    /// use trellis_config::{Conf, ConfValue, ConfigLoader};
    ///
    /// let loader = ConfigLoader::parse("[app:main]\nshell = s\n", "/srv/app.ini").unwrap();
    /// let mut conf = Conf::new();
    /// conf.insert("db".into(), "version:default:v2".into());
    /// conf.insert("db_v1".into(), "memory://old:1".into());
    /// conf.insert("db_v2".into(), "memory://new:1".into());
    ///
    /// match loader.resolve_value("app:main", "db", &conf).unwrap() {
    ///     ConfValue::Versioned(set) => {
    ///         assert_eq!(set.select(None).and_then(ConfValue::as_text), Some("memory://new:1"));
    ///         assert_eq!(set.select(Some("v1")).and_then(ConfValue::as_text), Some("memory://old:1"));
    ///     }
    ///     other => panic!("unexpected {other:?}"),
    /// }
    /// ```
    pub fn resolve_value(&self, scope: &str, key: &str, conf: &Conf) -> Result<ConfValue, ConfigError> {
        let mut guard = ResolveGuard::default();
        self.value_inner(scope, key, conf, &mut guard)
    }

    fn value_inner(
        &self,
        scope: &str,
        key: &str,
        conf: &Conf,
        guard: &mut ResolveGuard,
    ) -> Result<ConfValue, ConfigError> {
        let raw = conf
            .get(key)
            .ok_or_else(|| ConfigError::unresolved(scope, key))?;
        let guard_key = format!("{}[{scope}].{key}", self.path().display());
        guard.scoped(guard_key, |guard| self.interpret(scope, key, raw, conf, guard))
    }

    fn interpret(
        &self,
        scope: &str,
        key: &str,
        raw: &str,
        conf: &Conf,
        guard: &mut ResolveGuard,
    ) -> Result<ConfValue, ConfigError> {
        let raw = raw.trim();

        if let Some(reference) = raw.strip_prefix("config:normal:") {
            let (file, section) = reference
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::invalid_value(key, format!("expected <path>:<section> in {raw:?}")))?;
            let other = self.sibling(file, None)?;
            return other.section_value(section.trim(), guard);
        }

        if let Some(reference) = raw.strip_prefix("config:") {
            let reference = reference.trim();
            let name = if reference.contains('#') || reference.ends_with(".ini") {
                format!("config:{reference}")
            } else {
                reference.to_string()
            };
            let ctx = self.context_inner(ObjectType::App, Some(&name), None, guard)?;
            return Ok(ConfValue::App(Box::new(ctx)));
        }

        if let Some(version) = raw.strip_prefix("version:apply:") {
            let sibling = format!("{key}_{}", version.trim());
            if !conf.contains_key(&sibling) {
                return Err(ConfigError::unresolved(scope, sibling));
            }
            return self.value_inner(scope, &sibling, conf, guard);
        }

        if let Some(version) = raw.strip_prefix("version:default:") {
            let prefix = format!("{key}_");
            let mut set = VersionSet::new(Some(version.trim().to_string()));
            for candidate in conf.keys() {
                if let Some(name) = candidate.strip_prefix(&prefix) {
                    set.insert(name, self.value_inner(scope, candidate, conf, guard)?);
                }
            }
            if set.is_empty() {
                return Err(ConfigError::unresolved(scope, format!("{key}_*")));
            }
            return Ok(ConfValue::Versioned(set));
        }

        if raw.starts_with("version:") {
            return Err(ConfigError::invalid_value(
                key,
                format!("unknown version directive {raw:?}"),
            ));
        }

        Ok(ConfValue::Text(raw.to_string()))
    }

    fn section_value(
        &self,
        section: &str,
        guard: &mut ResolveGuard,
    ) -> Result<ConfValue, ConfigError> {
        let guard_key = format!("{}#[{section}]", self.path().display());
        guard.scoped(guard_key, |guard| {
            let doc = self.document();
            let conf: Conf = doc
                .own_options(section)?
                .into_iter()
                .map(|option| Ok((option.to_string(), doc.get(section, option)?)))
                .collect::<Result<_, ConfigError>>()?;
            let values = conf
                .keys()
                .map(|key| Ok((key.clone(), self.value_inner(section, key, &conf, guard)?)))
                .collect::<Result<_, ConfigError>>()?;
            Ok(ConfValue::Section(values))
        })
    }
}
