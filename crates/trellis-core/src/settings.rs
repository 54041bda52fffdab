//! Resolved configuration values handed to models and handlers.
//!
//! A [`Settings`] map is what a handler sees through
//! [`Environ::config`](crate::Environ::config): the model section's keys
//! after indirection has been resolved. Values are plain text, a nested
//! section, or a [`VersionSet`] of alternatives.

use crate::error::TrellisError;
use indexmap::IndexMap;

/// Name of the fallback entry consulted when no version matches.
pub const DEFAULT_VERSION: &str = "default";

/// A set of versioned alternatives for one configuration key.
///
/// Selection tries the requested version, then the set's default
/// version, then an entry literally named `default`.
///
/// ```
/// use trellis_core::VersionSet;
///
/// let mut set = VersionSet::new(Some("v1".to_string()));
/// set.insert("v1", "old");
/// set.insert("v2", "new");
///
/// assert_eq!(set.select(Some("v2")), Some(&"new"));
/// assert_eq!(set.select(Some("v9")), Some(&"old"));
/// assert_eq!(set.select(None), Some(&"old"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSet<T> {
    default_version: String,
    versions: IndexMap<String, T>,
}

impl<T> VersionSet<T> {
    /// Creates an empty set. `None` makes `default` the default version.
    #[must_use]
    pub fn new(default_version: Option<String>) -> Self {
        Self {
            default_version: default_version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            versions: IndexMap::new(),
        }
    }

    /// Returns the default version name.
    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    /// Changes the default version.
    pub fn set_default_version(&mut self, version: impl Into<String>) {
        self.default_version = version.into();
    }

    /// Adds an alternative unless the version is already present.
    pub fn insert(&mut self, version: impl Into<String>, value: T) {
        self.versions.entry(version.into()).or_insert(value);
    }

    /// Adds or replaces an alternative.
    pub fn set_version(&mut self, version: impl Into<String>, value: T) {
        self.versions.insert(version.into(), value);
    }

    /// Returns the alternative registered under exactly `version`.
    pub fn get(&self, version: &str) -> Option<&T> {
        self.versions.get(version)
    }

    /// Selects an alternative with fallback to the default version.
    pub fn select(&self, version: Option<&str>) -> Option<&T> {
        let wanted = version.unwrap_or(&self.default_version);
        self.versions
            .get(wanted)
            .or_else(|| self.versions.get(&self.default_version))
            .or_else(|| self.versions.get(DEFAULT_VERSION))
    }

    /// Converts every alternative, keeping names and the default version.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> VersionSet<U> {
        VersionSet {
            default_version: self.default_version,
            versions: self.versions.into_iter().map(|(k, v)| (k, f(v))).collect(),
        }
    }

    /// Iterates over registered version names in insertion order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// Number of alternatives.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if no alternative is registered.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// A single resolved configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    /// Literal text.
    Text(String),
    /// Keys of another section, itself resolved.
    Section(Settings),
    /// Versioned alternatives selected at runtime.
    Versioned(VersionSet<SettingValue>),
}

impl SettingValue {
    /// Returns the text of this value, selecting the default version if needed.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Versioned(set) => set.select(None).and_then(SettingValue::as_str),
            Self::Section(_) => None,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Ordered map of resolved configuration values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: IndexMap<String, SettingValue>,
}

impl Settings {
    /// Creates an empty settings map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the raw value for a key.
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Returns the text of a key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(SettingValue::as_str)
    }

    /// Returns the text of a key or an internal error naming it.
    pub fn require(&self, key: &str) -> Result<&str, TrellisError> {
        self.get_str(key)
            .ok_or_else(|| TrellisError::internal(format!("missing setting '{key}'")))
    }

    /// Returns a nested section.
    pub fn section(&self, key: &str) -> Option<&Settings> {
        match self.values.get(key) {
            Some(SettingValue::Section(s)) => Some(s),
            _ => None,
        }
    }

    /// Selects a versioned value. Plain values are returned for any version.
    pub fn versioned(&self, key: &str, version: Option<&str>) -> Option<&SettingValue> {
        match self.values.get(key)? {
            SettingValue::Versioned(set) => set.select(version),
            other => Some(other),
        }
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_set_falls_back_to_default_entry() {
        let mut set = VersionSet::new(Some("v3".to_string()));
        set.insert("default", 0);
        set.insert("v1", 1);
        assert_eq!(set.select(Some("v1")), Some(&1));
        assert_eq!(set.select(Some("v2")), Some(&0));
        assert_eq!(set.select(None), Some(&0));
    }

    #[test]
    fn test_version_set_insert_keeps_first() {
        let mut set = VersionSet::new(None);
        set.insert("v1", "a");
        set.insert("v1", "b");
        assert_eq!(set.get("v1"), Some(&"a"));
        set.set_version("v1", "c");
        assert_eq!(set.get("v1"), Some(&"c"));
        assert_eq!(set.default_version(), "default");
    }

    #[test]
    fn test_settings_lookup() {
        let mut nested = Settings::new();
        nested.insert("host", "localhost");

        let mut versions = VersionSet::new(Some("v1".into()));
        versions.insert("v1", SettingValue::from("redis://a:1"));
        versions.insert("v2", SettingValue::from("redis://b:2"));

        let mut settings: Settings = [("name", "demo")].into_iter().collect();
        settings.insert("db", SettingValue::Section(nested));
        settings.insert("connection", SettingValue::Versioned(versions));

        assert_eq!(settings.get_str("name"), Some("demo"));
        assert_eq!(settings.section("db").and_then(|s| s.get_str("host")), Some("localhost"));
        assert_eq!(settings.get_str("connection"), Some("redis://a:1"));
        assert_eq!(
            settings.versioned("connection", Some("v2")).and_then(SettingValue::as_str),
            Some("redis://b:2")
        );
        assert!(settings.require("missing").is_err());
    }
}
