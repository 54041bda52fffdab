//! Ini document parsing.
//!
//! The dialect is the one deployment files are written in:
//!
//! - `[section]` headers, with a `[DEFAULT]` section visible from every other
//! - `key = value` or `key: value`, split on the first delimiter
//! - indented lines continue the previous value (joined with `\n`)
//! - full-line comments starting with `#` or `;`
//! - `%(name)s` interpolation against the section and the defaults, with
//!   `%%` for a literal percent sign
//!
//! Keys keep their case and their order of appearance.

use crate::error::ConfigError;
use indexmap::IndexMap;

/// Name of the section whose keys every other section inherits.
pub const DEFAULT_SECTION: &str = "DEFAULT";

const MAX_INTERPOLATION_DEPTH: usize = 10;

#[derive(Debug, Clone, Default)]
struct Section {
    line: usize,
    options: IndexMap<String, String>,
}

/// A parsed ini document.
///
/// # Example
///
/// ```
/// use trellis_config::IniDocument;
///
/// let doc = IniDocument::parse(
///     "[DEFAULT]\nroot = /srv\n\n[app:main]\nshell = main\nstatic = %(root)s/static\n",
/// )
/// .unwrap();
///
/// assert_eq!(doc.get("app:main", "static").unwrap(), "/srv/static");
/// assert_eq!(doc.options("app:main").unwrap(), vec!["shell", "static", "root"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    defaults: IndexMap<String, String>,
    sections: IndexMap<String, Section>,
}

impl IniDocument {
    /// Parses ini text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut doc = Self::default();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Continuation of the previous value.
            if raw.starts_with(char::is_whitespace) {
                if let Some(key) = &last_key {
                    let options = doc.options_mut(current.as_deref());
                    if let Some(value) = options.get_mut(key) {
                        if !value.is_empty() {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                    }
                    continue;
                }
                return Err(ConfigError::parse(line_no, "unexpected indented line"));
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| ConfigError::parse(line_no, "unterminated section header"))?
                    .trim();
                if name.is_empty() {
                    return Err(ConfigError::parse(line_no, "empty section name"));
                }
                if name != DEFAULT_SECTION && !doc.sections.contains_key(name) {
                    doc.sections.insert(
                        name.to_string(),
                        Section {
                            line: line_no,
                            options: IndexMap::new(),
                        },
                    );
                }
                current = Some(name.to_string());
                last_key = None;
                continue;
            }

            if current.is_none() {
                return Err(ConfigError::parse(line_no, "option outside of any section"));
            }

            let split = trimmed
                .find(['=', ':'])
                .ok_or_else(|| ConfigError::parse(line_no, format!("expected key = value, got {trimmed:?}")))?;
            let key = trimmed[..split].trim();
            let value = trimmed[split + 1..].trim();
            if key.is_empty() {
                return Err(ConfigError::parse(line_no, "empty option name"));
            }

            doc.options_mut(current.as_deref())
                .insert(key.to_string(), value.to_string());
            last_key = Some(key.to_string());
        }

        Ok(doc)
    }

    fn options_mut(&mut self, section: Option<&str>) -> &mut IndexMap<String, String> {
        match section {
            Some(name) if name != DEFAULT_SECTION => {
                &mut self.sections.entry(name.to_string()).or_default().options
            }
            _ => &mut self.defaults,
        }
    }

    /// Returns the raw `[DEFAULT]` values.
    pub fn defaults(&self) -> &IndexMap<String, String> {
        &self.defaults
    }

    /// Returns the `[DEFAULT]` values with interpolation applied.
    pub fn interpolated_defaults(&self) -> Result<IndexMap<String, String>, ConfigError> {
        self.defaults
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.interpolate(DEFAULT_SECTION, k, v, 0)?)))
            .collect()
    }

    /// Sets a default unless `overwrite` is false and it already exists.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>, overwrite: bool) {
        let key = key.into();
        if overwrite || !self.defaults.contains_key(&key) {
            self.defaults.insert(key, value.into());
        }
    }

    /// Iterates over section names in order of appearance.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Returns true if the section exists.
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Returns the line a section header appeared on.
    pub fn section_line(&self, name: &str) -> Option<usize> {
        self.sections.get(name).map(|s| s.line)
    }

    /// Lists the options visible in a section: its own keys, then defaults.
    pub fn options(&self, section: &str) -> Result<Vec<&str>, ConfigError> {
        let own = self.section(section)?;
        let mut keys: Vec<&str> = own.options.keys().map(String::as_str).collect();
        for key in self.defaults.keys() {
            if !own.options.contains_key(key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Returns the section's own keys, without defaults.
    pub fn own_options(&self, section: &str) -> Result<Vec<&str>, ConfigError> {
        Ok(self.section(section)?.options.keys().map(String::as_str).collect())
    }

    /// Returns an option before interpolation.
    pub fn get_raw(&self, section: &str, option: &str) -> Result<&str, ConfigError> {
        self.lookup(section, option)
            .ok_or_else(|| ConfigError::MissingRequiredKey {
                section: section.to_string(),
                key: option.to_string(),
            })
    }

    /// Returns an option with `%(name)s` references expanded.
    pub fn get(&self, section: &str, option: &str) -> Result<String, ConfigError> {
        let raw = self.get_raw(section, option)?;
        self.interpolate(section, option, raw, 0)
    }

    fn section(&self, name: &str) -> Result<&Section, ConfigError> {
        self.sections
            .get(name)
            .ok_or_else(|| ConfigError::SectionNotFound {
                name: name.to_string(),
            })
    }

    fn lookup(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.options.get(option))
            .or_else(|| self.defaults.get(option))
            .map(String::as_str)
    }

    fn interpolate(
        &self,
        section: &str,
        option: &str,
        value: &str,
        depth: usize,
    ) -> Result<String, ConfigError> {
        if depth > MAX_INTERPOLATION_DEPTH {
            return Err(ConfigError::Interpolation {
                section: section.to_string(),
                option: option.to_string(),
                reason: "interpolation nested too deeply".to_string(),
            });
        }

        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos + 1..];
            if let Some(after) = tail.strip_prefix('%') {
                out.push('%');
                rest = after;
            } else if let Some(inner) = tail.strip_prefix('(') {
                let close = inner.find(")s").ok_or_else(|| ConfigError::Interpolation {
                    section: section.to_string(),
                    option: option.to_string(),
                    reason: format!("bad interpolation syntax in {value:?}"),
                })?;
                let name = &inner[..close];
                let referenced = self.lookup(section, name).ok_or_else(|| {
                    ConfigError::Interpolation {
                        section: section.to_string(),
                        option: option.to_string(),
                        reason: format!("no option {name:?} to interpolate"),
                    }
                })?;
                out.push_str(&self.interpolate(section, name, referenced, depth + 1)?);
                rest = &inner[close + 2..];
            } else {
                return Err(ConfigError::Interpolation {
                    section: section.to_string(),
                    option: option.to_string(),
                    reason: format!("'%' must be followed by '%' or '(' in {value:?}"),
                });
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}
