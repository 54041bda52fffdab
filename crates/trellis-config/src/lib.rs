//! Deployment configuration for Trellis.
//!
//! A deployment file is an ini document whose section headers name a kind of
//! component and a name, such as `[pipeline:main]` or `[filter:session]`.
//! [`ConfigLoader`] parses the file and resolves a section into a tree of
//! [`Context`] nodes; a [`ContextFactory`] then turns that tree into running
//! components.
//!
//! ```ini
//! [DEFAULT]
//! log_level = info
//!
//! [composite:main]
//! use = egg:trellis#urlmap
//! /api = api
//!
//! [pipeline:api]
//! pipeline = session token main_app
//!
//! [filter:session]
//! use = egg:trellis#session
//!
//! [filter:token]
//! use = egg:trellis#token
//!
//! [app:main_app]
//! shell = users
//!
//! [shell:users]
//! models = accounts
//!
//! [model:accounts]
//! model = accounts
//! ```
//!
//! Besides the section rules, the loader understands indirection through
//! `use`, `set`/`get`, `require` and `filter-with`, and indirect values
//! through `config:` and `version:` (see [`ConfValue`]). All resolution is
//! guarded against cycles.
//!
//! [`ConfigWatcher`] reports edits to deployment files for hot reload.

#![doc(html_root_url = "https://docs.rs/trellis-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod ini;
mod loader;
mod value;
mod watcher;

pub use context::{Conf, Context, ContextFactory, FactoryRef, ObjectType};
pub use error::ConfigError;
pub use ini::{IniDocument, DEFAULT_SECTION};
pub use loader::{ConfigLoader, MAX_RESOLVE_DEPTH};
pub use value::ConfValue;
pub use watcher::{ChangeKind, ConfigChange, ConfigWatcher, ConfigWatcherBuilder, DEFAULT_DEBOUNCE};
