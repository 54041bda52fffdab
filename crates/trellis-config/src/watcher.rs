//! Deployment file watching.
//!
//! [`ConfigWatcher`] reports changes to a set of ini files so a server can
//! re-run assembly and swap the running application. Editors commonly
//! replace a file instead of writing it in place, so the watcher listens on
//! each file's directory and filters events down to the watched names.
//!
//! # Example
//!
//! ```no_run
//! use trellis_config::ConfigWatcher;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), trellis_config::ConfigError> {
//! let mut watcher = ConfigWatcher::builder()
//!     .with_debounce(Duration::from_millis(250))
//!     .watch_file("deploy/app.ini")?
//!     .build()?;
//!
//! while let Some(change) = watcher.next().await {
//!     println!("{} changed", change.path.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ConfigError;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// A change to a watched file.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// The watched file.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
    /// When the change was seen.
    pub timestamp: Instant,
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The file appeared.
    Created,
    /// The file's content or metadata changed.
    Modified,
    /// The file went away.
    Deleted,
}

impl ChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Filters raw events down to debounced changes of watched files.
#[derive(Debug)]
pub(crate) struct Debouncer {
    files: HashSet<PathBuf>,
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub(crate) fn new(files: HashSet<PathBuf>, window: Duration) -> Self {
        Self {
            files,
            window,
            last_seen: HashMap::new(),
        }
    }

    pub(crate) fn accept(&mut self, event: &Event, now: Instant) -> Option<ConfigChange> {
        let kind = ChangeKind::from_event(&event.kind)?;
        let path = event.paths.iter().find(|p| self.files.contains(*p))?.clone();

        if let Some(last) = self.last_seen.get(&path) {
            if now.duration_since(*last) < self.window {
                return None;
            }
        }
        self.last_seen.insert(path.clone(), now);

        Some(ConfigChange {
            path,
            kind,
            timestamp: now,
        })
    }
}

/// Builder for [`ConfigWatcher`].
#[derive(Debug, Default)]
pub struct ConfigWatcherBuilder {
    files: Vec<PathBuf>,
    debounce: Option<Duration>,
}

impl ConfigWatcherBuilder {
    /// Sets the window within which repeated changes to one file are merged.
    #[must_use]
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    /// Adds a file to watch. The file must exist.
    pub fn watch_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|_| ConfigError::file_not_found(path))?;
        self.files.push(canonical);
        Ok(self)
    }

    /// Starts watching.
    pub fn build(self) -> Result<ConfigWatcher, ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::Watch {
                message: "no files to watch".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })
        .map_err(|e| ConfigError::Watch {
            message: format!("failed to create watcher: {e}"),
        })?;

        let dirs: HashSet<&Path> = self.files.iter().filter_map(|f| f.parent()).collect();
        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| ConfigError::Watch {
                    message: format!("failed to watch {}: {e}", dir.display()),
                })?;
            debug!(dir = %dir.display(), "watching configuration directory");
        }

        Ok(ConfigWatcher {
            _watcher: watcher,
            rx,
            debouncer: Debouncer::new(
                self.files.into_iter().collect(),
                self.debounce.unwrap_or(DEFAULT_DEBOUNCE),
            ),
        })
    }
}

/// Watches deployment files for changes.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    debouncer: Debouncer,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("debouncer", &self.debouncer)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ConfigWatcherBuilder {
        ConfigWatcherBuilder::default()
    }

    /// Waits for the next change. Returns `None` once the watcher stops.
    pub async fn next(&mut self) -> Option<ConfigChange> {
        while let Some(event) = self.rx.recv().await {
            if let Some(change) = self.debouncer.accept(&event, Instant::now()) {
                return Some(change);
            }
        }
        None
    }
}
