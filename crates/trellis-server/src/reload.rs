//! Atomically replaceable application.
//!
//! The server answers every request from the application currently held in
//! an [`AppHandle`]. Reloading builds a complete new application and swaps
//! it in; requests already running keep the one they started with.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use trellis_config::ConfigWatcher;
use trellis_core::Application;

use crate::shutdown::ShutdownSignal;

/// Shared handle to the running application.
#[derive(Clone)]
pub struct AppHandle {
    current: Arc<ArcSwap<Arc<dyn Application>>>,
}

impl fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppHandle").finish_non_exhaustive()
    }
}

impl AppHandle {
    /// Wraps the initial application.
    pub fn new(app: Arc<dyn Application>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(app)),
        }
    }

    /// Returns the current application.
    pub fn load(&self) -> Arc<dyn Application> {
        (**self.current.load()).clone()
    }

    /// Replaces the application for all later requests.
    pub fn replace(&self, app: Arc<dyn Application>) {
        self.current.store(Arc::new(app));
    }
}

/// Rebuilds the application whenever a watched file changes, until
/// `shutdown` triggers or the watcher stops.
///
/// A failed rebuild is logged and the running application is kept.
pub async fn watch_and_reload<F, E>(
    handle: AppHandle,
    mut watcher: ConfigWatcher,
    rebuild: F,
    shutdown: ShutdownSignal,
) where
    F: Fn() -> Result<Arc<dyn Application>, E> + Send + Sync,
    E: fmt::Display,
{
    loop {
        let change = tokio::select! {
            change = watcher.next() => change,
            () = shutdown.recv() => return,
        };
        let Some(change) = change else {
            tracing::debug!("config watcher stopped");
            return;
        };

        tracing::info!(path = %change.path.display(), kind = ?change.kind, "deployment file changed");
        match rebuild() {
            Ok(app) => {
                handle.replace(app);
                tracing::info!("application reloaded");
            }
            Err(e) => {
                tracing::error!(error = %e, "reload failed, keeping the running application");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;
    use trellis_core::{BoxFuture, Reply, RequestContext, ResponseContext};

    struct Fixed(&'static str);

    impl Application for Fixed {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext> {
            let reply = Reply::json(json!({ "app": self.0 }));
            Box::pin(async move { ResponseContext::from_reply(Some(reply), Default::default()) })
        }
    }

    async fn answer(handle: &AppHandle) -> serde_json::Value {
        let mut ctx = RequestContext::new(Method::GET, "/");
        let app = handle.load();
        let response = app.call(&mut ctx).await;
        response.reply.as_json().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_replace_affects_later_requests() {
        let handle = AppHandle::new(Arc::new(Fixed("first")));
        let running = handle.load();

        handle.replace(Arc::new(Fixed("second")));
        assert_eq!(answer(&handle).await, json!({"app": "second"}));

        let mut ctx = RequestContext::new(Method::GET, "/");
        let response = running.call(&mut ctx).await;
        assert_eq!(response.reply.as_json(), Some(&json!({"app": "first"})));
    }

    #[tokio::test]
    async fn test_reload_on_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ini");
        std::fs::write(&path, "[app:main]\nshell = default\n").unwrap();

        let watcher = ConfigWatcher::builder()
            .with_debounce(std::time::Duration::from_millis(10))
            .watch_file(&path)
            .unwrap()
            .build()
            .unwrap();
        let handle = AppHandle::new(Arc::new(Fixed("first")));
        let shutdown = ShutdownSignal::new();

        let task = tokio::spawn(watch_and_reload(
            handle.clone(),
            watcher,
            || Ok::<_, String>(Arc::new(Fixed("reloaded")) as Arc<dyn Application>),
            shutdown.clone(),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        std::fs::write(&path, "[app:main]\nshell = other\n").unwrap();

        let mut reloaded = false;
        for _ in 0..50 {
            if answer(&handle).await == json!({"app": "reloaded"}) {
                reloaded = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(reloaded);

        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("reloader should stop")
            .expect("reloader should not panic");
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_application() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ini");
        std::fs::write(&path, "[app:main]\n").unwrap();

        let watcher = ConfigWatcher::builder()
            .with_debounce(std::time::Duration::from_millis(10))
            .watch_file(&path)
            .unwrap()
            .build()
            .unwrap();
        let handle = AppHandle::new(Arc::new(Fixed("first")));
        let shutdown = ShutdownSignal::new();

        let task = tokio::spawn(watch_and_reload(
            handle.clone(),
            watcher,
            || Err::<Arc<dyn Application>, _>("broken config"),
            shutdown.clone(),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        std::fs::write(&path, "[app:main]\nshell = x\n").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(answer(&handle).await, json!({"app": "first"}));
        shutdown.trigger();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;
    }
}
