//! Serving a deployment over HTTP with hot reload.

use std::sync::Arc;

use tracing::warn;
use trellis_config::ConfigWatcher;
use trellis_server::{watch_and_reload, AppHandle, Server, ShutdownSignal};

use crate::deploy::Deployment;
use crate::error::DeployError;
use crate::registry::FactoryRegistry;

/// Loads `uri` and serves it until SIGTERM or SIGINT.
///
/// ```rust,ignore
/// #[tokio::main]
/// async fn main() -> Result<(), trellis::DeployError> {
///     trellis::serve("config:deploy/app.ini", trellis::FactoryRegistry::new()).await
/// }
/// ```
pub async fn serve(uri: &str, factories: FactoryRegistry) -> Result<(), DeployError> {
    let deployment = Deployment::load(uri, Arc::new(factories))?;
    serve_deployment(deployment, ShutdownSignal::with_os_signals()).await
}

/// Serves `deployment` until `shutdown` triggers.
///
/// The server settings come from the `[server:main]` section. Edits to the
/// deployment file rebuild the application; requests switch to the new one
/// once it assembles, and a file that fails to assemble leaves the running
/// application in place.
pub async fn serve_deployment(deployment: Deployment, shutdown: ShutdownSignal) -> Result<(), DeployError> {
    let config = deployment.server_config()?;
    let handle = AppHandle::new(deployment.build()?);

    let watcher = ConfigWatcher::builder()
        .watch_file(deployment.path())
        .and_then(|builder| builder.build());
    let reloader = match watcher {
        Ok(watcher) => {
            let rebuild = move || deployment.reload()?.build();
            Some(tokio::spawn(watch_and_reload(
                handle.clone(),
                watcher,
                rebuild,
                shutdown.clone(),
            )))
        }
        Err(e) => {
            warn!(error = %e, "hot reload disabled");
            None
        }
    };

    let result = Server::with_handle(config, handle)
        .run_with_shutdown(shutdown.clone())
        .await;

    shutdown.trigger();
    if let Some(task) = reloader {
        if let Err(e) = task.await {
            warn!(error = %e, "reload task ended abnormally");
        }
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ini");
        std::fs::write(
            &path,
            "[server:main]\nhost = 127.0.0.1\nport = 0\n\n[app:main]\nshell = default\n",
        )
        .unwrap();

        let deployment =
            Deployment::load(path.to_str().unwrap(), Arc::new(FactoryRegistry::new())).unwrap();
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve_deployment(deployment, shutdown),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_broken_deployment_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ini");
        std::fs::write(&path, "[app:main]\n").unwrap();

        let result = serve(path.to_str().unwrap(), FactoryRegistry::new()).await;
        assert!(matches!(result, Err(DeployError::Config(_))));
    }
}
