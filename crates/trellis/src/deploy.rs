//! Loading applications from deployment files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use trellis_config::{ConfigError, ConfigLoader, ObjectType};
use trellis_core::{Application, Settings};
use trellis_server::ServerConfig;

use crate::assemble::assemble;
use crate::error::DeployError;
use crate::registry::FactoryRegistry;

/// Section holding the server settings of a deployment file.
pub const SERVER_SECTION: &str = "server:main";

/// A parsed application URI: `config:<path>[#<name>]`, or a bare path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppUri {
    /// The deployment file.
    pub path: PathBuf,
    /// The application inside it; `main` when absent.
    pub name: Option<String>,
}

impl AppUri {
    /// Parses an application URI.
    ///
    /// ```
    /// use trellis::AppUri;
    ///
    /// let uri = AppUri::parse("config:deploy/app.ini#api").unwrap();
    /// assert_eq!(uri.path.to_str(), Some("deploy/app.ini"));
    /// assert_eq!(uri.name.as_deref(), Some("api"));
    ///
    /// assert_eq!(AppUri::parse("app.ini").unwrap().name, None);
    /// assert!(AppUri::parse("egg:trellis").is_err());
    /// ```
    pub fn parse(uri: &str) -> Result<Self, DeployError> {
        let trimmed = uri.trim();
        let rest = match trimmed.split_once(':') {
            Some(("config", rest)) => rest,
            Some((scheme, _)) if !scheme.is_empty() && !scheme.contains(['/', '\\', '.']) && scheme.len() > 1 => {
                return Err(DeployError::InvalidUri {
                    uri: uri.to_string(),
                    reason: format!("unsupported scheme '{scheme}'"),
                })
            }
            _ => trimmed,
        };
        let (path, name) = match rest.split_once('#') {
            Some((path, name)) => (path, Some(name.trim().to_string()).filter(|n| !n.is_empty())),
            None => (rest, None),
        };
        if path.trim().is_empty() {
            return Err(DeployError::InvalidUri {
                uri: uri.to_string(),
                reason: "no file given".to_string(),
            });
        }
        Ok(Self {
            path: PathBuf::from(path.trim().replace('\\', "/")),
            name,
        })
    }
}

/// A loaded deployment file and the factories its sections refer to.
#[derive(Debug, Clone)]
pub struct Deployment {
    loader: ConfigLoader,
    name: Option<String>,
    factories: Arc<FactoryRegistry>,
}

impl Deployment {
    /// Loads the file named by `uri`.
    pub fn load(uri: &str, factories: Arc<FactoryRegistry>) -> Result<Self, DeployError> {
        let uri = AppUri::parse(uri)?;
        let loader = ConfigLoader::from_file(&uri.path)?;
        Ok(Self::from_loader(loader, uri.name, factories))
    }

    /// Uses deployment text as if read from `path`.
    pub fn parse(
        text: &str,
        path: impl Into<PathBuf>,
        name: Option<&str>,
        factories: Arc<FactoryRegistry>,
    ) -> Result<Self, DeployError> {
        let loader = ConfigLoader::parse(text, path)?;
        Ok(Self::from_loader(loader, name.map(ToString::to_string), factories))
    }

    fn from_loader(loader: ConfigLoader, name: Option<String>, factories: Arc<FactoryRegistry>) -> Self {
        let loader = loader.with_provided(factories.provided().map(ToString::to_string));
        Self {
            loader,
            name,
            factories,
        }
    }

    /// Path of the deployment file.
    pub fn path(&self) -> &Path {
        self.loader.path()
    }

    /// The factories used to build applications.
    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    /// Resolves and assembles the application.
    pub fn build(&self) -> Result<Arc<dyn Application>, DeployError> {
        let ctx = self
            .loader
            .get_context(ObjectType::App, self.name.as_deref(), None)?;
        info!(
            file = %self.path().display(),
            section = %ctx.section,
            kind = %ctx.object_type,
            "assembling application"
        );
        assemble(&ctx, &self.factories)
    }

    /// Re-reads the file from disk, keeping the application name and factories.
    pub fn reload(&self) -> Result<Self, DeployError> {
        let loader = ConfigLoader::from_file(self.path())?;
        Ok(Self::from_loader(loader, self.name.clone(), Arc::clone(&self.factories)))
    }

    /// Server settings from the `[server:main]` section, or the defaults.
    pub fn server_config(&self) -> Result<ServerConfig, DeployError> {
        let document = self.loader.document();
        if !document.has_section(SERVER_SECTION) {
            return Ok(ServerConfig::default());
        }
        let settings = document
            .own_options(SERVER_SECTION)?
            .into_iter()
            .map(|key| Ok((key.to_string(), document.get(SERVER_SECTION, key)?)))
            .collect::<Result<Settings, ConfigError>>()?;
        Ok(ServerConfig::from_settings(&settings)?)
    }
}

/// Loads the application named by `uri` with the built-in factories.
///
/// ```rust,ignore
/// let app = trellis::loadapp("config:deploy/app.ini#main")?;
/// ```
pub fn loadapp(uri: &str) -> Result<Arc<dyn Application>, DeployError> {
    loadapp_with(uri, FactoryRegistry::new())
}

/// Loads the application named by `uri` with the given factories.
pub fn loadapp_with(uri: &str, factories: FactoryRegistry) -> Result<Arc<dyn Application>, DeployError> {
    Deployment::load(uri, Arc::new(factories))?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_uri_forms() {
        let uri = AppUri::parse("config:/etc/app.ini").unwrap();
        assert_eq!(uri.path, PathBuf::from("/etc/app.ini"));
        assert_eq!(uri.name, None);

        let uri = AppUri::parse("config:app.ini#").unwrap();
        assert_eq!(uri.name, None);

        let uri = AppUri::parse(r"C:\deploy\app.ini#api").unwrap();
        assert_eq!(uri.path, PathBuf::from("C:/deploy/app.ini"));
        assert_eq!(uri.name.as_deref(), Some("api"));

        assert!(AppUri::parse("config:").is_err());
        assert!(AppUri::parse("config:#main").is_err());
    }

    #[test]
    fn test_server_section() {
        let text = "\
[server:main]
host = 127.0.0.1
port = 9100
request_timeout = 3

[app:main]
shell = default
";
        let deployment =
            Deployment::parse(text, "/srv/app.ini", None, Arc::new(FactoryRegistry::new())).unwrap();
        let config = deployment.server_config().unwrap();
        assert_eq!(config.http_addr(), "127.0.0.1:9100");
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_missing_server_section_uses_defaults() {
        let deployment = Deployment::parse(
            "[app:main]\nshell = default\n",
            "/srv/app.ini",
            None,
            Arc::new(FactoryRegistry::new()),
        )
        .unwrap();
        assert_eq!(
            deployment.server_config().unwrap().http_addr(),
            trellis_server::DEFAULT_HTTP_ADDR
        );
    }

    #[test]
    fn test_require_uses_provided_names() {
        let text = "[app:main]\nshell = default\nrequire = users-db\n";

        let deployment =
            Deployment::parse(text, "/srv/app.ini", None, Arc::new(FactoryRegistry::new())).unwrap();
        assert!(matches!(
            deployment.build(),
            Err(DeployError::Config(ConfigError::DependencyUnavailable { .. }))
        ));

        let mut factories = FactoryRegistry::new();
        factories.provide("users-db");
        let deployment = Deployment::parse(text, "/srv/app.ini", None, Arc::new(factories)).unwrap();
        assert!(deployment.build().is_ok());
    }
}
