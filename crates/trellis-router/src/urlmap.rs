//! Mount-point dispatch with content negotiation.
//!
//! A [`UrlMap`] owns the applications mounted under URL prefixes and picks
//! one per request. The response media type and the mount are negotiated
//! independently:
//!
//! | source                               | media type | mount              |
//! |--------------------------------------|------------|--------------------|
//! | path suffix `/servers/detail.json`   | yes        |                    |
//! | path prefix `/v1.1/servers`          |            | yes, prefix strip  |
//! | `Content-Type: ...; version=1.1`     |            | `/v1.1`, no strip  |
//! | `Accept: ...; q=0.8; version=1.1`    | yes        | `/v1.1`, no strip  |
//! | longest matching prefix, incl. root  |            | yes, prefix strip  |
//!
//! Earlier rows win. Query string parameters are added to the request
//! keyword arguments, the first value of a repeated key winning.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::header::{ACCEPT, HOST};
use http::HeaderMap;
use serde_json::Value;
use tracing::debug;
use trellis_core::{Application, BoxFuture, RequestContext, ResponseContext, TrellisError};

use crate::error::RouterError;
use crate::marshal::apply_content_type;

/// Response media types selectable by path suffix or `Accept`.
pub const SUPPORTED_CONTENT_TYPES: [&str; 2] = ["application/json", "application/xml"];

/// Additionally selectable for the index path of a mount.
pub const ATOM_XML: &str = "application/atom+xml";

/// A parsed mount expression: an optional domain and a URL prefix.
///
/// Accepted forms are `/path`, `domain example.com /path` and
/// `http://example.com/path`. Trailing slashes are dropped, so `/` mounts at
/// the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPath {
    domain: Option<String>,
    url: String,
}

impl MountPath {
    /// Returns the domain the mount is limited to.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Returns the URL prefix; empty for the root.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn normalize(path: &str) -> String {
        let mut url = String::with_capacity(path.len());
        for c in path.chars() {
            if c == '/' && url.ends_with('/') {
                continue;
            }
            url.push(c);
        }
        url.trim_end_matches('/').to_string()
    }
}

impl FromStr for MountPath {
    type Err = RouterError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| RouterError::InvalidMount {
            path: expr.to_string(),
            message: message.to_string(),
        };
        let expr_trimmed = expr.trim();

        if expr_trimmed.starts_with("http://") || expr_trimmed.starts_with("https://") {
            let parsed = url::Url::parse(expr_trimmed).map_err(|e| invalid(&e.to_string()))?;
            let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
            let domain = match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            return Ok(Self {
                domain: Some(domain.to_ascii_lowercase()),
                url: Self::normalize(parsed.path()),
            });
        }

        let tokens: Vec<&str> = expr_trimmed.split_whitespace().collect();
        match tokens.as_slice() {
            [path] if path.starts_with('/') => Ok(Self {
                domain: None,
                url: Self::normalize(path),
            }),
            ["domain", host] => Ok(Self {
                domain: Some(host.to_ascii_lowercase()),
                url: String::new(),
            }),
            ["domain", host, path] if path.starts_with('/') => Ok(Self {
                domain: Some(host.to_ascii_lowercase()),
                url: Self::normalize(path),
            }),
            _ => Err(invalid("expected '/path', 'domain <host> [/path]' or a URL")),
        }
    }
}

impl fmt::Display for MountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => {
                let url = if self.url.is_empty() { "/" } else { self.url.as_str() };
                write!(f, "domain {domain} {url}")
            }
            None if self.url.is_empty() => f.write_str("/"),
            None => f.write_str(&self.url),
        }
    }
}

struct Mount {
    path: MountPath,
    app: Arc<dyn Application>,
}

/// The mount chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountChoice {
    index: usize,
    /// The prefix moved onto the script name.
    pub app_url: String,
    /// Whether the prefix is also removed from the path.
    pub strip: bool,
}

/// Outcome of negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    /// The response media type, if any strategy chose one.
    pub mime: Option<String>,
    /// The mount, if any strategy found one.
    pub mount: Option<MountChoice>,
}

/// Request facts used for negotiation.
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
    /// Host without port, lowercased.
    pub host: &'a str,
    /// Port, `80` when the `Host` header has none.
    pub port: &'a str,
    /// The request path below the map.
    pub path: &'a str,
    /// The raw `Content-Type` header.
    pub content_type: Option<&'a str>,
    /// The raw `Accept` header.
    pub accept: Option<&'a str>,
}

/// Applications mounted under URL prefixes.
#[derive(Default)]
pub struct UrlMap {
    mounts: Vec<Mount>,
    not_found_app: Option<Arc<dyn Application>>,
}

impl fmt::Debug for UrlMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mounts: Vec<String> = self.mounts.iter().map(|m| m.path.to_string()).collect();
        f.debug_struct("UrlMap")
            .field("mounts", &mounts)
            .field("not_found_app", &self.not_found_app.is_some())
            .finish()
    }
}

impl UrlMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application answering requests no mount matches.
    #[must_use]
    pub fn with_not_found(mut self, app: Arc<dyn Application>) -> Self {
        self.not_found_app = Some(app);
        self
    }

    /// Mounts `app` at the path expression `expr`, replacing any application
    /// already mounted there.
    pub fn mount(&mut self, expr: &str, app: Arc<dyn Application>) -> Result<&mut Self, RouterError> {
        let path: MountPath = expr.parse()?;
        self.mounts.retain(|m| m.path != path);
        self.mounts.push(Mount { path, app });
        // Longest prefix first; domain-bound mounts before unbound ones.
        self.mounts.sort_by(|a, b| {
            b.path
                .url
                .len()
                .cmp(&a.path.url.len())
                .then_with(|| b.path.domain.is_some().cmp(&a.path.domain.is_some()))
        });
        Ok(self)
    }

    /// Iterates over the mounts in match order.
    pub fn mounts(&self) -> impl Iterator<Item = &MountPath> {
        self.mounts.iter().map(|m| &m.path)
    }

    /// Returns the number of mounts.
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Returns true if nothing is mounted.
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    fn find(&self, host: &str, port: &str, path: &str) -> Option<(usize, &str)> {
        self.mounts.iter().enumerate().find_map(|(index, mount)| {
            if let Some(domain) = &mount.path.domain {
                if domain != host && *domain != format!("{host}:{port}") {
                    return None;
                }
            }
            let url = mount.path.url.as_str();
            let matches = path == url
                || path
                    .strip_prefix(url)
                    .is_some_and(|rest| rest.starts_with('/'));
            matches.then_some((index, url))
        })
    }

    fn choice(&self, facts: &RequestFacts<'_>, path: &str, strip: bool) -> Option<MountChoice> {
        self.find(facts.host, facts.port, path)
            .map(|(index, url)| MountChoice {
                index,
                app_url: url.to_string(),
                strip,
            })
    }

    /// Picks the response media type and the mount for a request.
    pub fn negotiate(&self, facts: &RequestFacts<'_>) -> Negotiation {
        let path = facts.path;
        let mut supported: Vec<&str> = SUPPORTED_CONTENT_TYPES.to_vec();

        // Path suffix and non-root prefix.
        let mut mime = path.rsplit_once('.').and_then(|(_, ext)| {
            let candidate = format!("application/{ext}");
            SUPPORTED_CONTENT_TYPES
                .contains(&candidate.as_str())
                .then_some(candidate)
        });
        let mut mount = self
            .choice(facts, path, true)
            .filter(|choice| !choice.app_url.is_empty());

        let app_url = mount.as_ref().map(|c| c.app_url.as_str());
        if path == "/" || app_url.is_some_and(|url| path == format!("{url}/")) {
            supported.push(ATOM_XML);
        }

        if mount.is_none() {
            if let Some(version) = facts.content_type.and_then(content_type_version) {
                mount = self.choice(facts, &format!("/v{version}"), false);
            }
        }

        if mime.is_none() || mount.is_none() {
            let (accepted, version) = best_accept(facts.accept.unwrap_or(""), &supported);
            if mime.is_none() {
                mime = accepted;
            }
            if mount.is_none() {
                if let Some(version) = version {
                    mount = self.choice(facts, &format!("/v{version}"), false);
                }
            }
        }

        if mount.is_none() {
            mount = self.choice(facts, path, true);
        }

        Negotiation { mime, mount }
    }

    async fn route(&self, ctx: &mut RequestContext) -> ResponseContext {
        let (host, port) = split_host(ctx.headers());
        let path = ctx.path_info().to_string();
        let negotiation = self.negotiate(&RequestFacts {
            host: &host,
            port: &port,
            path: &path,
            content_type: ctx.content_type(),
            accept: ctx.header(ACCEPT),
        });

        let Some(choice) = negotiation.mount else {
            debug!(path = %path, host = %host, "no mount matched");
            return match &self.not_found_app {
                Some(app) => app.call(ctx).await,
                None => {
                    let mut response = ResponseContext::from_error(
                        &TrellisError::not_found("Not Found"),
                        HeaderMap::new(),
                    );
                    apply_content_type(&mut response, "");
                    response
                }
            };
        };

        debug!(
            path = %path,
            mount = %choice.app_url,
            mime = ?negotiation.mime,
            "mount selected"
        );
        ctx.set_best_content_type(negotiation.mime);
        if let Some(query) = ctx.query_string().map(ToString::to_string) {
            let kwargs = ctx.kwargs_mut();
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                kwargs
                    .entry(key.into_owned())
                    .or_insert_with(|| Value::String(value.into_owned()));
            }
        }
        ctx.mount(&choice.app_url, choice.strip);

        let app = Arc::clone(&self.mounts[choice.index].app);
        let mut response = app.call(ctx).await;
        apply_content_type(&mut response, &path);
        response
    }
}

impl Application for UrlMap {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ResponseContext> {
        Box::pin(self.route(ctx))
    }
}

fn split_host(headers: &HeaderMap) -> (String, String) {
    let raw = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_ascii_lowercase();
    match raw.split_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (raw.clone(), "80".to_string()),
    }
}

fn content_type_version(header: &str) -> Option<String> {
    let mime: mime::Mime = header.parse().ok()?;
    mime.get_param("version").map(|v| v.as_str().to_string())
}

/// Picks the supported media type the `Accept` header rates highest.
///
/// Ties go to the more specific accept entry, then to the earlier supported
/// type. Returns the `version` parameter of the winning entry as well.
fn best_accept(header: &str, supported: &[&str]) -> (Option<String>, Option<String>) {
    let entries: Vec<(mime::Mime, f32)> = header
        .split(',')
        .filter_map(|item| item.trim().parse::<mime::Mime>().ok())
        .map(|m| {
            let q = m
                .get_param("q")
                .and_then(|q| q.as_str().parse::<f32>().ok())
                .unwrap_or(1.0);
            (m, q)
        })
        .filter(|(_, q)| *q > 0.0)
        .collect();

    let mut best: Option<(f32, u8, &str, &mime::Mime)> = None;
    for &candidate in supported {
        let Ok(server) = candidate.parse::<mime::Mime>() else {
            continue;
        };
        for (client, q) in &entries {
            let specificity = if client.type_() == mime::STAR {
                0
            } else if client.type_() != server.type_() {
                continue;
            } else if client.subtype() == mime::STAR {
                1
            } else if client.subtype() == server.subtype() {
                2
            } else {
                continue;
            };
            let better = best.map_or(true, |(bq, bs, _, _)| {
                *q > bq || ((*q - bq).abs() < f32::EPSILON && specificity > bs)
            });
            if better {
                best = Some((*q, specificity, candidate, client));
            }
        }
    }

    match best {
        Some((_, _, chosen, client)) => (
            Some(chosen.to_string()),
            client.get_param("version").map(|v| v.as_str().to_string()),
        ),
        None => (None, None),
    }
}
