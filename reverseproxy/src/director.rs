//! Request directors
//!
//! A director rewrites the destination of an inbound request in place. It is
//! called once per request, concurrently from every connection task, so
//! implementations only read data fixed at construction time.

use axum::http::{header, request::Parts, Uri};

use crate::error::{ProxyError, Result};
use crate::router::{HostTable, SingleTarget};

/// Rewritable view of an inbound request's destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host_header: String,
    request_uri: String,
    /// Destination scheme
    pub scheme: String,
    /// Destination host, `host[:port]`
    pub host: String,
    /// Destination path
    pub path: String,
    /// Destination query string, without the leading `?`
    pub raw_query: Option<String>,
}

impl Target {
    /// Start from a Host header and the original request-target
    /// (path and query). The destination scheme and host start empty.
    pub fn new(host_header: impl Into<String>, request_uri: impl Into<String>) -> Self {
        let request_uri = request_uri.into();
        let (path, raw_query) = match request_uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (request_uri.clone(), None),
        };

        Self {
            host_header: host_header.into(),
            request_uri,
            scheme: String::new(),
            host: String::new(),
            path,
            raw_query,
        }
    }

    /// Build from inbound request parts. HTTP/2 requests carry the host in
    /// the URI authority instead of a Host header.
    pub fn from_parts(parts: &Parts) -> Self {
        let host_header = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or_default();

        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Self::new(host_header, request_uri)
    }

    /// Host the client asked for
    pub fn host_header(&self) -> &str {
        &self.host_header
    }

    /// Original path and query, exactly as received
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    /// Absolute URI of the rewritten destination
    pub fn to_uri(&self) -> Result<Uri> {
        if self.host.is_empty() {
            return Err(ProxyError::EmptyDestination);
        }

        let scheme = if self.scheme.is_empty() { "http" } else { &self.scheme };
        let path = if self.path.is_empty() { "/" } else { &self.path };
        let mut uri = format!("{}://{}{}", scheme, self.host, path);
        if let Some(query) = self.raw_query.as_deref().filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(query);
        }

        uri.parse::<Uri>()
            .map_err(|e| ProxyError::InvalidDestination(format!("{}: {}", uri, e)))
    }
}

/// Rewrites where a request goes. Must not block or fail.
pub trait Director: Send + Sync {
    fn direct(&self, target: &mut Target);
}

/// Routes by Host header through a static table.
///
/// The forwarded query string is the entire original request-target, so a
/// request for `/v1/items?x=1` reaches the backend as
/// `/v1/items?/v1/items?x=1`. Backends behind this proxy rebuild the
/// original URL from the query. An unknown host leaves the destination
/// host empty.
#[derive(Debug, Clone)]
pub struct MultiHostDirector {
    table: HostTable,
}

impl MultiHostDirector {
    pub fn new(table: HostTable) -> Self {
        Self { table }
    }
}

impl Director for MultiHostDirector {
    fn direct(&self, target: &mut Target) {
        target.scheme = "http".to_string();
        target.host = self
            .table
            .lookup(&target.host_header)
            .unwrap_or_default()
            .to_string();
        target.raw_query = Some(target.request_uri.clone());
    }
}

/// Sends every request to one backend, joining the backend's base path and
/// query with the request's own.
#[derive(Debug, Clone)]
pub struct SingleHostDirector {
    target: SingleTarget,
    authority: String,
}

impl SingleHostDirector {
    pub fn new(target: SingleTarget) -> Self {
        let authority = target.authority();
        Self { target, authority }
    }
}

impl Director for SingleHostDirector {
    fn direct(&self, target: &mut Target) {
        target.scheme = self.target.scheme().to_string();
        target.host = self.authority.clone();
        target.path = join_path(self.target.path(), &target.path);

        let base_query = self.target.query();
        let query = target.raw_query.take().unwrap_or_default();
        target.raw_query = match (base_query.is_empty(), query.is_empty()) {
            (true, true) => None,
            (true, false) => Some(query),
            (false, true) => Some(base_query.to_string()),
            (false, false) => Some(format!("{}&{}", base_query, query)),
        };
    }
}

/// Join two path segments with exactly one slash between them
fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}
