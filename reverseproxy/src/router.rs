//! Routing tables for reverseproxy
//!
//! Built once from the configuration snapshot before the listener binds and
//! never mutated afterwards.

use std::collections::BTreeMap;
use url::Url;

use crate::config::ConfigSnapshot;
use crate::error::{ProxyError, Result};

/// Host identifier -> backend address (`host:port`, no scheme)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostTable {
    routes: BTreeMap<String, String>,
}

impl HostTable {
    /// Build the table from every section of the snapshot.
    ///
    /// Each section must carry a non-empty `host` key; one bad section
    /// fails the whole build.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self> {
        let mut routes = BTreeMap::new();

        for (section, pairs) in &snapshot.sections {
            let backend = pairs
                .get("host")
                .map(|h| h.trim())
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ProxyError::MissingHost {
                    section: section.clone(),
                })?;

            routes.insert(section.to_ascii_lowercase(), backend.to_string());
        }

        Ok(Self { routes })
    }

    /// Backend for an inbound host identifier (case-insensitive)
    pub fn lookup(&self, host: &str) -> Option<&str> {
        if let Some(backend) = self.routes.get(host) {
            return Some(backend);
        }
        self.routes
            .get(&host.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Iterate over (host, backend) pairs in host order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(h, b)| (h.as_str(), b.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HostTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            routes: iter
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }
}

/// The one backend of single-host mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleTarget {
    url: Url,
}

impl SingleTarget {
    /// Resolve the top-level `default_host` key
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self> {
        let raw = snapshot
            .get("default_host")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ProxyError::MissingDefaultHost)?;

        Self::parse(raw)
    }

    /// Parse a backend URL such as `http://10.0.0.9:9090` or
    /// `https://backend.internal`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| ProxyError::InvalidBackendUrl {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "unsupported scheme '{}', expected http or https",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host with the port when one is given
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Base path; empty when the URL has none beyond the root
    pub fn path(&self) -> &str {
        match self.url.path() {
            "/" => "",
            path => path,
        }
    }

    /// Base query, empty when absent
    pub fn query(&self) -> &str {
        self.url.query().unwrap_or("")
    }

}

impl std::fmt::Display for SingleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
