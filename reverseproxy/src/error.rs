//! Error types for reverseproxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A host section without a `host` key
    #[error("Section [{section}] has no `host` key")]
    MissingHost { section: String },

    /// Single-host mode without a top-level `default_host`
    #[error("Missing top-level `default_host` key")]
    MissingDefaultHost,

    /// Backend URL that cannot be used as a forwarding target
    #[error("Invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// The director left the destination host empty
    #[error("Empty destination host")]
    EmptyDestination,

    /// The rewritten destination is not a valid URI
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Backend request failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Listener or connection serving failure
    #[error("Serve error: {0}")]
    Serve(String),
}
