//! reverseproxy: static host-routed HTTP reverse proxy
//!
//! Forwards inbound requests to backend services chosen from an INI file
//! loaded once at startup.
//!
//! # Modes
//!
//! - **multi-host**: terminates TLS and picks the backend from the request's
//!   Host header. The whole original request-target is forwarded as the
//!   query string, so `GET /v1/items?x=1` for `Host: api` reaches
//!   `http://10.0.0.5:8080/v1/items?/v1/items?x=1`.
//! - **single-host**: plain HTTP, every request goes to `default_host` with
//!   its path and query preserved.
//!
//! # Example Configuration
//!
//! ```ini
//! ; single-host mode
//! default_host = http://10.0.0.9:9090
//!
//! ; multi-host mode, one section per Host header value
//! [api]
//! host = 10.0.0.5:8080
//!
//! [www.example.com]
//! host = 10.0.0.6:80
//! ```

pub mod cli;
pub mod config;
pub mod director;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod proxy;
pub mod router;
pub mod scope;
pub mod tls;

pub use config::ConfigSnapshot;
pub use director::{Director, MultiHostDirector, SingleHostDirector, Target};
pub use error::{ProxyError, Result};
pub use proxy::{ProxyServer, UnknownHostPolicy};
pub use router::{HostTable, SingleTarget};
pub use scope::ResourceScope;
