//! HTTP Reverse Proxy Server
//!
//! Every inbound request goes through the installed [`Director`], then is
//! relayed to the rewritten destination with a pooled HTTP/1.1 client.
//! Upstream failures become `502 Bad Gateway` and are logged.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Version},
    response::{IntoResponse, Response},
    Router,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls::ClientConfig;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::director::{Director, Target};
use crate::error::{ProxyError, Result};
use crate::tls;

/// HTTP client type for forwarding requests to `http` and `https` backends
type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Pause after an accept error that is not tied to a single connection
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Hop-by-hop headers, never forwarded in either direction
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// What to do with a request whose Host header has no route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UnknownHostPolicy {
    /// Forward with an empty destination; the request fails as 502
    #[default]
    PassThrough,
    /// Answer 421 Misdirected Request without contacting any backend
    Reject,
}

/// Source of inbound TCP connections for the TLS accept loop
trait Accept: Send + Sync {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Shared proxy state
pub struct ProxyState {
    /// Request director
    pub director: Arc<dyn Director>,
    /// HTTP client for forwarding
    pub client: HttpClient,
    /// Unknown host handling
    pub policy: UnknownHostPolicy,
}

/// Proxy server
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new proxy server around a director. `https` backends are
    /// verified against the platform's root certificates.
    pub fn new(director: Arc<dyn Director>, policy: UnknownHostPolicy) -> Result<Self> {
        let backend_tls = tls::client_config(tls::native_roots())?;
        Ok(Self::with_backend_tls(director, policy, backend_tls))
    }

    /// Create a proxy server that reaches `https` backends with `backend_tls`
    pub fn with_backend_tls(
        director: Arc<dyn Director>,
        policy: UnknownHostPolicy,
        backend_tls: ClientConfig,
    ) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(backend_tls)
            .https_or_http()
            .enable_http1()
            .build();

        let client: HttpClient = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(connector);

        Self {
            state: Arc::new(ProxyState {
                director,
                client,
                policy,
            }),
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve plain HTTP until the listener fails or `shutdown` resolves.
    ///
    /// After `shutdown` resolves no new connections are accepted and
    /// in-flight requests are drained.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting HTTP server on {}", listener.local_addr()?);

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    /// Serve HTTPS until `shutdown` resolves.
    ///
    /// Failed handshakes and accept errors are logged and the loop keeps
    /// accepting; errors such as fd exhaustion pause accepting briefly.
    pub async fn serve_tls<F>(
        &self,
        listener: TcpListener,
        tls_acceptor: TlsAcceptor,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.accept_loop(listener, tls_acceptor, shutdown).await
    }

    async fn accept_loop<L, F>(&self, listener: L, tls_acceptor: TlsAcceptor, shutdown: F) -> Result<()>
    where
        L: Accept,
        F: Future<Output = ()> + Send + 'static,
    {
        use hyper::service::service_fn;
        use tower::ServiceExt;

        info!("Starting HTTPS server on {}", listener.local_addr()?);

        let router = self.router();
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = &mut shutdown => break,
            };

            let (stream, addr) = match accepted {
                Ok(conn) => conn,
                Err(e) if is_connection_error(&e) => {
                    debug!("Connection dropped before accept: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Accept error: {}, retrying in {:?}", e, ACCEPT_BACKOFF);
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        _ = &mut shutdown => break,
                    }
                }
            };
            let acceptor = tls_acceptor.clone();
            let router = router.clone();

            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        let io = hyper_util::rt::TokioIo::new(tls_stream);

                        let service = service_fn(move |mut req: Request<hyper::body::Incoming>| {
                            req.extensions_mut().insert(ConnectInfo(addr));
                            router.clone().oneshot(req)
                        });

                        if let Err(e) =
                            hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                                .serve_connection(io, service)
                                .await
                        {
                            error!("Error serving connection from {}: {}", addr, e);
                        }
                    }
                    Err(e) => {
                        error!("TLS handshake failed from {}: {}", addr, e);
                    }
                }
            });
        }

        info!("HTTPS server stopped accepting connections");
        Ok(())
    }
}

/// Errors that concern one pending connection, not the listener
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Main proxy handler - directs the request and forwards it
async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let mut target = Target::from_parts(&parts);
    state.director.direct(&mut target);

    if target.host.is_empty() && state.policy == UnknownHostPolicy::Reject {
        warn!(host = %target.host_header(), "No route for host, rejecting");
        return (StatusCode::MISDIRECTED_REQUEST, "Misdirected Request").into_response();
    }

    let uri = match target.to_uri() {
        Ok(uri) => uri,
        Err(e) => {
            error!(
                host = %target.host_header(),
                request_uri = %target.request_uri(),
                "Cannot forward request: {}", e
            );
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    debug!("Forwarding {} {} to {}", parts.method, target.request_uri(), uri);

    // HTTP/2 requests carry the host only in the URI
    if !parts.headers.contains_key(header::HOST) && !target.host_header().is_empty() {
        if let Ok(host) = HeaderValue::from_str(target.host_header()) {
            parts.headers.insert(header::HOST, host);
        }
    }

    parts.uri = uri;
    parts.version = Version::HTTP_11;
    remove_hop_by_hop_headers(&mut parts.headers);
    if let Some(ConnectInfo(addr)) = peer {
        append_forwarded_for(&mut parts.headers, addr.ip());
    }

    let forward_req = Request::from_parts(parts, body);

    match state.client.request(forward_req).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            remove_hop_by_hop_headers(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            let e = ProxyError::Upstream(e.to_string());
            error!(host = %target.host, "Backend error: {}", e);
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For`
fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ip),
        _ => ip.to_string(),
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}
