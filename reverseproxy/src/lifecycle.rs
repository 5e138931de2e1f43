//! Process lifecycle
//!
//! ```text
//! Init → LoggerReady → ConfigLoaded → TableBuilt → Serving → Terminated
//!   \________\______________\______________\
//!                                            → Crashed (exit status 1)
//! ```
//!
//! Configuration is read once; there is no path back from `Serving` to
//! `ConfigLoaded`. Cleanup actions live on the caller's [`ResourceScope`]
//! and run when it is dropped, after the listener has terminated.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::Location;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::cli::{Command, MultiHostArgs, SingleHostArgs};
use crate::config::ConfigSnapshot;
use crate::director::{MultiHostDirector, SingleHostDirector};
use crate::error::{ProxyError, Result};
use crate::logging::{self, LOG_PREFIX};
use crate::proxy::ProxyServer;
use crate::router::{HostTable, SingleTarget};
use crate::scope::ResourceScope;
use crate::tls::TlsManager;

/// Lifecycle stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    LoggerReady,
    ConfigLoaded,
    TableBuilt,
    Serving,
    Terminated,
    Crashed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::LoggerReady => "logger-ready",
            Stage::ConfigLoaded => "config-loaded",
            Stage::TableBuilt => "table-built",
            Stage::Serving => "serving",
            Stage::Terminated => "terminated",
            Stage::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

struct Lifecycle {
    stage: Stage,
}

impl Lifecycle {
    fn new() -> Self {
        Self { stage: Stage::Init }
    }

    fn advance(&mut self, next: Stage) {
        debug!(from = %self.stage, to = %next, "Lifecycle transition");
        self.stage = next;
    }

    /// Log a startup failure with the location of the failing call
    #[track_caller]
    fn crash(&mut self, err: impl fmt::Display) -> ExitCode {
        let caller = Location::caller();
        error!(
            stage = %self.stage,
            location = %caller,
            "Startup failed: {}", err
        );
        self.stage = Stage::Crashed;
        ExitCode::FAILURE
    }

    /// Report a failure that happened before the log file was open
    fn crash_before_logging(&mut self, err: impl fmt::Display) -> ExitCode {
        eprintln!("{}Startup failed at stage {}: {}", LOG_PREFIX, self.stage, err);
        self.stage = Stage::Crashed;
        ExitCode::FAILURE
    }

    fn terminate(&mut self, result: Result<()>) -> ExitCode {
        self.advance(Stage::Terminated);
        match result {
            Ok(()) => {
                info!("Service exit, no error");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Service exit, err is {}", e);
                ExitCode::FAILURE
            }
        }
    }
}

/// Run one deployment variant to completion
pub async fn run(command: Command, scope: &ResourceScope) -> ExitCode {
    let mut lifecycle = Lifecycle::new();

    if let Err(e) = logging::init(command.log_path(), scope) {
        return lifecycle.crash_before_logging(e);
    }
    lifecycle.advance(Stage::LoggerReady);
    info!("Starting reverseproxy v{}", env!("CARGO_PKG_VERSION"));

    let config_path = command.config_path();
    let snapshot = match ConfigSnapshot::load(config_path) {
        Ok(snapshot) => snapshot,
        Err(e) => return lifecycle.crash(e),
    };
    info!("Configuration loaded from {}", config_path.display());
    lifecycle.advance(Stage::ConfigLoaded);

    match command {
        Command::MultiHost(args) => run_multi_host(&mut lifecycle, snapshot, args).await,
        Command::SingleHost(args) => run_single_host(&mut lifecycle, snapshot, args).await,
    }
}

async fn run_multi_host(
    lifecycle: &mut Lifecycle,
    snapshot: ConfigSnapshot,
    args: MultiHostArgs,
) -> ExitCode {
    let table = match HostTable::from_snapshot(&snapshot) {
        Ok(table) => table,
        Err(e) => return lifecycle.crash(e),
    };
    drop(snapshot);

    info!("Configured hosts:");
    for (host, backend) in table.iter() {
        info!("  {} -> {}", host, backend);
    }
    lifecycle.advance(Stage::TableBuilt);

    let tls_acceptor = match TlsManager::new(&args.tls_cert, &args.tls_key).build_acceptor() {
        Ok(acceptor) => acceptor,
        Err(e) => return lifecycle.crash(e),
    };

    let director = Arc::new(MultiHostDirector::new(table));
    let server = match ProxyServer::new(director, args.unknown_host) {
        Ok(server) => server,
        Err(e) => return lifecycle.crash(e),
    };
    let listen = args.listen;

    lifecycle.advance(Stage::Serving);
    let result = serve_until_exit(async move {
        let listener = bind(listen).await?;
        server
            .serve_tls(listener, tls_acceptor, shutdown_signal())
            .await
    })
    .await;

    lifecycle.terminate(result)
}

async fn run_single_host(
    lifecycle: &mut Lifecycle,
    snapshot: ConfigSnapshot,
    args: SingleHostArgs,
) -> ExitCode {
    let target = match SingleTarget::from_snapshot(&snapshot) {
        Ok(target) => target,
        Err(e) => return lifecycle.crash(e),
    };
    drop(snapshot);

    info!("Forwarding all requests to {}", target);
    lifecycle.advance(Stage::TableBuilt);

    let director = Arc::new(SingleHostDirector::new(target));
    let server = match ProxyServer::new(director, Default::default()) {
        Ok(server) => server,
        Err(e) => return lifecycle.crash(e),
    };
    let listen = args.listen;

    lifecycle.advance(Stage::Serving);
    let result = serve_until_exit(async move {
        let listener = bind(listen).await?;
        server.serve(listener, shutdown_signal()).await
    })
    .await;

    lifecycle.terminate(result)
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ProxyError::Serve(format!("Failed to bind {}: {}", addr, e)))
}

/// Run the serving future on its own task and wait for its result.
///
/// The result travels over a oneshot channel created before the task is
/// spawned. A task that dies without sending (panic) is reported as an
/// error.
pub async fn serve_until_exit<F>(serving: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let _ = done_tx.send(serving.await);
    });

    match done_rx.await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::Serve(
            "Serving task ended without reporting a result".to_string(),
        )),
    }
}

/// Wait for SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
