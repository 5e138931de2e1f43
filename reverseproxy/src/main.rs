//! reverseproxy: HTTP Reverse Proxy Server
//!
//! Loads the routing configuration once, serves until the listener stops,
//! then releases everything registered on the resource scope.

use clap::Parser;
use reverseproxy::cli::Opt;
use reverseproxy::{lifecycle, ResourceScope};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let opt = Opt::parse();

    // Created before any fallible step; dropping it runs the cleanup
    // actions, also when unwinding from a panic
    let scope = ResourceScope::new();

    let code = lifecycle::run(opt.command, &scope).await;
    drop(scope);
    code
}
