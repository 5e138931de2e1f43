//! Command line interface

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::proxy::UnknownHostPolicy;

const DEFAULT_LOG_PATH: &str = "/var/log/reverseproxy/reverseproxy.log";

#[derive(Parser, Debug)]
#[clap(author, version, about, arg_required_else_help = true)]
pub struct Opt {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Route by Host header and terminate TLS
    MultiHost(MultiHostArgs),

    /// Forward every request to one backend over plain HTTP
    SingleHost(SingleHostArgs),
}

impl Command {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            Command::MultiHost(args) => &args.config_path,
            Command::SingleHost(args) => &args.config_path,
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        match self {
            Command::MultiHost(args) => &args.log_path,
            Command::SingleHost(args) => &args.log_path,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct MultiHostArgs {
    /// Reverse proxy config file
    #[clap(long = "config_path", default_value = "/etc/reverseproxy/conf.d/default.ini")]
    pub config_path: PathBuf,

    /// Reverse proxy run log file
    #[clap(long = "log_path", default_value = DEFAULT_LOG_PATH)]
    pub log_path: PathBuf,

    /// Bind address
    #[clap(long, default_value = "0.0.0.0:443")]
    pub listen: SocketAddr,

    /// TLS certificate file (PEM)
    #[clap(long = "tls_cert", default_value = "/etc/reverseproxy/cert/server.crt")]
    pub tls_cert: PathBuf,

    /// TLS private key file (PEM)
    #[clap(long = "tls_key", default_value = "/etc/reverseproxy/cert/server.key")]
    pub tls_key: PathBuf,

    /// How to answer requests for hosts without a config section
    #[clap(long = "unknown_host", value_enum, default_value_t = UnknownHostPolicy::PassThrough)]
    pub unknown_host: UnknownHostPolicy,
}

#[derive(Args, Debug, Clone)]
pub struct SingleHostArgs {
    /// Reverse proxy config file
    #[clap(long = "config_path", default_value = "./conf/default.ini")]
    pub config_path: PathBuf,

    /// Reverse proxy run log file
    #[clap(long = "log_path", default_value = DEFAULT_LOG_PATH)]
    pub log_path: PathBuf,

    /// Bind address
    #[clap(long, default_value = "0.0.0.0:8030")]
    pub listen: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_host_defaults() {
        let opt = Opt::try_parse_from(["reverseproxy", "multi-host"]).unwrap();
        let Command::MultiHost(args) = opt.command else {
            panic!("expected multi-host");
        };
        assert_eq!(args.config_path, PathBuf::from("/etc/reverseproxy/conf.d/default.ini"));
        assert_eq!(args.log_path, PathBuf::from(DEFAULT_LOG_PATH));
        assert_eq!(args.listen.port(), 443);
        assert_eq!(args.unknown_host, UnknownHostPolicy::PassThrough);
    }

    #[test]
    fn test_single_host_flags() {
        let opt = Opt::try_parse_from([
            "reverseproxy",
            "single-host",
            "--config_path",
            "/tmp/proxy.ini",
            "--log_path",
            "/tmp/proxy.log",
        ])
        .unwrap();

        assert_eq!(opt.command.config_path(), &PathBuf::from("/tmp/proxy.ini"));
        assert_eq!(opt.command.log_path(), &PathBuf::from("/tmp/proxy.log"));
        let Command::SingleHost(args) = opt.command else {
            panic!("expected single-host");
        };
        assert_eq!(args.listen.port(), 8030);
    }

    #[test]
    fn test_unknown_host_policy_flag() {
        let opt = Opt::try_parse_from(["reverseproxy", "multi-host", "--unknown_host", "reject"])
            .unwrap();
        let Command::MultiHost(args) = opt.command else {
            panic!("expected multi-host");
        };
        assert_eq!(args.unknown_host, UnknownHostPolicy::Reject);
    }
}
