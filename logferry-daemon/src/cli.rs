//! CLI argument definitions for logferry-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Every option can also be supplied through the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// logferry pipeline daemon.
///
/// Assembles one pipeline from a definition file and runs it until
/// SIGTERM or SIGINT, then drains in-flight events before exiting.
#[derive(Parser, Debug)]
#[command(name = "logferry-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the pipeline definition (JSON or YAML).
    ///
    /// When omitted, `config.json`, `config.yml` and `config.yaml` are
    /// searched in the working directory, in that order.
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9100).
    #[arg(long, env = "METRICS_LISTEN")]
    pub metrics_listen: Option<SocketAddr>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Assemble the pipeline and exit without starting it.
    #[arg(long)]
    pub validate: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Machine-parseable JSON lines
    Json,
    /// Human-readable multi-line output
    Pretty,
}
