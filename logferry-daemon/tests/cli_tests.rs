//! CLI parsing tests, including environment fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use logferry_daemon::cli::{DaemonCli, LogFormat};
use serial_test::serial;

fn clear_env() {
    // SAFETY: Tests touching these variables are serialized
    unsafe {
        std::env::remove_var("CONFIG");
        std::env::remove_var("DEBUG");
        std::env::remove_var("METRICS_LISTEN");
    }
}

#[test]
#[serial]
fn test_defaults() {
    clear_env();
    let cli = DaemonCli::try_parse_from(["logferry-daemon"]).unwrap();
    assert!(cli.config.is_none());
    assert!(!cli.debug);
    assert!(cli.metrics_listen.is_none());
    assert_eq!(cli.log_format, LogFormat::Json);
    assert!(!cli.validate);
}

#[test]
#[serial]
fn test_flags() {
    clear_env();
    let cli = DaemonCli::try_parse_from([
        "logferry-daemon",
        "-c",
        "/etc/logferry/pipeline.yml",
        "--debug",
        "--metrics-listen",
        "127.0.0.1:9100",
        "--log-format",
        "pretty",
        "--validate",
    ])
    .unwrap();

    assert_eq!(cli.config, Some(PathBuf::from("/etc/logferry/pipeline.yml")));
    assert!(cli.debug);
    assert_eq!(cli.metrics_listen, Some("127.0.0.1:9100".parse::<SocketAddr>().unwrap()));
    assert_eq!(cli.log_format, LogFormat::Pretty);
    assert!(cli.validate);
}

#[test]
#[serial]
fn test_environment_fallbacks() {
    clear_env();
    // SAFETY: Test isolation
    unsafe {
        std::env::set_var("CONFIG", "/tmp/from-env.json");
        std::env::set_var("DEBUG", "true");
        std::env::set_var("METRICS_LISTEN", "127.0.0.1:9200");
    }

    let cli = DaemonCli::try_parse_from(["logferry-daemon"]).unwrap();
    clear_env();

    assert_eq!(cli.config, Some(PathBuf::from("/tmp/from-env.json")));
    assert!(cli.debug);
    assert_eq!(cli.metrics_listen, Some("127.0.0.1:9200".parse::<SocketAddr>().unwrap()));
}

#[test]
#[serial]
fn test_rejects_unknown_log_format() {
    clear_env();
    assert!(DaemonCli::try_parse_from(["logferry-daemon", "--log-format", "xml"]).is_err());
}

#[test]
#[serial]
fn test_rejects_invalid_metrics_address() {
    clear_env();
    assert!(DaemonCli::try_parse_from(["logferry-daemon", "--metrics-listen", "not-an-addr"]).is_err());
}
