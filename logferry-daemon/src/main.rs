use anyhow::Result;
use clap::Parser;

use logferry_daemon::cli::DaemonCli;
use logferry_daemon::runner::{self, Daemon};
use logferry_daemon::{logging, metrics_server};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    logging::init_tracing(cli.log_format, cli.debug)?;

    tracing::info!("logferry-daemon starting");

    let cwd = std::env::current_dir()?;
    let config_path = runner::resolve_config_path(cli.config.clone(), &cwd)?;
    let daemon = Daemon::build(&config_path).await?;

    if cli.validate {
        tracing::info!(config = %config_path.display(), "configuration is valid");
        println!("configuration OK: {}", config_path.display());
        return Ok(());
    }

    if let Some(addr) = cli.metrics_listen {
        metrics_server::install_metrics_recorder(addr)?;
    }

    daemon.run(runner::wait_for_shutdown_signal()).await
}
