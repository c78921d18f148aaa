//! Daemon runner -- definition lookup, pipeline lifecycle and shutdown.
//!
//! # Lifecycle
//!
//! 1. Resolve the definition path (`--config` or the default search list)
//! 2. Assemble the pipeline with the built-in plugins
//! 3. Start it and wait for a shutdown signal or for the pipeline to stop
//! 4. Cancel, drain in-flight events and join every task

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use logferry_pipeline::{Pipeline, PipelineState, default_registry};

/// Definition files searched when `--config` is not given, in order.
pub const DEFAULT_CONFIG_FILES: [&str; 3] = ["config.json", "config.yml", "config.yaml"];

/// Resolve the definition path.
///
/// An explicit path is used as-is; otherwise the first existing entry of
/// [`DEFAULT_CONFIG_FILES`] under `dir` is returned.
pub fn resolve_config_path(explicit: Option<PathBuf>, dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no pipeline definition found in {} (tried {})",
                dir.display(),
                DEFAULT_CONFIG_FILES.join(", ")
            )
        })
}

/// An assembled pipeline plus where it came from.
pub struct Daemon {
    pipeline: Pipeline,
    config_path: PathBuf,
}

impl Daemon {
    /// Load the definition and assemble the pipeline.
    ///
    /// Nothing is opened or connected yet; this is all `--validate` does.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let registry = default_registry();
        let pipeline = Pipeline::load(config_path, &registry).await.map_err(|e| {
            anyhow::anyhow!("failed to assemble pipeline from {}: {}", config_path.display(), e)
        })?;

        tracing::info!(
            config = %config_path.display(),
            inputs = pipeline.definition().input.len(),
            filters = pipeline.definition().filter.len(),
            outputs = pipeline.definition().output.len(),
            "pipeline definition loaded"
        );

        Ok(Self {
            pipeline,
            config_path: config_path.to_path_buf(),
        })
    }

    /// Path of the loaded definition.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Run the pipeline until `shutdown` resolves or the pipeline stops on its own.
    ///
    /// `shutdown` yields the name of the signal that triggered the stop.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        self.pipeline
            .start(cancel.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to start pipeline: {}", e))?;
        tracing::info!("logferry-daemon running");

        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    signal = shutdown => {
                        match signal {
                            Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
                            Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
                        }
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            }
        });

        let result = self.pipeline.join().await;
        cancel.cancel();
        if let Err(e) = watcher.await {
            tracing::error!(error = %e, "shutdown watcher panicked");
        }

        match result {
            Ok(()) => {
                tracing::info!("logferry-daemon shut down");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("pipeline stopped with error: {}", e)),
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
