#![forbid(unsafe_code)]

//! `remote-runner`: command session runner server binary.
//!
//! Loads configuration, then serves the run, stop, and list endpoints
//! until ctrl-c or `SIGTERM`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use remote_runner::config::GlobalConfig;
use remote_runner::http::{self, AppState};
use remote_runner::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "remote-runner", about = "Run shell commands and stream their output over HTTP", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project root commands run in; overrides the config file.
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// HTTP port; overrides the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("remote-runner bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = Arc::new(load_config(&args)?);
    info!(
        project_root = %config.project_root.display(),
        shell = %config.shell,
        "configuration loaded"
    );

    let ct = CancellationToken::new();
    let state = Arc::new(AppState::new(Arc::clone(&config), ct.clone()));

    let server_ct = ct.clone();
    let server_state = Arc::clone(&state);
    let server_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(server_state, server_ct.clone()).await {
            error!(%err, "http server failed");
            server_ct.cancel();
        }
    });

    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = ct.cancelled() => {}
    }
    ct.cancel();

    let killed = state.runner.kill_all();
    if killed > 0 {
        info!(killed, "killed running commands on exit");
    }

    let _ = server_handle.await;
    info!("remote-runner shut down");
    Ok(())
}

/// Resolve configuration from the optional file plus CLI overrides.
fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match (&args.config, &args.project_root) {
        (Some(path), _) => GlobalConfig::load_from_path(path)?,
        (None, Some(root)) => GlobalConfig::for_project_root(root)?,
        (None, None) => {
            let cwd = std::env::current_dir()
                .map_err(|err| AppError::Config(format!("cannot resolve working dir: {err}")))?;
            GlobalConfig::for_project_root(cwd)?
        }
    };

    if let (Some(_), Some(root)) = (&args.config, &args.project_root) {
        config.set_project_root(root)?;
    }
    if let Some(port) = args.port {
        config.http_port = port;
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
