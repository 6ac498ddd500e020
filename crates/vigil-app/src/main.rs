//! Vigil application binary - composition root.
//!
//! 1. Parse the CLI and load configuration from TOML
//! 2. Initialize tracing (RUST_LOG wins over `general.log_level`)
//! 3. Dispatch to the subcommand; long-running modes stop on SIGINT/SIGTERM
//!
//! A storage failure in any loop exits the process non-zero.

mod cli;
mod commands;

use clap::Parser;
use tokio::sync::watch;

use cli::{CliArgs, Command};
use commands::{AppResult, Context};
use vigil_core::config::VigilConfig;

/// Flip the returned receiver to `true` on the first SIGINT or SIGTERM.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested; finishing current cycle");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn load_config(args: &CliArgs, path: &std::path::Path) -> AppResult<VigilConfig> {
    // A missing file means defaults; a broken one is an error.
    let mut config = if path.exists() {
        VigilConfig::load(path)?
    } else {
        VigilConfig::default()
    };
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();
    let config_path = args.resolve_config_path();
    let config = load_config(&args, &config_path)?;

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!(
        config = %config_path.display(),
        vault = %config.vault_path().display(),
        dry_run = config.general.dry_run,
        "Starting Vigil v{}",
        env!("CARGO_PKG_VERSION")
    );

    let child_args = args.child_args(&config_path);
    let ctx = Context::new(config_path, config, child_args);

    let result = match args.command {
        Command::Init => commands::init(&ctx),
        Command::Orchestrate => commands::orchestrate(&ctx, shutdown_signal()).await,
        Command::Watch { ref name } => commands::watch(&ctx, name, shutdown_signal()).await,
        Command::Supervise => commands::supervise(&ctx, shutdown_signal()).await,
        Command::Approve { ref id } => commands::approve(&ctx, id),
        Command::Reject { ref id, ref reason } => commands::reject(&ctx, id, reason),
        Command::Status => commands::status(&ctx),
        Command::Audit { date } => commands::audit(&ctx, date),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Vigil exited with an error");
    }
    result
}
