//! CLI argument definitions for the `vigil` binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use vigil_core::config::VigilConfig;
use vigil_core::types::RecordId;

/// Vigil - file-mediated action lifecycle orchestration.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Vault directory (overrides `general.vault_dir`).
    #[arg(long = "vault", global = true)]
    pub vault: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Simulate adapter calls instead of performing them.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the vault layout and a default config file.
    Init,
    /// Run the orchestrator loop.
    Orchestrate,
    /// Run one configured drop-folder watcher.
    Watch {
        /// Drop-folder name from `[[watchers.drop_folders]]`.
        name: String,
    },
    /// Start and supervise the orchestrator and every watcher.
    Supervise,
    /// Approve a record waiting in pending-approval.
    Approve { id: RecordId },
    /// Reject a record waiting in pending-approval.
    Reject {
        id: RecordId,
        #[arg(long)]
        reason: String,
    },
    /// Show record counts and component health.
    Status,
    /// Print the audit entries for one day (default: today, UTC).
    Audit {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > VIGIL_CONFIG env var > ~/.vigil/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("VIGIL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Apply the flag overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut VigilConfig) {
        if let Some(ref vault) = self.vault {
            config.general.vault_dir = vault.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if self.dry_run {
            config.general.dry_run = true;
        }
    }

    /// Global flags to hand down to supervised child processes.
    pub fn child_args(&self, config_path: &std::path::Path) -> Vec<String> {
        let mut args = vec!["--config".to_string(), config_path.to_string_lossy().to_string()];
        if let Some(ref vault) = self.vault {
            args.push("--vault".to_string());
            args.push(vault.to_string_lossy().to_string());
        }
        if let Some(ref level) = self.log_level {
            args.push("--log-level".to_string());
            args.push(level.clone());
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".vigil").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".vigil").join("config.toml");
    }
    PathBuf::from("config.toml")
}
