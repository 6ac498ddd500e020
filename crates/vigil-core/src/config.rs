use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VigilError};

/// Top-level configuration for Vigil.
///
/// Loaded from `~/.vigil/config.toml` by default. Each section corresponds
/// to one component of the lifecycle engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub watchers: WatchersConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.watchers.default_interval_secs == 0 {
            return Err(VigilError::Config(
                "watchers.default_interval_secs must be > 0".into(),
            ));
        }
        if self.orchestrator.poll_interval_secs == 0 {
            return Err(VigilError::Config(
                "orchestrator.poll_interval_secs must be > 0".into(),
            ));
        }
        if self.orchestrator.adapter_timeout_secs == 0 {
            return Err(VigilError::Config(
                "orchestrator.adapter_timeout_secs must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(VigilError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.unclassified_attempts == 0 {
            return Err(VigilError::Config(
                "retry.unclassified_attempts must be >= 1".into(),
            ));
        }
        if self.health.heartbeat_threshold_secs <= self.health.heartbeat_interval_secs {
            return Err(VigilError::Config(
                "health.heartbeat_threshold_secs must exceed heartbeat_interval_secs".into(),
            ));
        }
        for folder in &self.watchers.drop_folders {
            if folder.name.is_empty() {
                return Err(VigilError::Config("drop folder name must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Vault root with `~` expanded.
    pub fn vault_path(&self) -> PathBuf {
        expand_home(&self.general.vault_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root of the record vault (state directories, ledgers, audit log).
    pub vault_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Simulate adapter success without performing external effects.
    pub dry_run: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            vault_dir: "~/.vigil/vault".to_string(),
            log_level: "info".to_string(),
            dry_run: false,
        }
    }
}

/// Watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchersConfig {
    /// Poll interval for watchers without an override.
    pub default_interval_secs: u64,
    /// Drop-folder watchers to run.
    pub drop_folders: Vec<DropFolderConfig>,
}

impl Default for WatchersConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 60,
            drop_folders: vec![DropFolderConfig::default()],
        }
    }
}

impl WatchersConfig {
    /// Poll interval for a named watcher.
    pub fn interval_for(&self, name: &str) -> u64 {
        self.drop_folders
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.interval_secs)
            .unwrap_or(self.default_interval_secs)
    }
}

/// One drop-folder watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DropFolderConfig {
    /// Watcher name; the folder is `<vault>/drop/<name>`.
    pub name: String,
    /// Poll interval override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    /// Files larger than this are skipped as malformed input.
    pub max_file_bytes: u64,
}

impl Default for DropFolderConfig {
    fn default() -> Self {
        Self {
            name: "inbox".to_string(),
            interval_secs: None,
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds between polls of the approved directory.
    pub poll_interval_secs: u64,
    /// Upper bound for a single adapter invocation.
    pub adapter_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            adapter_timeout_secs: 30,
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts for transient errors, including the first.
    pub max_attempts: u32,
    /// Base delay; attempt n waits `base * 2^(n-1)`.
    pub backoff_base_ms: u64,
    /// Attempts for errors that could not be classified.
    pub unclassified_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            unclassified_attempts: 2,
        }
    }
}

/// Health monitor and supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub heartbeat_interval_secs: u64,
    /// A component without a heartbeat for this long is unhealthy.
    pub heartbeat_threshold_secs: u64,
    /// Restarts allowed within `restart_window_secs` before giving up.
    pub max_restarts: u32,
    pub restart_window_secs: u64,
    /// Seconds between supervisor checks.
    pub check_interval_secs: u64,
    /// Seconds a child gets to exit after SIGTERM before it is killed.
    pub shutdown_grace_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            heartbeat_threshold_secs: 120,
            max_restarts: 5,
            restart_window_secs: 3600,
            check_interval_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Dedup ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Partitions younger than this stay in the live audit directory.
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

/// Approval gate settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Deadline applied to approval requests whose plan has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_deadline_hours: Option<u64>,
    /// Rules deciding which `auto` plans may skip human approval.
    pub rules: Vec<AutoApproveRule>,
}

/// One auto-approve permission rule. `*` matches any adapter or operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApproveRule {
    pub adapter: String,
    pub operation: String,
    #[serde(default = "default_allow")]
    pub allow: bool,
}

fn default_allow() -> bool {
    true
}

/// Built-in adapter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    /// External programs bound to operations.
    pub commands: Vec<CommandAdapterConfig>,
}

/// Binds an adapter name and operation to an external program.
///
/// The program receives the step parameters as JSON on stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAdapterConfig {
    pub adapter: String,
    pub operation: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}
