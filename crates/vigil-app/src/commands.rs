//! Subcommand implementations: wire the crates together for each mode.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::info;

use vigil_action::{
    AdapterRegistry, ApprovalGate, AuditLogger, AutoApprovePolicy, FilePlanner, Orchestrator,
    OrchestratorSettings, Planner, RetryPolicy, Triage,
};
use vigil_core::config::VigilConfig;
use vigil_core::heartbeat;
use vigil_core::types::{LifecycleState, RecordId};
use vigil_health::{read_restart_events, ProcessLauncher, Supervisor, SupervisorSettings};
use vigil_store::{FsRecordStore, PlanStore, RecordStore, VaultLayout};
use vigil_watch::{DropFolderWatcher, HarnessSettings, WatcherHarness};

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Everything a subcommand needs, resolved once at startup.
pub struct Context {
    pub config_path: PathBuf,
    pub config: VigilConfig,
    pub layout: VaultLayout,
    /// Global flags forwarded to supervised children.
    pub child_args: Vec<String>,
}

impl Context {
    pub fn new(config_path: PathBuf, config: VigilConfig, child_args: Vec<String>) -> Self {
        let layout = VaultLayout::new(config.vault_path());
        Self {
            config_path,
            config,
            layout,
            child_args,
        }
    }

    fn store(&self) -> AppResult<Arc<dyn RecordStore>> {
        Ok(Arc::new(FsRecordStore::open(self.layout.clone())?))
    }

    fn registry(&self) -> AppResult<Arc<AdapterRegistry>> {
        Ok(Arc::new(AdapterRegistry::with_builtins(
            &self.layout,
            &self.config.adapters,
        )?))
    }
}

/// Names of every component the supervisor manages.
pub fn component_names(config: &VigilConfig) -> Vec<String> {
    let mut names = vec![vigil_action::orchestrator::COMPONENT_NAME.to_string()];
    names.extend(
        config
            .watchers
            .drop_folders
            .iter()
            .map(|f| format!("watcher-{}", f.name)),
    );
    names
}

/// Create the vault directories and write a default config if none exists.
pub fn init(ctx: &Context) -> AppResult<()> {
    ctx.layout.ensure()?;
    for folder in &ctx.config.watchers.drop_folders {
        std::fs::create_dir_all(ctx.layout.drop_dir(&folder.name))?;
    }
    if !ctx.config_path.exists() {
        ctx.config.save(&ctx.config_path)?;
        println!("Wrote {}", ctx.config_path.display());
    }
    println!("Vault ready at {}", ctx.layout.root().display());
    Ok(())
}

pub fn build_orchestrator(ctx: &Context) -> AppResult<Orchestrator> {
    let store = ctx.store()?;
    let registry = ctx.registry()?;
    let plans = PlanStore::new(ctx.layout.clone());
    let planner: Arc<dyn Planner> = Arc::new(FilePlanner::new(plans.clone()));
    let policy = AutoApprovePolicy::new(ctx.config.approval.rules.clone());
    let default_deadline = ctx
        .config
        .approval
        .default_deadline_hours
        .map(|h| chrono::Duration::hours(h as i64));

    let triage = Triage::new(Arc::clone(&store), plans, planner, Arc::clone(&registry), policy)
        .with_default_deadline(default_deadline);
    let retry = RetryPolicy::from_config(&ctx.config.retry, &ctx.config.orchestrator);
    let audit = AuditLogger::new(&ctx.layout, ctx.config.audit.retention_days);

    Ok(Orchestrator::new(
        store,
        registry,
        triage,
        retry,
        audit,
        &ctx.layout,
        OrchestratorSettings::from_config(&ctx.config),
    ))
}

pub async fn orchestrate(ctx: &Context, shutdown: watch::Receiver<bool>) -> AppResult<()> {
    let orchestrator = build_orchestrator(ctx)?;
    orchestrator.run(shutdown).await?;
    Ok(())
}

pub fn build_watcher(ctx: &Context, name: &str) -> AppResult<WatcherHarness> {
    let folder = ctx
        .config
        .watchers
        .drop_folders
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| format!("No drop folder named {:?} in {}", name, ctx.config_path.display()))?;

    let store = ctx.store()?;
    let watcher = DropFolderWatcher::from_config(folder, ctx.layout.drop_dir(&folder.name));
    std::fs::create_dir_all(watcher.dir())?;
    let settings = HarnessSettings::from_config(&ctx.config, &folder.name);
    Ok(WatcherHarness::new(Box::new(watcher), store, &ctx.layout, settings)?)
}

pub async fn watch(ctx: &Context, name: &str, shutdown: watch::Receiver<bool>) -> AppResult<()> {
    let harness = build_watcher(ctx, name)?;
    harness.run(shutdown).await?;
    Ok(())
}

/// Launch every component as a child process and keep them alive.
pub async fn supervise(ctx: &Context, shutdown: watch::Receiver<bool>) -> AppResult<()> {
    ctx.layout.ensure()?;
    let program = std::env::current_exe()?;
    let grace = std::time::Duration::from_secs(ctx.config.health.shutdown_grace_secs);
    let launcher = Arc::new(ProcessLauncher::new(program, ctx.child_args.clone()).with_grace(grace));
    let mut supervisor = Supervisor::new(
        ctx.layout.health_dir(),
        SupervisorSettings::from_config(&ctx.config.health),
        launcher.clone(),
    );

    let now = Utc::now();
    for component in component_names(&ctx.config) {
        supervisor.register(&component, now)?;
    }
    supervisor.start_all().await?;

    let result = supervisor.run(shutdown).await;
    launcher.shutdown().await;
    info!("Supervised components stopped");
    result?;
    Ok(())
}

pub fn approve(ctx: &Context, id: &RecordId) -> AppResult<()> {
    let gate = ApprovalGate::new(ctx.store()?, ctx.registry()?);
    gate.approve(id)?;
    println!("Approved {}", id);
    Ok(())
}

pub fn reject(ctx: &Context, id: &RecordId, reason: &str) -> AppResult<()> {
    let gate = ApprovalGate::new(ctx.store()?, ctx.registry()?);
    gate.reject(id, reason)?;
    println!("Rejected {}", id);
    Ok(())
}

/// Record counts per state, component heartbeats and recent restarts.
pub fn status_report(ctx: &Context, now: DateTime<Utc>) -> AppResult<String> {
    let store = ctx.store()?;
    let mut out = String::new();

    writeln!(out, "Vault: {}", ctx.layout.root().display())?;
    writeln!(out, "Records:")?;
    for state in LifecycleState::ALL {
        writeln!(out, "  {:<18}{}", state.dir_name(), store.list(state)?.len())?;
    }

    let health_dir = ctx.layout.health_dir();
    let threshold = chrono::Duration::seconds(ctx.config.health.heartbeat_threshold_secs as i64);
    let window_start = now - chrono::Duration::seconds(ctx.config.health.restart_window_secs as i64);
    let restarts = read_restart_events(&health_dir)?;

    writeln!(out, "Components:")?;
    let mut beats = heartbeat::read_all(&health_dir)?;
    beats.sort_by(|a, b| a.component.cmp(&b.component));
    if beats.is_empty() {
        writeln!(out, "  (no heartbeats)")?;
    }
    for hb in beats {
        let age = now - hb.timestamp;
        let state = if age > threshold { "stale" } else { "healthy" };
        let recent = restarts
            .iter()
            .filter(|e| e.component == hb.component && e.timestamp >= window_start)
            .count();
        writeln!(
            out,
            "  {:<18}{:<9}cycle {:<8}last beat {}s ago, {} restart(s) in window",
            hb.component,
            state,
            hb.cycle_count,
            age.num_seconds(),
            recent
        )?;
    }
    Ok(out)
}

pub fn status(ctx: &Context) -> AppResult<()> {
    print!("{}", status_report(ctx, Utc::now())?);
    Ok(())
}

/// Print one day's audit entries as JSON lines.
pub fn audit(ctx: &Context, date: Option<NaiveDate>) -> AppResult<()> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let logger = AuditLogger::new(&ctx.layout, ctx.config.audit.retention_days);
    for entry in logger.entries_for(date)? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
