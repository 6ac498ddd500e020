//! Heartbeat-driven supervisor.
//!
//! Tracks each registered component's last heartbeat, cycle count, restart
//! history and status. A component silent for longer than the threshold is
//! unhealthy and gets restarted through the launcher; one that exceeds
//! `max_restarts` within the restart window is marked crashed and left
//! alone.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vigil_core::config::HealthConfig;
use vigil_core::fsutil::append_line;
use vigil_core::heartbeat::{read_all, validate_component_name};

use crate::error::SupervisorError;
use crate::launcher::ComponentLauncher;
use crate::restart::{RestartEvent, RestartTracker};

const RESTART_LOG: &str = "restarts.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Unhealthy,
    Crashed,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Healthy => write!(f, "healthy"),
            ComponentStatus::Unhealthy => write!(f, "unhealthy"),
            ComponentStatus::Crashed => write!(f, "crashed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub heartbeat_threshold: chrono::Duration,
    pub max_restarts: u32,
    pub restart_window: chrono::Duration,
    pub check_interval: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            heartbeat_threshold: chrono::Duration::seconds(config.heartbeat_threshold_secs as i64),
            max_restarts: config.max_restarts,
            restart_window: chrono::Duration::seconds(config.restart_window_secs as i64),
            check_interval: Duration::from_secs(config.check_interval_secs),
        }
    }
}

/// What the supervisor knows about one component.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub component: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    pub status: ComponentStatus,
    pub restarts: RestartTracker,
    /// When supervision began; stands in for a heartbeat until the first one.
    registered_at: DateTime<Utc>,
}

impl ComponentHealth {
    /// Last sign of life: heartbeat, restart, or registration.
    fn last_alive(&self) -> DateTime<Utc> {
        [Some(self.registered_at), self.last_heartbeat, self.restarts.last_restart()]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.registered_at)
    }
}

pub struct Supervisor {
    health_dir: PathBuf,
    settings: SupervisorSettings,
    launcher: Arc<dyn ComponentLauncher>,
    components: BTreeMap<String, ComponentHealth>,
}

impl Supervisor {
    pub fn new(
        health_dir: impl Into<PathBuf>,
        settings: SupervisorSettings,
        launcher: Arc<dyn ComponentLauncher>,
    ) -> Self {
        Self {
            health_dir: health_dir.into(),
            settings,
            launcher,
            components: BTreeMap::new(),
        }
    }

    /// Start supervising `component` as of `now`.
    pub fn register(&mut self, component: &str, now: DateTime<Utc>) -> Result<(), SupervisorError> {
        validate_component_name(component)?;
        self.components
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth {
                component: component.to_string(),
                last_heartbeat: None,
                cycle_count: 0,
                status: ComponentStatus::Healthy,
                restarts: RestartTracker::new(self.settings.max_restarts, self.settings.restart_window),
                registered_at: now,
            });
        Ok(())
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentHealth> {
        self.components.values()
    }

    /// Launch every registered component once.
    pub async fn start_all(&mut self) -> Result<(), SupervisorError> {
        for name in self.components.keys() {
            self.launcher.launch(name).await?;
        }
        Ok(())
    }

    /// Pull the latest heartbeats from disk.
    pub fn observe(&mut self) -> Result<(), SupervisorError> {
        for hb in read_all(&self.health_dir)? {
            if let Some(health) = self.components.get_mut(&hb.component) {
                if health.last_heartbeat.map_or(true, |t| hb.timestamp > t) {
                    health.last_heartbeat = Some(hb.timestamp);
                    health.cycle_count = hb.cycle_count;
                }
            }
        }
        Ok(())
    }

    /// Observe heartbeats and restart silent components.
    ///
    /// Returns the restart events produced by this check.
    pub async fn check(&mut self, now: DateTime<Utc>) -> Result<Vec<RestartEvent>, SupervisorError> {
        self.observe()?;
        let threshold = self.settings.heartbeat_threshold;
        let mut events = Vec::new();

        let names: Vec<String> = self.components.keys().cloned().collect();
        for name in names {
            let Some(health) = self.components.get_mut(&name) else { continue };
            let silent_for = now - health.last_alive();

            if silent_for <= threshold {
                if health.last_heartbeat.is_some_and(|t| now - t <= threshold)
                    && health.status != ComponentStatus::Healthy
                {
                    info!(component = %name, "Component healthy again");
                    health.status = ComponentStatus::Healthy;
                }
                continue;
            }

            if health.status == ComponentStatus::Crashed {
                continue;
            }
            if !health.restarts.allows(now) {
                health.status = ComponentStatus::Crashed;
                error!(
                    critical = true,
                    component = %name,
                    restarts = health.restarts.count(now),
                    "Component crashed: restart limit reached, not retrying"
                );
                continue;
            }

            health.status = ComponentStatus::Unhealthy;
            let downtime = now - health.last_heartbeat.unwrap_or(health.registered_at);
            let result = self.launcher.launch(&name).await;
            // The launcher may have failed; either way the attempt counts.
            let Some(health) = self.components.get_mut(&name) else { continue };
            let restarts_in_window = health.restarts.record(now);

            let event = RestartEvent {
                component: name.clone(),
                timestamp: now,
                downtime_secs: downtime.num_seconds(),
                restarts_in_window,
                launched: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            match &result {
                Ok(()) => warn!(
                    component = %name,
                    downtime_secs = event.downtime_secs,
                    restarts_in_window,
                    "Restarted unresponsive component"
                ),
                Err(e) => warn!(component = %name, error = %e, "Restart failed"),
            }
            self.log_event(&event)?;
            events.push(event);
        }
        Ok(events)
    }

    fn log_event(&self, event: &RestartEvent) -> Result<(), SupervisorError> {
        std::fs::create_dir_all(&self.health_dir).map_err(vigil_core::VigilError::from)?;
        let line = serde_json::to_string(event).map_err(vigil_core::VigilError::from)?;
        append_line(&self.health_dir.join(RESTART_LOG), &line)?;
        Ok(())
    }

    /// Check on a fixed interval until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        info!(
            components = self.components.len(),
            interval = ?self.settings.check_interval,
            "Supervisor started"
        );
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check(Utc::now()).await {
                        Ok(events) => debug!(restarts = events.len(), "Supervisor check complete"),
                        Err(e) if e.is_fatal() => {
                            error!(critical = true, error = %e, "Supervisor halting");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "Supervisor check failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Supervisor stopped");
        Ok(())
    }
}

/// Read the restart log written by the supervisor.
pub fn read_restart_events(health_dir: &std::path::Path) -> Result<Vec<RestartEvent>, SupervisorError> {
    let text = match std::fs::read_to_string(health_dir.join(RESTART_LOG)) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(vigil_core::VigilError::from(e).into()),
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
