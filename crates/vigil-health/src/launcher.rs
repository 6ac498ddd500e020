//! Component launchers used by the supervisor to (re)start components.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;

/// Starts a component by name, replacing any previous instance.
#[async_trait]
pub trait ComponentLauncher: Send + Sync {
    async fn launch(&self, component: &str) -> Result<(), SupervisorError>;
}

/// Map a component name to the CLI arguments that run it.
pub fn command_args(component: &str) -> Option<Vec<String>> {
    if component == "orchestrator" {
        return Some(vec!["orchestrate".to_string()]);
    }
    component
        .strip_prefix("watcher-")
        .filter(|name| !name.is_empty())
        .map(|name| vec!["watch".to_string(), name.to_string()])
}

/// Default time a child gets between SIGTERM and SIGKILL.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Runs each component as a child process of the `vigil` binary.
pub struct ProcessLauncher {
    program: PathBuf,
    base_args: Vec<String>,
    grace: Duration,
    children: tokio::sync::Mutex<HashMap<String, Child>>,
}

impl ProcessLauncher {
    /// `base_args` go before the component subcommand (e.g. `--config`).
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            grace: DEFAULT_SHUTDOWN_GRACE,
            children: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Stop every child this launcher started, letting each finish its cycle.
    pub async fn shutdown(&self) {
        let mut children = self.children.lock().await;
        for (component, child) in children.drain() {
            stop_child(&component, child, self.grace).await;
        }
    }

    pub async fn pid(&self, component: &str) -> Option<u32> {
        self.children.lock().await.get(component).and_then(|c| c.id())
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn stop_child(component: &str, mut child: Child, grace: Duration) {
    if !request_exit(&child) {
        if let Err(e) = child.kill().await {
            debug!(component = %component, error = %e, "Child already gone");
        }
        return;
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(component = %component, %status, "Child exited"),
        Ok(Err(e)) => debug!(component = %component, error = %e, "Child already gone"),
        Err(_) => {
            warn!(component = %component, grace_secs = grace.as_secs(), "Child ignored SIGTERM; killing");
            if let Err(e) = child.kill().await {
                debug!(component = %component, error = %e, "Child already gone");
            }
        }
    }
}

/// Ask the child to exit. `false` when no signal could be delivered.
#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

#[async_trait]
impl ComponentLauncher for ProcessLauncher {
    async fn launch(&self, component: &str) -> Result<(), SupervisorError> {
        let args = command_args(component)
            .ok_or_else(|| SupervisorError::UnknownComponent(component.to_string()))?;

        let mut children = self.children.lock().await;
        if let Some(old) = children.remove(component) {
            // The old instance may be hung rather than dead.
            stop_child(component, old, self.grace).await;
        }

        let child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Launch {
                component: component.to_string(),
                reason: e.to_string(),
            })?;
        info!(component = %component, pid = ?child.id(), "Component process started");
        children.insert(component.to_string(), child);
        Ok(())
    }
}

/// Produces a fresh future for one run of an in-process component.
pub type TaskFactory = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Runs each component as a tokio task inside the supervisor process.
#[derive(Default)]
pub struct TaskLauncher {
    factories: HashMap<String, TaskFactory>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: impl Into<String>, factory: TaskFactory) {
        self.factories.insert(component.into(), factory);
    }

    pub fn is_running(&self, component: &str) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(component)
            .is_some_and(|h| !h.is_finished())
    }

    /// Abort every task this launcher started.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ComponentLauncher for TaskLauncher {
    async fn launch(&self, component: &str) -> Result<(), SupervisorError> {
        let factory = self
            .factories
            .get(component)
            .ok_or_else(|| SupervisorError::UnknownComponent(component.to_string()))?;

        let handle = tokio::spawn(factory());
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = handles.insert(component.to_string(), handle) {
            old.abort();
        }
        info!(component = %component, "Component task started");
        Ok(())
    }
}
