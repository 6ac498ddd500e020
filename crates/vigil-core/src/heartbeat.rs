//! Heartbeat files for liveness monitoring.
//!
//! Watchers and the orchestrator write a small JSON heartbeat into the
//! vault's `.health/` directory on a fixed interval. The health monitor
//! reads these files to decide whether a component is still alive.
//!
//! Writes are atomic (temp + rename); reads are bounded to
//! [`MAX_HEARTBEAT_FILE_SIZE`] so a crafted file cannot exhaust memory.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};
use crate::fsutil;

/// Schema identifier written into every heartbeat file.
pub const HEARTBEAT_SCHEMA: &str = "vigil.heartbeat.v1";

/// Maximum heartbeat file size accepted when reading.
pub const MAX_HEARTBEAT_FILE_SIZE: u64 = 4096;

/// One heartbeat emitted by a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub schema: String,
    pub component: String,
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub cycle_count: u64,
    pub status: String,
}

impl Heartbeat {
    /// Build a heartbeat for the current process.
    pub fn now(component: &str, cycle_count: u64, status: &str) -> Self {
        Self {
            schema: HEARTBEAT_SCHEMA.to_string(),
            component: component.to_string(),
            pid: std::process::id(),
            timestamp: Utc::now(),
            cycle_count,
            status: status.to_string(),
        }
    }
}

/// Validate that a component name is safe to use as a file stem.
pub fn validate_component_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(VigilError::Config(format!(
            "Invalid component name: {:?}",
            name
        )))
    }
}

fn heartbeat_path(health_dir: &Path, component: &str) -> PathBuf {
    health_dir.join(format!("{}.json", component))
}

/// Atomically write a heartbeat to `<health_dir>/<component>.json`.
pub fn write_heartbeat(health_dir: &Path, heartbeat: &Heartbeat) -> Result<()> {
    validate_component_name(&heartbeat.component)?;
    std::fs::create_dir_all(health_dir)?;
    let json = serde_json::to_vec_pretty(heartbeat)?;
    fsutil::write_atomic(
        health_dir,
        &heartbeat_path(health_dir, &heartbeat.component),
        &json,
    )
}

/// Read one component's heartbeat.
///
/// Returns `Ok(None)` if the component has never written one.
pub fn read_heartbeat(health_dir: &Path, component: &str) -> Result<Option<Heartbeat>> {
    validate_component_name(component)?;
    read_heartbeat_file(&heartbeat_path(health_dir, component))
}

/// Read every heartbeat in `health_dir`, skipping unreadable files.
pub fn read_all(health_dir: &Path) -> Result<Vec<Heartbeat>> {
    let entries = match std::fs::read_dir(health_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut heartbeats = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if fsutil::is_hidden(&name) || !name.ends_with(".json") {
            continue;
        }
        match read_heartbeat_file(&entry.path()) {
            Ok(Some(hb)) => heartbeats.push(hb),
            Ok(None) => {}
            Err(e) => tracing::warn!(file = %name, error = %e, "Ignoring unreadable heartbeat"),
        }
    }
    heartbeats.sort_by(|a, b| a.component.cmp(&b.component));
    Ok(heartbeats)
}

fn read_heartbeat_file(path: &Path) -> Result<Option<Heartbeat>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut data = Vec::new();
    file.take(MAX_HEARTBEAT_FILE_SIZE + 1).read_to_end(&mut data)?;
    if data.len() as u64 > MAX_HEARTBEAT_FILE_SIZE {
        return Err(VigilError::Serialization(format!(
            "heartbeat file {} exceeds {} bytes",
            path.display(),
            MAX_HEARTBEAT_FILE_SIZE
        )));
    }

    let heartbeat: Heartbeat = serde_json::from_slice(&data)?;
    if heartbeat.schema != HEARTBEAT_SCHEMA {
        return Err(VigilError::Serialization(format!(
            "heartbeat schema mismatch: expected {}, got {}",
            HEARTBEAT_SCHEMA, heartbeat.schema
        )));
    }
    Ok(Some(heartbeat))
}
