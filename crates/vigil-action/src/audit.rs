//! Append-only execution audit log.
//!
//! One JSON array per UTC day under `audit/YYYY-MM-DD.json`. Each append
//! rewrites the partition atomically, so readers see the file either
//! before or after the entry. Inputs, outputs and errors pass through the
//! credential sanitizer before anything touches disk.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::error::{Result, VigilError};
use vigil_core::fsutil::write_atomic;
use vigil_core::sanitize::Sanitizer;
use vigil_core::types::ExecutionStatus;
use vigil_store::VaultLayout;

const PARTITION_FORMAT: &str = "%Y-%m-%d";

/// One adapter execution, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub record_id: String,
    pub action_kind: String,
    pub adapter: String,
    pub operation: String,
    pub inputs: serde_json::Value,
    pub outputs: serde_json::Value,
    pub execution_status: ExecutionStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub dry_run: bool,
}

/// Writer and reader for the audit partitions.
pub struct AuditLogger {
    dir: PathBuf,
    archive_dir: PathBuf,
    tmp_dir: PathBuf,
    retention_days: u32,
    sanitizer: Sanitizer,
    // Serializes read-modify-write of a partition within this process.
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(layout: &VaultLayout, retention_days: u32) -> Self {
        let dir = layout.audit_dir();
        Self {
            archive_dir: dir.join("archive"),
            dir,
            tmp_dir: layout.tmp_dir(),
            retention_days,
            sanitizer: Sanitizer::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format(PARTITION_FORMAT)))
    }

    /// Sanitize and append `entry` to its day's partition.
    ///
    /// Returns the entry as written.
    pub fn log(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        let redactions = self.sanitizer.sanitize_value(&mut entry.inputs)
            + self.sanitizer.sanitize_value(&mut entry.outputs);
        entry.error = entry.error.map(|e| self.sanitizer.sanitize(&e));

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.partition_path(entry.timestamp.date_naive());
        let mut entries = read_partition(&path)?;
        entries.push(entry.clone());
        let json = serde_json::to_vec_pretty(&entries)?;
        std::fs::create_dir_all(&self.dir)?;
        write_atomic(&self.tmp_dir, &path, &json)?;

        tracing::debug!(
            record_id = %entry.record_id,
            adapter = %entry.adapter,
            operation = %entry.operation,
            status = %entry.execution_status,
            redactions,
            "Audit entry written"
        );
        Ok(entry)
    }

    /// Entries of one day's partition, in write order.
    pub fn entries_for(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        read_partition(&self.partition_path(date))
    }

    /// Live entries with `timestamp >= since`, oldest partition first.
    pub fn query(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        let mut out = Vec::new();
        for (date, path) in self.partitions()? {
            if date < since.date_naive() {
                continue;
            }
            out.extend(
                read_partition(&path)?
                    .into_iter()
                    .filter(|e| e.timestamp >= since),
            );
        }
        Ok(out)
    }

    /// Move partitions older than the retention window into `archive/`.
    ///
    /// Nothing is deleted. Returns the number of partitions moved.
    pub fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now.date_naive() - chrono::Duration::days(i64::from(self.retention_days));
        let mut moved = 0;
        for (date, path) in self.partitions()? {
            if date >= cutoff {
                continue;
            }
            std::fs::create_dir_all(&self.archive_dir)?;
            let Some(name) = path.file_name() else { continue };
            let target = self.archive_dir.join(name);
            if target.exists() {
                tracing::warn!(partition = %target.display(), "Archived partition already exists, leaving live copy");
                continue;
            }
            std::fs::rename(&path, &target)?;
            moved += 1;
        }
        if moved > 0 {
            tracing::info!(moved, retention_days = self.retention_days, "Archived audit partitions");
        }
        Ok(moved)
    }

    /// Live partitions sorted by date.
    fn partitions(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, PARTITION_FORMAT) {
                out.push((date, entry.path()));
            }
        }
        out.sort_by_key(|(date, _)| *date);
        Ok(out)
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("dir", &self.dir)
            .field("retention_days", &self.retention_days)
            .finish()
    }
}

fn read_partition(path: &Path) -> Result<Vec<AuditEntry>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            VigilError::Storage(format!("corrupt audit partition {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
