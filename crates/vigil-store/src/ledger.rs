//! Per-watcher dedup ledger.
//!
//! One JSON object per line in `.ledger/<watcher>.jsonl`. A watcher owns
//! its ledger exclusively; no other component writes to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_core::error::{Result, VigilError};
use vigil_core::fsutil;
use vigil_core::heartbeat::validate_component_name;
use vigil_core::types::Fingerprint;

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub first_seen: DateTime<Utc>,
}

/// Fingerprints already turned into records by one watcher.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    tmp_dir: PathBuf,
    entries: HashMap<Fingerprint, DateTime<Utc>>,
}

impl DedupLedger {
    /// Open (or start) the ledger for `watcher` under `ledger_dir`.
    ///
    /// Unparseable lines are skipped with a warning so a torn final line
    /// cannot take the watcher down.
    pub fn open(ledger_dir: &Path, watcher: &str) -> Result<Self> {
        validate_component_name(watcher)?;
        std::fs::create_dir_all(ledger_dir)
            .map_err(|e| VigilError::Ledger(format!("create {}: {}", ledger_dir.display(), e)))?;
        let path = ledger_dir.join(format!("{}.jsonl", watcher));

        let mut entries = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for (lineno, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LedgerEntry>(line) {
                        Ok(entry) => {
                            entries
                                .entry(entry.fingerprint)
                                .and_modify(|seen: &mut DateTime<Utc>| {
                                    if entry.first_seen < *seen {
                                        *seen = entry.first_seen;
                                    }
                                })
                                .or_insert(entry.first_seen);
                        }
                        Err(e) => warn!(
                            ledger = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "Skipping unparseable ledger line"
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VigilError::Ledger(format!("read {}: {}", path.display(), e)));
            }
        }

        debug!(ledger = %path.display(), entries = entries.len(), "Ledger opened");
        Ok(Self {
            path,
            tmp_dir: ledger_dir.to_path_buf(),
            entries,
        })
    }

    pub fn has_seen(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Record `fingerprint` as seen. Idempotent: returns `false` and writes
    /// nothing if it was already present.
    pub fn mark_seen(&mut self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<bool> {
        if self.has_seen(fingerprint) {
            return Ok(false);
        }
        let entry = LedgerEntry {
            fingerprint: fingerprint.clone(),
            first_seen: at,
        };
        let line = serde_json::to_string(&entry)?;
        fsutil::append_line(&self.path, &line)
            .map_err(|e| VigilError::Ledger(format!("append {}: {}", self.path.display(), e)))?;
        self.entries.insert(entry.fingerprint, at);
        Ok(true)
    }

    /// Drop entries older than `retention` whose records are resolved.
    ///
    /// Entries for which `is_unresolved` returns true are kept regardless
    /// of age. The file is rewritten atomically. Returns the number pruned.
    pub fn prune<F>(&mut self, now: DateTime<Utc>, retention: Duration, is_unresolved: F) -> Result<usize>
    where
        F: Fn(&Fingerprint) -> bool,
    {
        let cutoff = now - retention;
        let before = self.entries.len();
        self.entries
            .retain(|fp, first_seen| *first_seen >= cutoff || is_unresolved(fp));
        let pruned = before - self.entries.len();
        if pruned == 0 {
            return Ok(0);
        }

        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        let mut out = String::new();
        for (fingerprint, first_seen) in sorted {
            let entry = LedgerEntry {
                fingerprint: fingerprint.clone(),
                first_seen: *first_seen,
            };
            out.push_str(&serde_json::to_string(&entry)?);
            out.push('\n');
        }
        fsutil::write_atomic(&self.tmp_dir, &self.path, out.as_bytes())
            .map_err(|e| VigilError::Ledger(format!("rewrite {}: {}", self.path.display(), e)))?;

        debug!(ledger = %self.path.display(), pruned, "Ledger pruned");
        Ok(pruned)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
