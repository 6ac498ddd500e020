//! Drop-folder watcher.
//!
//! Every regular file placed in `<vault>/drop/<name>/` becomes one
//! candidate. Once recorded, the file is moved to `.processed/` inside the
//! same folder; files that can never become records go to `.rejected/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use vigil_core::config::DropFolderConfig;
use vigil_core::fsutil;
use vigil_core::types::SourceKind;

use crate::error::WatchError;
use crate::watcher::{CandidateEvent, Watcher};

const SUMMARY_MAX_CHARS: usize = 120;

pub struct DropFolderWatcher {
    name: String,
    dir: PathBuf,
    max_file_bytes: u64,
}

impl DropFolderWatcher {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            max_file_bytes,
        }
    }

    pub fn from_config(config: &DropFolderConfig, vault_drop_dir: PathBuf) -> Self {
        Self::new(config.name.clone(), vault_drop_dir, config.max_file_bytes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn set_aside(&self, file_name: &str, bucket: &str) -> std::io::Result<()> {
        let target_dir = self.dir.join(bucket);
        std::fs::create_dir_all(&target_dir)?;
        let mut target = target_dir.join(file_name);
        if target.exists() {
            target = target_dir.join(format!("{}.{}", Utc::now().timestamp_millis(), file_name));
        }
        std::fs::rename(self.dir.join(file_name), target)
    }

    fn reject(&self, file_name: &str, reason: &str) {
        warn!(watcher = %self.name, file = %file_name, reason, "Rejecting dropped file");
        if let Err(e) = self.set_aside(file_name, ".rejected") {
            warn!(watcher = %self.name, file = %file_name, error = %e, "Could not set aside rejected file");
        }
    }
}

/// First non-empty line, trimmed and shortened.
fn summarize(content: &str, fallback: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(fallback);
    let mut summary: String = line.chars().take(SUMMARY_MAX_CHARS).collect();
    if line.chars().count() > SUMMARY_MAX_CHARS {
        summary.push_str("...");
    }
    summary
}

#[async_trait]
impl Watcher for DropFolderWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&mut self) -> Result<Vec<CandidateEvent>, WatchError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| WatchError::Poll(format!("{}: {}", self.dir.display(), e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WatchError::Poll(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if fsutil::is_hidden(&name) {
                continue;
            }
            match entry.file_type() {
                Ok(t) if t.is_file() => files.push((name, entry.path())),
                _ => continue,
            }
        }
        files.sort();

        let mut candidates = Vec::new();
        for (name, path) in files {
            let size = match std::fs::metadata(&path) {
                Ok(m) => m.len(),
                Err(e) => {
                    debug!(file = %name, error = %e, "File vanished before read");
                    continue;
                }
            };
            if size > self.max_file_bytes {
                self.reject(&name, "file too large");
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    debug!(file = %name, error = %e, "File vanished before read");
                    continue;
                }
            };
            let content = match String::from_utf8(bytes) {
                Ok(c) => c,
                Err(_) => {
                    self.reject(&name, "not valid UTF-8");
                    continue;
                }
            };
            if content.trim().is_empty() {
                self.reject(&name, "empty file");
                continue;
            }

            let mut candidate =
                CandidateEvent::new(name.clone(), content.clone(), SourceKind::File, summarize(&content, &name));
            candidate.extra.push(("drop_folder".to_string(), self.name.clone()));
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    async fn acknowledge(&mut self, candidate: &CandidateEvent) -> Result<(), WatchError> {
        self.set_aside(&candidate.source_id, ".processed")
            .map_err(|e| WatchError::Poll(format!("archive {}: {}", candidate.source_id, e)))
    }
}
