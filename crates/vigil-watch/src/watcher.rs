//! The producer boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_core::types::{Fingerprint, Priority, SourceKind};
use vigil_store::record::ActionRecord;

use crate::error::WatchError;

/// One event seen by a watcher, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    /// Stable id of the event in its source (message id, file name, ...).
    pub source_id: String,
    /// The content the fingerprint is computed over.
    pub content: String,
    pub kind: SourceKind,
    pub priority: Priority,
    pub summary: String,
    pub details: String,
    pub suggested_next_step: Option<String>,
    /// Discovery window start, for sources without stable event ids.
    pub window: Option<DateTime<Utc>>,
    /// Kind-specific header fields.
    pub extra: Vec<(String, String)>,
}

impl CandidateEvent {
    pub fn new(
        source_id: impl Into<String>,
        content: impl Into<String>,
        kind: SourceKind,
        summary: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            source_id: source_id.into(),
            details: content.clone(),
            content,
            kind,
            priority: Priority::default(),
            summary: summary.into(),
            suggested_next_step: None,
            window: None,
            extra: Vec::new(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.source_id, &self.content, self.window)
    }

    /// Build the action record for this candidate.
    pub fn to_record(&self, discovered_at: DateTime<Utc>) -> Result<ActionRecord, WatchError> {
        if self.source_id.trim().is_empty() {
            return Err(WatchError::Malformed("empty source id".to_string()));
        }
        if self.summary.trim().is_empty() {
            return Err(WatchError::Malformed(format!(
                "{}: empty summary",
                self.source_id
            )));
        }
        Ok(ActionRecord {
            fingerprint: self.fingerprint(),
            kind: self.kind,
            source_id: self.source_id.clone(),
            discovered_at,
            priority: self.priority,
            summary: self.summary.clone(),
            details: self.details.clone(),
            suggested_next_step: self.suggested_next_step.clone(),
            extra: self.extra.clone(),
        })
    }
}

/// An external event source.
#[async_trait]
pub trait Watcher: Send {
    /// Component name; also names the ledger and heartbeat files.
    fn name(&self) -> &str;

    /// Return the events currently visible in the source.
    ///
    /// Returning an event that was already turned into a record is fine;
    /// the harness drops it via the ledger.
    async fn poll(&mut self) -> Result<Vec<CandidateEvent>, WatchError>;

    /// Called once a candidate is durably recorded (or known duplicate).
    async fn acknowledge(&mut self, _candidate: &CandidateEvent) -> Result<(), WatchError> {
        Ok(())
    }
}
