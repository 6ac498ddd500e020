//! Approval gate.
//!
//! A human approves or rejects by moving the record file between
//! directories; `approve` and `reject` do the same programmatically.
//! `sweep` runs every orchestrator cycle and rejects pending records whose
//! deadline has passed or whose contents no longer validate. A record put
//! back into pending by hand after a rejection is judged as a new request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use vigil_core::error::VigilError;
use vigil_core::types::{LifecycleState, RecordId};
use vigil_store::{ApprovalRequest, RecordDocument, RecordStore};

use crate::adapter::AdapterRegistry;
use crate::error::{GateError, ValidationError};

pub const EXPIRED_DEADLINE: &str = "expired_deadline";

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub invalid: usize,
}

pub struct ApprovalGate {
    store: Arc<dyn RecordStore>,
    registry: Arc<AdapterRegistry>,
}

/// Read the approval request from a record header.
pub(crate) fn read_request(doc: &RecordDocument) -> Result<ApprovalRequest, ValidationError> {
    ApprovalRequest::from_document(doc).map_err(|e| match e {
        VigilError::MalformedRecord(msg) => {
            ValidationError::UnparseableSteps(msg.trim_start_matches("unparseable steps: ").to_string())
        }
        other => ValidationError::UnparseableSteps(other.to_string()),
    })
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<AdapterRegistry>) -> Self {
        Self { store, registry }
    }

    /// Reject expired and invalid pending records.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, GateError> {
        let mut report = SweepReport::default();
        for id in self.store.list(LifecycleState::PendingApproval)? {
            let reason = match self.store.read_in(&id, LifecycleState::PendingApproval) {
                Ok(doc) => self.rejection_reason(&doc, now),
                Err(VigilError::NotFound { .. }) => continue,
                Err(VigilError::MalformedRecord(reason)) => Some(format!("malformed_record: {}", reason)),
                Err(e) => return Err(e.into()),
            };
            let Some(reason) = reason else { continue };

            match self.move_out(&id, LifecycleState::Rejected, Some(&reason)) {
                Ok(()) => {
                    if reason == EXPIRED_DEADLINE {
                        report.expired += 1;
                    } else {
                        report.invalid += 1;
                    }
                    info!(record = %id, %reason, "Pending record rejected by sweep");
                }
                // A human moved it while we were looking.
                Err(GateError::NotPending(_)) => debug!(record = %id, "Record left pending during sweep"),
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Approve a pending record after re-validating its steps.
    pub fn approve(&self, id: &RecordId) -> Result<(), GateError> {
        let doc = match self.store.read_in(id, LifecycleState::PendingApproval) {
            Ok(doc) => doc,
            Err(VigilError::NotFound { .. }) => return Err(GateError::NotPending(id.to_string())),
            Err(e) => return Err(e.into()),
        };
        let request = read_request(&doc)?;
        self.registry.validate_steps(&request.steps)?;
        self.move_out(id, LifecycleState::Approved, None)?;
        info!(record = %id, plan = %request.plan_id, "Record approved");
        Ok(())
    }

    /// Reject a pending record with a reason.
    pub fn reject(&self, id: &RecordId, reason: &str) -> Result<(), GateError> {
        self.move_out(id, LifecycleState::Rejected, Some(reason))?;
        info!(record = %id, %reason, "Record rejected");
        Ok(())
    }

    /// Why a pending record must leave, if it must.
    fn rejection_reason(&self, doc: &RecordDocument, now: DateTime<Utc>) -> Option<String> {
        match read_request(doc) {
            Err(e) => Some(format!("validation_error: {}", e)),
            Ok(request) if request.is_expired(now) => Some(EXPIRED_DEADLINE.to_string()),
            Ok(request) => self
                .registry
                .validate_steps(&request.steps)
                .err()
                .map(|e| format!("validation_error: {}", e)),
        }
    }

    fn move_out(&self, id: &RecordId, to: LifecycleState, reason: Option<&str>) -> Result<(), GateError> {
        let additions: Vec<(String, String)> = reason
            .map(|r| vec![("rejection_reason".to_string(), r.to_string())])
            .unwrap_or_default();
        match self
            .store
            .move_record(id, LifecycleState::PendingApproval, to, &additions)
        {
            Ok(_) => Ok(()),
            Err(VigilError::NotFound { .. }) => Err(GateError::NotPending(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
