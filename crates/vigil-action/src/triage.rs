//! Inbox triage: plan, validate, classify, move.
//!
//! For each inbox record the planner is asked for a plan. A plan with steps
//! that do not resolve against the adapter registry sends the record to
//! `rejected`. Otherwise the record goes to `approved` when the plan is
//! classified `auto` and the auto-approve policy allows every step, and to
//! `pending-approval` in every other case. The approval request fields are
//! appended to the record header on the way out of the inbox.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use vigil_core::error::VigilError;
use vigil_core::types::{Classification, LifecycleState, RecordId};
use vigil_store::{ActionRecord, ApprovalRequest, PlanStore, RecordStore};

use crate::adapter::AdapterRegistry;
use crate::error::TriageError;
use crate::planner::Planner;
use crate::policy::AutoApprovePolicy;

/// Counts from one triage pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriageReport {
    pub approved: usize,
    pub pending: usize,
    pub rejected: usize,
    /// The planner has nothing for these yet; they stay in the inbox.
    pub unplanned: usize,
    /// Per-record errors; the records stay in the inbox for the next pass.
    pub failed: usize,
}

enum Disposition {
    Moved(LifecycleState),
    Unplanned,
}

pub struct Triage {
    store: Arc<dyn RecordStore>,
    plans: PlanStore,
    planner: Arc<dyn Planner>,
    registry: Arc<AdapterRegistry>,
    policy: AutoApprovePolicy,
    default_deadline: Option<Duration>,
}

impl Triage {
    pub fn new(
        store: Arc<dyn RecordStore>,
        plans: PlanStore,
        planner: Arc<dyn Planner>,
        registry: Arc<AdapterRegistry>,
        policy: AutoApprovePolicy,
    ) -> Self {
        Self {
            store,
            plans,
            planner,
            registry,
            policy,
            default_deadline: None,
        }
    }

    /// Deadline applied to requires-approval plans that carry none.
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Triage every record currently in the inbox.
    ///
    /// Only storage failures abort the pass.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<TriageReport, TriageError> {
        let mut report = TriageReport::default();
        for id in self.store.list(LifecycleState::Inbox)? {
            match self.triage_one(&id, now).await {
                Ok(Disposition::Moved(LifecycleState::Approved)) => report.approved += 1,
                Ok(Disposition::Moved(LifecycleState::PendingApproval)) => report.pending += 1,
                Ok(Disposition::Moved(_)) => report.rejected += 1,
                Ok(Disposition::Unplanned) => report.unplanned += 1,
                Err(TriageError::Storage(VigilError::NotFound { .. })) => {
                    debug!(record = %id, "Record left the inbox during triage");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(record = %id, error = %e, "Triage failed, will retry next cycle");
                    report.failed += 1;
                }
            }
        }
        if report != TriageReport::default() {
            info!(
                approved = report.approved,
                pending = report.pending,
                rejected = report.rejected,
                unplanned = report.unplanned,
                failed = report.failed,
                "Triage pass complete"
            );
        }
        Ok(report)
    }

    async fn triage_one(&self, id: &RecordId, now: DateTime<Utc>) -> Result<Disposition, TriageError> {
        let doc = match self.store.read_in(id, LifecycleState::Inbox) {
            Ok(doc) => doc,
            Err(VigilError::MalformedRecord(reason)) => return self.reject_malformed(id, &reason),
            Err(e) => return Err(e.into()),
        };
        let record = match ActionRecord::from_document(&doc) {
            Ok(record) => record,
            Err(VigilError::MalformedRecord(reason)) => return self.reject_malformed(id, &reason),
            Err(e) => return Err(e.into()),
        };

        let Some(plan) = self.planner.plan(&record, &doc).await? else {
            return Ok(Disposition::Unplanned);
        };
        if plan.record_id != *id {
            return Err(TriageError::Planner(format!(
                "plan {} belongs to {}, not {}",
                plan.plan_id, plan.record_id, id
            )));
        }

        match self.plans.read(&plan.plan_id) {
            Ok(_) => {}
            Err(VigilError::NotFound { .. }) => self.plans.create(&plan)?,
            Err(e) => return Err(e.into()),
        }

        let request = ApprovalRequest::from_plan(&plan, self.default_deadline.map(|d| now + d));
        let mut additions = request.header_fields()?;

        let target = match self.registry.validate_steps(&request.steps) {
            Err(e) => {
                additions.push(("rejection_reason".to_string(), format!("validation_error: {}", e)));
                LifecycleState::Rejected
            }
            Ok(()) if request.classification == Classification::Auto
                && self.policy.permits_all(&request.steps) =>
            {
                LifecycleState::Approved
            }
            Ok(()) => LifecycleState::PendingApproval,
        };

        self.store
            .move_record(id, LifecycleState::Inbox, target, &additions)?;
        info!(
            record = %id,
            plan = %plan.plan_id,
            classification = %request.classification,
            to = %target,
            "Record triaged"
        );
        Ok(Disposition::Moved(target))
    }

    fn reject_malformed(&self, id: &RecordId, reason: &str) -> Result<Disposition, TriageError> {
        warn!(record = %id, %reason, "Rejecting malformed inbox record");
        self.store.move_record(
            id,
            LifecycleState::Inbox,
            LifecycleState::Rejected,
            &[("rejection_reason".to_string(), format!("malformed_record: {}", reason))],
        )?;
        Ok(Disposition::Moved(LifecycleState::Rejected))
    }
}
