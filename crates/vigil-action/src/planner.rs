//! Planner boundary.
//!
//! The planner proposes a plan for an inbox record. How it reasons is out of
//! scope here; triage only consumes its output.

use async_trait::async_trait;

use vigil_store::{ActionRecord, PlanRecord, PlanStore, RecordDocument};

use crate::error::TriageError;

/// Source of plans for inbox records.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose a plan for `record`, or `None` if it is not planned yet.
    async fn plan(
        &self,
        record: &ActionRecord,
        document: &RecordDocument,
    ) -> Result<Option<PlanRecord>, TriageError>;
}

/// Picks up plan files an external planner has written into `plans/`.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    plans: PlanStore,
}

impl FilePlanner {
    pub fn new(plans: PlanStore) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl Planner for FilePlanner {
    async fn plan(
        &self,
        record: &ActionRecord,
        _document: &RecordDocument,
    ) -> Result<Option<PlanRecord>, TriageError> {
        Ok(self.plans.latest_for(record.id())?)
    }
}
