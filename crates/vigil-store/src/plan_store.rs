//! Create-only storage for plan records under `plans/`.

use std::path::PathBuf;

use tracing::{debug, warn};

use vigil_core::error::{Result, VigilError};
use vigil_core::fsutil;
use vigil_core::types::RecordId;

use crate::layout::VaultLayout;
use crate::record::{PlanRecord, RecordDocument};

/// Plans are written once and never modified.
#[derive(Debug, Clone)]
pub struct PlanStore {
    layout: VaultLayout,
}

impl PlanStore {
    pub fn new(layout: VaultLayout) -> Self {
        Self { layout }
    }

    fn plan_path(&self, plan_id: &str) -> PathBuf {
        self.layout.plans_dir().join(format!("{}.md", plan_id))
    }

    /// Store a new plan. Fails if a plan with the same id exists.
    pub fn create(&self, plan: &PlanRecord) -> Result<()> {
        if plan.plan_id.is_empty()
            || !plan
                .plan_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(VigilError::MalformedRecord(format!(
                "invalid plan id: {:?}",
                plan.plan_id
            )));
        }
        let text = plan.to_document()?.render();
        let created = fsutil::create_atomic(
            &self.layout.tmp_dir(),
            &self.plan_path(&plan.plan_id),
            text.as_bytes(),
        )
        .map_err(|e| VigilError::Storage(format!("create plan: {}", e)))?;
        if !created {
            return Err(VigilError::Storage(format!(
                "plan {} already exists",
                plan.plan_id
            )));
        }
        debug!(plan = %plan.plan_id, record = %plan.record_id, "Plan stored");
        Ok(())
    }

    pub fn read(&self, plan_id: &str) -> Result<PlanRecord> {
        let path = self.plan_path(plan_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VigilError::NotFound {
                    id: plan_id.to_string(),
                    state: "plans".to_string(),
                })
            }
            Err(e) => return Err(VigilError::Storage(format!("read plan: {}", e))),
        };
        PlanRecord::from_document(&RecordDocument::parse(&text)?)
    }

    /// All plans written for `record_id`, oldest first.
    pub fn plans_for(&self, record_id: &RecordId) -> Result<Vec<PlanRecord>> {
        let entries = match std::fs::read_dir(self.layout.plans_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VigilError::Storage(format!("list plans: {}", e))),
        };

        let mut plans = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| VigilError::Storage(format!("list plans: {}", e)))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if fsutil::is_hidden(&name) || !name.ends_with(".md") {
                continue;
            }
            let text = match std::fs::read_to_string(entry.path()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping unreadable plan");
                    continue;
                }
            };
            match RecordDocument::parse(&text).and_then(|doc| PlanRecord::from_document(&doc)) {
                Ok(plan) if plan.record_id == *record_id => plans.push(plan),
                Ok(_) => {}
                Err(e) => warn!(file = %name, error = %e, "Skipping malformed plan"),
            }
        }
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(plans)
    }
}

impl PlanStore {
    /// The most recently created plan for `record_id`.
    pub fn latest_for(&self, record_id: &RecordId) -> Result<Option<PlanRecord>> {
        Ok(self.plans_for(record_id)?.pop())
    }
}
