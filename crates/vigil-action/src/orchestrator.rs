//! Orchestrator: the consumer loop over `approved`.
//!
//! Each cycle sweeps the approval gate, triages the inbox, then executes
//! every approved record step by step under the retry policy. A record
//! ends in `done` when every step succeeds and in `failed` at the first
//! step that fails for good. Every invocation (or simulated invocation in
//! dry-run mode) produces one audit entry.
//!
//! Records are moved out of `approved` only after their steps have run, so
//! a record interrupted by a crash is picked up again on the next cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vigil_core::config::VigilConfig;
use vigil_core::error::VigilError;
use vigil_core::heartbeat::{write_heartbeat, Heartbeat};
use vigil_core::types::{ExecutionStatus, LifecycleState, PlanStep, RecordId};
use vigil_store::{RecordStore, VaultLayout};

use crate::adapter::AdapterRegistry;
use crate::audit::{AuditEntry, AuditLogger};
use crate::error::ExecutionError;
use crate::gate::{read_request, ApprovalGate, SweepReport};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::triage::{Triage, TriageReport};

pub const COMPONENT_NAME: &str = "orchestrator";

const AUDIT_ARCHIVE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Simulate every adapter call instead of invoking it.
    pub dry_run: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &VigilConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.orchestrator.poll_interval_secs),
            heartbeat_interval: Duration::from_secs(config.health.heartbeat_interval_secs),
            dry_run: config.general.dry_run,
        }
    }
}

/// What happened to one approved record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Done { steps: usize },
    Failed { error: String, retry_count: u32 },
    /// Another actor moved the record out of `approved` first.
    Gone,
}

/// Counts from one orchestrator cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorCycle {
    pub sweep: SweepReport,
    pub triage: TriageReport,
    pub done: usize,
    pub failed: usize,
    pub gone: usize,
    /// Records left in `approved` after a non-fatal error.
    pub deferred: usize,
}

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    registry: Arc<AdapterRegistry>,
    gate: ApprovalGate,
    triage: Triage,
    retry: RetryPolicy,
    audit: AuditLogger,
    health_dir: PathBuf,
    settings: OrchestratorSettings,
    cycles: u64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<AdapterRegistry>,
        triage: Triage,
        retry: RetryPolicy,
        audit: AuditLogger,
        layout: &VaultLayout,
        settings: OrchestratorSettings,
    ) -> Self {
        let gate = ApprovalGate::new(Arc::clone(&store), Arc::clone(&registry));
        Self {
            store,
            registry,
            gate,
            triage,
            retry,
            audit,
            health_dir: layout.health_dir(),
            settings,
            cycles: 0,
        }
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Sweep, triage, then execute everything in `approved`.
    ///
    /// Returns an error only for storage failures; the caller must halt.
    pub async fn run_cycle(&mut self) -> Result<OrchestratorCycle, ExecutionError> {
        self.cycles += 1;
        let now = Utc::now();
        let mut cycle = OrchestratorCycle::default();

        match self.gate.sweep(now) {
            Ok(report) => cycle.sweep = report,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!(error = %e, "Approval sweep failed"),
        }

        match self.triage.run_cycle(now).await {
            Ok(report) => cycle.triage = report,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!(error = %e, "Triage failed"),
        }

        for id in self.store.list(LifecycleState::Approved)? {
            match self.execute_record(&id).await {
                Ok(ExecutionOutcome::Done { .. }) => cycle.done += 1,
                Ok(ExecutionOutcome::Failed { .. }) => cycle.failed += 1,
                Ok(ExecutionOutcome::Gone) => cycle.gone += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(record = %id, error = %e, "Execution deferred to next cycle");
                    cycle.deferred += 1;
                }
            }
        }

        debug!(
            cycle = self.cycles,
            expired = cycle.sweep.expired,
            done = cycle.done,
            failed = cycle.failed,
            "Orchestrator cycle complete"
        );
        Ok(cycle)
    }

    /// Execute one approved record and move it to its terminal state.
    pub async fn execute_record(&self, id: &RecordId) -> Result<ExecutionOutcome, ExecutionError> {
        let doc = match self.store.read_in(id, LifecycleState::Approved) {
            Ok(doc) => doc,
            Err(VigilError::NotFound { .. }) => return Ok(ExecutionOutcome::Gone),
            Err(VigilError::MalformedRecord(reason)) => {
                let error = format!("malformed_record: {}", reason);
                self.audit_failure(id, None, &error, 0)?;
                return self.finish_failed(id, &error, 0);
            }
            Err(e) => return Err(e.into()),
        };

        let request = match read_request(&doc) {
            Ok(request) => request,
            Err(e) => {
                let error = format!("validation_error: {}", e);
                self.audit_failure(id, None, &error, 0)?;
                return self.finish_failed(id, &error, 0);
            }
        };

        for step in &request.steps {
            let (adapter, kind) = match self.registry.resolve(step) {
                Ok(resolved) => resolved,
                Err(e) => {
                    let error = e.to_string();
                    self.audit_failure(id, Some(step), &error, 0)?;
                    return self.finish_failed(id, &error, 0);
                }
            };

            let outcome = if self.settings.dry_run {
                RetryOutcome {
                    result: Ok(adapter.simulate(kind, &step.params)),
                    attempts: 0,
                    elapsed: Duration::ZERO,
                }
            } else {
                let adapter = &adapter;
                let params = &step.params;
                self.retry.run(move |_| adapter.invoke(kind, params)).await
            };

            let entry = AuditEntry {
                timestamp: Utc::now(),
                record_id: id.to_string(),
                action_kind: kind.to_string(),
                adapter: step.adapter.clone(),
                operation: step.operation.clone(),
                inputs: serde_json::Value::Object(step.params.clone()),
                outputs: match &outcome.result {
                    Ok(output) => output.to_value(),
                    Err(_) => serde_json::Value::Null,
                },
                execution_status: if outcome.result.is_ok() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failure
                },
                error: outcome.result.as_ref().err().map(|e| e.to_string()),
                retry_count: outcome.retry_count(),
                attempts: outcome.attempts,
                elapsed_ms: outcome.elapsed_ms(),
                dry_run: self.settings.dry_run,
            };
            self.audit.log(entry)?;

            if let Err(ref e) = outcome.result {
                warn!(
                    record = %id,
                    adapter = %step.adapter,
                    operation = %kind,
                    class = %e.class,
                    attempts = outcome.attempts,
                    "Step failed"
                );
                return self.finish_failed(id, &e.to_string(), outcome.retry_count());
            }
        }

        let mut additions = Vec::new();
        if self.settings.dry_run {
            additions.push(("dry_run".to_string(), "true".to_string()));
        }
        match self
            .store
            .move_record(id, LifecycleState::Approved, LifecycleState::Done, &additions)
        {
            Ok(_) => {
                info!(record = %id, steps = request.steps.len(), dry_run = self.settings.dry_run, "Record done");
                Ok(ExecutionOutcome::Done {
                    steps: request.steps.len(),
                })
            }
            Err(VigilError::NotFound { .. }) => {
                warn!(record = %id, "Record moved by another actor before completion");
                Ok(ExecutionOutcome::Gone)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn audit_failure(
        &self,
        id: &RecordId,
        step: Option<&PlanStep>,
        error: &str,
        retry_count: u32,
    ) -> Result<(), ExecutionError> {
        self.audit.log(AuditEntry {
            timestamp: Utc::now(),
            record_id: id.to_string(),
            action_kind: step.map(|s| s.operation.clone()).unwrap_or_default(),
            adapter: step.map(|s| s.adapter.clone()).unwrap_or_default(),
            operation: step.map(|s| s.operation.clone()).unwrap_or_default(),
            inputs: step
                .map(|s| serde_json::Value::Object(s.params.clone()))
                .unwrap_or(serde_json::Value::Null),
            outputs: serde_json::Value::Null,
            execution_status: ExecutionStatus::Failure,
            error: Some(error.to_string()),
            retry_count,
            attempts: 0,
            elapsed_ms: 0,
            dry_run: self.settings.dry_run,
        })?;
        Ok(())
    }

    fn finish_failed(
        &self,
        id: &RecordId,
        error: &str,
        retry_count: u32,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let error = self.audit.sanitizer().sanitize(error);
        let additions = vec![
            ("error".to_string(), error.clone()),
            ("retry_count".to_string(), retry_count.to_string()),
        ];
        match self
            .store
            .move_record(id, LifecycleState::Approved, LifecycleState::Failed, &additions)
        {
            Ok(_) => {
                info!(record = %id, retry_count, "Record failed");
                Ok(ExecutionOutcome::Failed { error, retry_count })
            }
            Err(VigilError::NotFound { .. }) => {
                warn!(record = %id, "Record moved by another actor before failure was recorded");
                Ok(ExecutionOutcome::Gone)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn beat(&self) {
        let hb = Heartbeat::now(COMPONENT_NAME, self.cycles, "healthy");
        if let Err(e) = write_heartbeat(&self.health_dir, &hb) {
            warn!(component = COMPONENT_NAME, error = %e, "Heartbeat write failed");
        }
    }

    fn archive_audit(&self) {
        if let Err(e) = self.audit.archive_expired(Utc::now()) {
            warn!(error = %e, "Audit archive failed");
        }
    }

    /// Poll `approved` until `shutdown` flips to true.
    ///
    /// The in-flight cycle completes before the loop exits. A storage
    /// failure stops the loop and is returned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ExecutionError> {
        info!(
            interval = ?self.settings.poll_interval,
            dry_run = self.settings.dry_run,
            "Orchestrator started"
        );

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut archive = tokio::time::interval(AUDIT_ARCHIVE_INTERVAL);
        archive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(critical = true, component = COMPONENT_NAME, error = %e, "Storage failure; orchestrator halting");
                        return Err(e);
                    }
                }
                _ = heartbeat.tick() => self.beat(),
                _ = archive.tick() => self.archive_audit(),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.beat();
        info!(cycles = self.cycles, "Orchestrator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use vigil_core::types::{Classification, Fingerprint, Priority, RiskSummary, SourceKind};
    use vigil_store::{ActionRecord, ApprovalRequest, DedupLedger, FsRecordStore, PlanRecord, PlanStore};

    use crate::adapter::{ActionAdapter, NotifyAdapter};
    use crate::error::AdapterError;
    use crate::planner::FilePlanner;
    use crate::policy::AutoApprovePolicy;
    use crate::types::{ActionKind, AdapterOutput, Params};

    /// Moves the record it is executing for out of `approved` mid-flight.
    struct Interloper {
        store: Arc<FsRecordStore>,
        id: RecordId,
    }

    #[async_trait]
    impl ActionAdapter for Interloper {
        fn name(&self) -> &str {
            "interloper"
        }
        fn operations(&self) -> Vec<ActionKind> {
            vec![ActionKind::Notify]
        }
        async fn invoke(&self, _: ActionKind, _: &Params) -> Result<AdapterOutput, AdapterError> {
            self.store
                .move_record(&self.id, LifecycleState::Approved, LifecycleState::Failed, &[])
                .map_err(|e| AdapterError::permanent(e.to_string()))?;
            Ok(AdapterOutput::new("moved it"))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: VaultLayout,
        store: Arc<FsRecordStore>,
        ledger: DedupLedger,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        let store = Arc::new(FsRecordStore::open(layout.clone()).unwrap());
        let ledger = DedupLedger::open(&layout.ledger_dir(), "test").unwrap();
        Fixture {
            _dir: dir,
            layout,
            store,
            ledger,
        }
    }

    fn approved(f: &Fixture, adapter: &str) -> RecordId {
        let record = ActionRecord {
            fingerprint: Fingerprint::compute(adapter, "go", None),
            kind: SourceKind::Manual,
            source_id: adapter.into(),
            discovered_at: Utc::now(),
            priority: Priority::Normal,
            summary: "Go".into(),
            details: "go".into(),
            suggested_next_step: None,
            extra: Vec::new(),
        };
        let id = f.store.create(&record, &f.ledger).unwrap();
        let plan = PlanRecord::new(
            id.clone(),
            Classification::Auto,
            vec![PlanStep {
                adapter: adapter.into(),
                operation: "notify".into(),
                params: json!({"message": "hello"}).as_object().cloned().unwrap(),
            }],
            "test",
            RiskSummary::default(),
        );
        let additions = ApprovalRequest::from_plan(&plan, None).header_fields().unwrap();
        f.store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::Approved, &additions)
            .unwrap();
        id
    }

    fn orchestrator(f: &Fixture, registry: AdapterRegistry, dry_run: bool) -> Orchestrator {
        let registry = Arc::new(registry);
        let plans = PlanStore::new(f.layout.clone());
        let triage = Triage::new(
            f.store.clone(),
            plans.clone(),
            Arc::new(FilePlanner::new(plans)),
            Arc::clone(&registry),
            AutoApprovePolicy::default(),
        );
        Orchestrator::new(
            f.store.clone(),
            registry,
            triage,
            RetryPolicy::default(),
            AuditLogger::new(&f.layout, 90),
            &f.layout,
            OrchestratorSettings {
                poll_interval: Duration::from_secs(10),
                heartbeat_interval: Duration::from_secs(60),
                dry_run,
            },
        )
    }

    #[tokio::test]
    async fn test_success_moves_to_done_and_audits() {
        let f = fixture();
        let id = approved(&f, "notify");
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NotifyAdapter)).unwrap();
        let mut orch = orchestrator(&f, registry, false);

        let cycle = orch.run_cycle().await.unwrap();
        assert_eq!(cycle.done, 1);
        assert_eq!(f.store.locate(&id).unwrap(), Some(LifecycleState::Done));

        let entries = orch.audit().query(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].execution_status, ExecutionStatus::Success);
        assert_eq!(entries[0].attempts, 1);
        assert!(!entries[0].dry_run);
    }

    #[tokio::test]
    async fn test_unknown_adapter_fails_without_retry() {
        let f = fixture();
        let id = approved(&f, "fax");
        let orch = orchestrator(&f, AdapterRegistry::new(), false);

        let outcome = orch.execute_record(&id).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { retry_count: 0, .. }));
        let doc = f.store.read_in(&id, LifecycleState::Failed).unwrap();
        assert_eq!(doc.get("error"), Some("unknown adapter: fax"));
        assert_eq!(doc.get("retry_count"), Some("0"));
    }

    #[tokio::test]
    async fn test_record_moved_mid_flight_is_not_fatal() {
        let f = fixture();
        let id = approved(&f, "interloper");
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(Interloper {
                store: f.store.clone(),
                id: id.clone(),
            }))
            .unwrap();
        let orch = orchestrator(&f, registry, false);

        let outcome = orch.execute_record(&id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Gone);
        assert_eq!(f.store.locate(&id).unwrap(), Some(LifecycleState::Failed));
    }

    #[tokio::test]
    async fn test_malformed_approved_record_fails_once() {
        let f = fixture();
        let id: RecordId = "00000000000000aa".parse().unwrap();
        std::fs::write(
            f.layout.state_dir(LifecycleState::Approved).join(id.file_name()),
            "---\ntype: action\nthis line has no colon\n---\nbody\n",
        )
        .unwrap();
        let mut orch = orchestrator(&f, AdapterRegistry::new(), false);

        let cycle = orch.run_cycle().await.unwrap();
        assert_eq!(cycle.failed, 1);
        let doc = f.store.read_in(&id, LifecycleState::Failed).unwrap();
        assert!(doc.get("error").unwrap().starts_with("malformed_record: "));
        assert_eq!(doc.get("retry_count"), Some("0"));
        assert!(doc.body().contains("this line has no colon"));

        let entries = orch.audit().query(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].execution_status, ExecutionStatus::Failure);

        // Not picked up again.
        let cycle = orch.run_cycle().await.unwrap();
        assert_eq!(cycle.failed, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_written() {
        let f = fixture();
        let orch = orchestrator(&f, AdapterRegistry::new(), false);
        orch.beat();
        let hb = vigil_core::heartbeat::read_heartbeat(&f.layout.health_dir(), COMPONENT_NAME)
            .unwrap()
            .unwrap();
        assert_eq!(hb.component, COMPONENT_NAME);
    }
}
