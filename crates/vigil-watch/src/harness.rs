//! Poll loop, dedup and heartbeats around one watcher.

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
use vigil_store::{DedupLedger, RecordStore, VaultLayout};

use crate::error::WatchError;
use crate::watcher::{CandidateEvent, Watcher};

/// Timing knobs for one harness.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub ledger_retention: chrono::Duration,
}

impl HarnessSettings {
    pub fn from_config(config: &VigilConfig, watcher: &str) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.watchers.interval_for(watcher)),
            heartbeat_interval: Duration::from_secs(config.health.heartbeat_interval_secs),
            ledger_retention: chrono::Duration::days(config.ledger.retention_days as i64),
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub emitted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub poll_failed: bool,
}

/// Runs one watcher against the record store.
pub struct WatcherHarness {
    watcher: Box<dyn Watcher>,
    store: Arc<dyn RecordStore>,
    ledger: DedupLedger,
    health_dir: PathBuf,
    settings: HarnessSettings,
    cycles: u64,
}

impl WatcherHarness {
    /// Attach `watcher` to the store, opening its ledger.
    pub fn new(
        watcher: Box<dyn Watcher>,
        store: Arc<dyn RecordStore>,
        layout: &VaultLayout,
        settings: HarnessSettings,
    ) -> Result<Self, WatchError> {
        let ledger = DedupLedger::open(&layout.ledger_dir(), watcher.name())?;
        Ok(Self {
            watcher,
            store,
            ledger,
            health_dir: layout.health_dir(),
            settings,
            cycles: 0,
        })
    }

    pub fn component_name(&self) -> String {
        format!("watcher-{}", self.watcher.name())
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Poll once and persist every new candidate.
    ///
    /// Only a storage-layer failure is returned as an error; everything else
    /// is logged and reflected in the report.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, WatchError> {
        self.cycles += 1;
        let mut report = CycleReport::default();
        let name = self.watcher.name().to_string();

        let candidates = match self.watcher.poll().await {
            Ok(c) => c,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(watcher = %name, error = %e, "Poll failed; retrying next cycle");
                report.poll_failed = true;
                return Ok(report);
            }
        };

        for candidate in candidates {
            match self.persist(&candidate) {
                Ok(true) => report.emitted += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(watcher = %name, source = %candidate.source_id, error = %e, "Skipping candidate");
                    report.skipped += 1;
                    continue;
                }
            }
            if let Err(e) = self.watcher.acknowledge(&candidate).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(watcher = %name, source = %candidate.source_id, error = %e, "Acknowledge failed");
            }
        }

        debug!(
            watcher = %name,
            cycle = self.cycles,
            emitted = report.emitted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Watcher cycle complete"
        );
        Ok(report)
    }

    /// Returns `Ok(true)` for a new record, `Ok(false)` for a duplicate.
    fn persist(&mut self, candidate: &CandidateEvent) -> Result<bool, WatchError> {
        let fingerprint = candidate.fingerprint();
        if self.ledger.has_seen(&fingerprint) {
            return Ok(false);
        }
        let now = Utc::now();
        let record = candidate.to_record(now)?;
        match self.store.create(&record, &self.ledger) {
            Ok(id) => {
                self.ledger.mark_seen(&id, now)?;
                info!(watcher = %self.watcher.name(), record = %id, kind = %record.kind, "Record created");
                Ok(true)
            }
            Err(VigilError::DuplicateFingerprint(_)) => {
                // Created before a crash that lost the ledger write.
                self.ledger.mark_seen(&fingerprint, now)?;
                Ok(false)
            }
            Err(VigilError::MalformedRecord(msg)) => Err(WatchError::Malformed(msg)),
            Err(e) => Err(e.into()),
        }
    }

    /// Write this harness's heartbeat. Failures are logged, not fatal.
    pub fn beat(&self) {
        let hb = Heartbeat::now(&self.component_name(), self.cycles, "healthy");
        if let Err(e) = write_heartbeat(&self.health_dir, &hb) {
            warn!(component = %hb.component, error = %e, "Heartbeat write failed");
        }
    }

    /// Drop ledger entries past retention whose records are resolved.
    pub fn prune_ledger(&mut self) -> Result<usize, WatchError> {
        let store = Arc::clone(&self.store);
        let pruned = self.ledger.prune(Utc::now(), self.settings.ledger_retention, |fp| {
            match store.locate(fp) {
                Ok(Some(state)) => !state.is_terminal(),
                Ok(None) => false,
                Err(_) => true,
            }
        })?;
        if pruned > 0 {
            info!(watcher = %self.watcher.name(), pruned, "Ledger pruned");
        }
        Ok(pruned)
    }

    /// Poll on a fixed interval until `shutdown` flips to true.
    ///
    /// The in-flight cycle always completes before the loop exits. A
    /// storage failure stops the loop and is returned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WatchError> {
        let component = self.component_name();
        info!(component = %component, interval = ?self.settings.poll_interval, "Watcher started");

        if let Err(e) = self.prune_ledger() {
            error!(critical = true, component = %component, error = %e, "Ledger prune failed");
            return Err(e);
        }

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(critical = true, component = %component, error = %e, "Storage failure; watcher halting");
                        return Err(e);
                    }
                }
                _ = heartbeat.tick() => self.beat(),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.beat();
        info!(component = %component, cycles = self.cycles, "Watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use vigil_core::types::{LifecycleState, SourceKind};
    use vigil_store::FsRecordStore;

    /// Returns a scripted poll result per cycle, then nothing.
    struct ScriptedWatcher {
        script: VecDeque<Result<Vec<CandidateEvent>, WatchError>>,
        acked: Vec<String>,
    }

    #[async_trait]
    impl Watcher for ScriptedWatcher {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn poll(&mut self) -> Result<Vec<CandidateEvent>, WatchError> {
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn acknowledge(&mut self, candidate: &CandidateEvent) -> Result<(), WatchError> {
            self.acked.push(candidate.source_id.clone());
            Ok(())
        }
    }

    fn settings() -> HarnessSettings {
        HarnessSettings {
            poll_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(60),
            ledger_retention: chrono::Duration::days(30),
        }
    }

    fn event(id: &str) -> CandidateEvent {
        CandidateEvent::new(id, format!("content of {}", id), SourceKind::Message, "New message")
    }

    fn harness(
        script: Vec<Result<Vec<CandidateEvent>, WatchError>>,
    ) -> (tempfile::TempDir, Arc<FsRecordStore>, WatcherHarness) {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        let store = Arc::new(FsRecordStore::open(layout.clone()).unwrap());
        let watcher = ScriptedWatcher {
            script: script.into(),
            acked: Vec::new(),
        };
        let h = WatcherHarness::new(Box::new(watcher), store.clone(), &layout, settings()).unwrap();
        (dir, store, h)
    }

    #[tokio::test]
    async fn test_same_event_twice_yields_one_record() {
        let (_dir, store, mut h) = harness(vec![Ok(vec![event("m1")]), Ok(vec![event("m1")])]);

        let first = h.run_cycle().await.unwrap();
        let second = h.run_cycle().await.unwrap();
        assert_eq!(first.emitted, 1);
        assert_eq!(second.emitted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.list(LifecycleState::Inbox).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_poll() {
        let (_dir, store, mut h) = harness(vec![Ok(vec![event("m1"), event("m1"), event("m2")])]);
        let report = h.run_cycle().await.unwrap();
        assert_eq!(report.emitted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.list(LifecycleState::Inbox).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        let store: Arc<FsRecordStore> = Arc::new(FsRecordStore::open(layout.clone()).unwrap());

        for _ in 0..2 {
            let watcher = ScriptedWatcher {
                script: vec![Ok(vec![event("m1")])].into(),
                acked: Vec::new(),
            };
            let mut h =
                WatcherHarness::new(Box::new(watcher), store.clone(), &layout, settings()).unwrap();
            h.run_cycle().await.unwrap();
        }
        assert_eq!(store.list(LifecycleState::Inbox).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_failure_is_not_fatal() {
        let (_dir, store, mut h) = harness(vec![
            Err(WatchError::Poll("timeout".into())),
            Ok(vec![event("m1")]),
        ]);
        let report = h.run_cycle().await.unwrap();
        assert!(report.poll_failed);
        let report = h.run_cycle().await.unwrap();
        assert_eq!(report.emitted, 1);
        assert_eq!(store.list(LifecycleState::Inbox).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_candidate_skipped() {
        let mut bad = event("m0");
        bad.summary = String::new();
        let (_dir, _store, mut h) = harness(vec![Ok(vec![bad, event("m1")])]);
        let report = h.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.emitted, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_fatal() {
        let (dir, _store, mut h) = harness(vec![Ok(vec![event("m1")])]);
        std::fs::remove_dir_all(dir.path().join("inbox-of-work")).unwrap();
        let err = h.run_cycle().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_heartbeat_written() {
        let (dir, _store, mut h) = harness(vec![]);
        h.run_cycle().await.unwrap();
        h.beat();
        let hb = vigil_core::heartbeat::read_heartbeat(&dir.path().join(".health"), "watcher-scripted")
            .unwrap()
            .unwrap();
        assert_eq!(hb.cycle_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (_dir, store, h) = harness(vec![Ok(vec![event("m1")])]);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(store.list(LifecycleState::Inbox).unwrap().len(), 1);
    }
}
