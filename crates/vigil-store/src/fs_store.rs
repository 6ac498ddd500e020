//! Directory-per-state record store.
//!
//! Each lifecycle state is a directory under the vault root and each record
//! is one `<fingerprint>.md` file. A move claims the record with a single
//! `rename` into the target directory, then appends the new header fields
//! in place. Whoever loses a rename race sees `NotFound`.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::Utc;
use tracing::{debug, warn};

use vigil_core::error::{Result, VigilError};
use vigil_core::fsutil;
use vigil_core::types::{LifecycleState, RecordId};

use crate::layout::VaultLayout;
use crate::ledger::DedupLedger;
use crate::record::{format_timestamp, ActionRecord, RecordDocument};
use crate::state_machine::validate_transition;
use crate::store::{RecordStore, StoredRecord};

/// File-system backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    layout: VaultLayout,
}

impl FsRecordStore {
    /// Open a store over `layout`, creating any missing directories.
    pub fn open(layout: VaultLayout) -> Result<Self> {
        layout
            .ensure()
            .map_err(|e| VigilError::Storage(format!("vault {}: {}", layout.root().display(), e)))?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    fn record_path(&self, id: &RecordId, state: LifecycleState) -> PathBuf {
        self.layout.state_dir(state).join(id.file_name())
    }

    fn read_document(&self, id: &RecordId, state: LifecycleState) -> Result<RecordDocument> {
        let path = self.record_path(id, state);
        match std::fs::read_to_string(&path) {
            Ok(text) => RecordDocument::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(id, state)),
            Err(e) => Err(VigilError::Storage(format!("read {}: {}", path.display(), e))),
        }
    }
}

fn not_found(id: &RecordId, state: LifecycleState) -> VigilError {
    VigilError::NotFound {
        id: id.to_string(),
        state: state.to_string(),
    }
}

fn storage(context: &str, e: impl std::fmt::Display) -> VigilError {
    VigilError::Storage(format!("{}: {}", context, e))
}

impl RecordStore for FsRecordStore {
    fn create(&self, record: &ActionRecord, ledger: &DedupLedger) -> Result<RecordId> {
        let id = record.id().clone();
        if ledger.has_seen(&id) {
            return Err(VigilError::DuplicateFingerprint(id.to_string()));
        }
        // Covers a crash between a previous create and its ledger write.
        if let Some(state) = self.locate(&id)? {
            debug!(record = %id, state = %state, "Record already exists");
            return Err(VigilError::DuplicateFingerprint(id.to_string()));
        }

        let mut doc = record.to_document()?;
        doc.append_field(
            LifecycleState::Inbox.entered_at_key(),
            &format_timestamp(Utc::now()),
        )?;
        let target = self.record_path(&id, LifecycleState::Inbox);
        let created = fsutil::create_atomic(&self.layout.tmp_dir(), &target, doc.render().as_bytes())
            .map_err(|e| storage("create record", e))?;
        if !created {
            return Err(VigilError::DuplicateFingerprint(id.to_string()));
        }
        debug!(record = %id, kind = %record.kind, "Record created in inbox");
        Ok(id)
    }

    fn move_record(
        &self,
        id: &RecordId,
        from: LifecycleState,
        to: LifecycleState,
        additions: &[(String, String)],
    ) -> Result<RecordDocument> {
        validate_transition(from, to)?;

        let src = self.record_path(id, from);
        let dst = self.record_path(id, to);
        if dst.exists() {
            return Err(VigilError::DuplicateFingerprint(format!(
                "{} already present in {}",
                id, to
            )));
        }

        // Claim: exactly one mover wins the rename.
        match std::fs::rename(&src, &dst) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found(id, from)),
            Err(e) => return Err(storage("move record", e)),
        }

        let text = std::fs::read_to_string(&dst).map_err(|e| storage("read moved record", e))?;
        let mut doc = match RecordDocument::parse(&text) {
            Ok(doc) => doc,
            Err(VigilError::MalformedRecord(reason)) => {
                warn!(record = %id, to = %to, %reason, "Moved record has malformed header; salvaging");
                RecordDocument::salvage(&text, &reason)?
            }
            Err(e) => return Err(e),
        };

        for (key, value) in additions {
            doc.append_versioned(key, value)?;
        }
        doc.append_versioned(to.entered_at_key(), &format_timestamp(Utc::now()))?;
        fsutil::write_atomic(&self.layout.tmp_dir(), &dst, doc.render().as_bytes())
            .map_err(|e| storage("rewrite moved record", e))?;

        debug!(record = %id, from = %from, to = %to, "Record moved");
        Ok(doc)
    }

    fn read_in(&self, id: &RecordId, state: LifecycleState) -> Result<RecordDocument> {
        self.read_document(id, state)
    }

    fn read(&self, id: &RecordId) -> Result<StoredRecord> {
        for state in LifecycleState::ALL {
            match self.read_document(id, state) {
                Ok(document) => {
                    return Ok(StoredRecord {
                        id: id.clone(),
                        state,
                        document,
                    })
                }
                Err(VigilError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(VigilError::NotFound {
            id: id.to_string(),
            state: "any state".to_string(),
        })
    }

    fn list(&self, state: LifecycleState) -> Result<Vec<RecordId>> {
        let dir = self.layout.state_dir(state);
        let entries = std::fs::read_dir(&dir).map_err(|e| storage("list records", e))?;

        let mut found: Vec<(SystemTime, RecordId)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| storage("list records", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if fsutil::is_hidden(&name) {
                continue;
            }
            let Some(stem) = name.strip_suffix(".md") else {
                continue;
            };
            let id: RecordId = match stem.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(state = %state, file = %name, "Ignoring file without a fingerprint name");
                    continue;
                }
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, id));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    fn locate(&self, id: &RecordId) -> Result<Option<LifecycleState>> {
        for state in LifecycleState::ALL {
            if self.record_path(id, state).exists() {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_core::types::{Fingerprint, Priority, SourceKind};

    fn setup() -> (tempfile::TempDir, FsRecordStore, DedupLedger) {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        let store = FsRecordStore::open(layout.clone()).unwrap();
        let ledger = DedupLedger::open(&layout.ledger_dir(), "test").unwrap();
        (dir, store, ledger)
    }

    fn record(source: &str) -> ActionRecord {
        ActionRecord {
            fingerprint: Fingerprint::compute(source, "please review", None),
            kind: SourceKind::File,
            source_id: source.to_string(),
            discovered_at: Utc::now(),
            priority: Priority::Normal,
            summary: "Review the draft".to_string(),
            details: "A draft was dropped in.".to_string(),
            suggested_next_step: None,
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_create_lands_in_inbox() {
        let (_dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        assert_eq!(store.locate(&id).unwrap(), Some(LifecycleState::Inbox));
        assert_eq!(store.list(LifecycleState::Inbox).unwrap(), vec![id.clone()]);

        let stored = store.read(&id).unwrap();
        assert!(stored.document.get("inbox_at").is_some());
        assert_eq!(stored.document.get("status"), Some("new"));
    }

    #[test]
    fn test_create_rejects_seen_fingerprint() {
        let (_dir, store, mut ledger) = setup();
        let rec = record("a");
        ledger.mark_seen(rec.id(), Utc::now()).unwrap();
        let err = store.create(&rec, &ledger).unwrap_err();
        assert!(matches!(err, VigilError::DuplicateFingerprint(_)));
        assert!(store.list(LifecycleState::Inbox).unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_existing_record_in_any_state() {
        let (_dir, store, ledger) = setup();
        let rec = record("a");
        let id = store.create(&rec, &ledger).unwrap();
        store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::Approved, &[])
            .unwrap();
        let err = store.create(&rec, &ledger).unwrap_err();
        assert!(matches!(err, VigilError::DuplicateFingerprint(_)));
    }

    #[test]
    fn test_move_appends_and_preserves_header() {
        let (_dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        let before = store.read(&id).unwrap().document;

        store
            .move_record(
                &id,
                LifecycleState::Inbox,
                LifecycleState::PendingApproval,
                &[("plan_id".to_string(), "p1".to_string())],
            )
            .unwrap();
        store
            .move_record(
                &id,
                LifecycleState::PendingApproval,
                LifecycleState::Rejected,
                &[("rejection_reason".to_string(), "not needed".to_string())],
            )
            .unwrap();

        let after = store.read(&id).unwrap();
        assert_eq!(after.state, LifecycleState::Rejected);
        assert!(after.document.header_raw().starts_with(before.header_raw()));
        assert_eq!(after.document.body(), before.body());
        assert_eq!(after.document.get("plan_id"), Some("p1"));
        assert_eq!(after.document.get("rejection_reason"), Some("not needed"));
        assert!(after.document.get("pending_approval_at").is_some());
        assert!(after.document.get("rejected_at").is_some());
        assert_eq!(store.locate(&id).unwrap(), Some(LifecycleState::Rejected));
    }

    #[test]
    fn test_move_salvages_malformed_header() {
        let (dir, store, _ledger) = setup();
        let id: RecordId = "00000000000000aa".parse().unwrap();
        let broken = "---\ntype: action\nthis line has no colon\n---\n\n## Summary\n\nx\n";
        std::fs::write(dir.path().join("pending-approval").join(id.file_name()), broken).unwrap();
        assert!(matches!(
            store.read_in(&id, LifecycleState::PendingApproval),
            Err(VigilError::MalformedRecord(_))
        ));

        store
            .move_record(
                &id,
                LifecycleState::PendingApproval,
                LifecycleState::Rejected,
                &[("rejection_reason".to_string(), "malformed_record".to_string())],
            )
            .unwrap();

        let doc = store.read_in(&id, LifecycleState::Rejected).unwrap();
        assert!(doc.is_salvaged());
        assert!(doc.get("malformed_header").unwrap().contains("without ':'"));
        assert_eq!(doc.get("rejection_reason"), Some("malformed_record"));
        assert!(doc.get("rejected_at").is_some());
        assert!(doc.body().contains(broken));
    }

    #[test]
    fn test_second_rejection_is_recorded_under_new_keys() {
        let (dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::PendingApproval, &[])
            .unwrap();
        store
            .move_record(
                &id,
                LifecycleState::PendingApproval,
                LifecycleState::Rejected,
                &[("rejection_reason".to_string(), "first".to_string())],
            )
            .unwrap();

        // An operator puts the rejected file back by hand.
        std::fs::rename(
            dir.path().join("rejected").join(id.file_name()),
            dir.path().join("pending-approval").join(id.file_name()),
        )
        .unwrap();
        let doc = store
            .move_record(
                &id,
                LifecycleState::PendingApproval,
                LifecycleState::Rejected,
                &[("rejection_reason".to_string(), "second".to_string())],
            )
            .unwrap();

        assert_eq!(doc.get("rejection_reason"), Some("first"));
        assert_eq!(doc.get("rejection_reason_2"), Some("second"));
        assert_eq!(doc.latest("rejection_reason"), Some("second"));
        assert!(doc.get("rejected_at_2").is_some());
        assert!(doc.latest_index("rejected_at") > doc.latest_index("pending_approval_at"));
    }

    #[test]
    fn test_move_from_wrong_state_is_not_found() {
        let (_dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        let err = store
            .move_record(&id, LifecycleState::PendingApproval, LifecycleState::Approved, &[])
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound { .. }));
        assert_eq!(store.locate(&id).unwrap(), Some(LifecycleState::Inbox));
    }

    #[test]
    fn test_invalid_transition_leaves_record_in_place() {
        let (_dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        let err = store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::Done, &[])
            .unwrap_err();
        assert!(matches!(err, VigilError::InvalidTransition { .. }));
        assert_eq!(store.locate(&id).unwrap(), Some(LifecycleState::Inbox));
    }

    #[test]
    fn test_concurrent_moves_exactly_one_wins() {
        let (_dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    let to = if i % 2 == 0 {
                        LifecycleState::Approved
                    } else {
                        LifecycleState::Rejected
                    };
                    store.move_record(&id, LifecycleState::Inbox, to, &[]).is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);

        let occupied: Vec<_> = LifecycleState::ALL
            .into_iter()
            .filter(|s| store.record_path(&id, *s).exists())
            .collect();
        assert_eq!(occupied.len(), 1);
    }

    #[test]
    fn test_list_ignores_hidden_and_foreign_files() {
        let (dir, store, ledger) = setup();
        let id = store.create(&record("a"), &ledger).unwrap();
        let inbox = dir.path().join("inbox-of-work");
        std::fs::write(inbox.join(".scratch.md"), "x").unwrap();
        std::fs::write(inbox.join("README.md"), "x").unwrap();
        std::fs::write(inbox.join("notes.txt"), "x").unwrap();
        assert_eq!(store.list(LifecycleState::Inbox).unwrap(), vec![id]);
    }

    #[test]
    fn test_read_unknown_is_not_found() {
        let (_dir, store, _ledger) = setup();
        let id = Fingerprint::compute("nope", "nope", None);
        assert!(matches!(store.read(&id), Err(VigilError::NotFound { .. })));
        assert_eq!(store.locate(&id).unwrap(), None);
    }
}
