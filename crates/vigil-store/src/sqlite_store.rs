//! SQLite-backed record store.
//!
//! Same contract as the directory store: the `state` column plays the role
//! of the directory. A move is a conditional `UPDATE ... WHERE state = ?`
//! inside a transaction, so a lost race affects zero rows and surfaces as
//! `NotFound`.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use vigil_core::error::{Result, VigilError};
use vigil_core::types::{LifecycleState, RecordId};

use crate::db::{sql_err, Database};
use crate::ledger::DedupLedger;
use crate::record::{format_timestamp, ActionRecord, RecordDocument};
use crate::state_machine::validate_transition;
use crate::store::{RecordStore, StoredRecord};

/// [`RecordStore`] persisted in a single SQLite database.
#[derive(Debug)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::new(path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::in_memory()?,
        })
    }
}

fn parse_state(raw: &str) -> Result<LifecycleState> {
    raw.parse()
        .map_err(|e: String| VigilError::Storage(format!("corrupt state column: {}", e)))
}

impl RecordStore for SqliteRecordStore {
    fn create(&self, record: &ActionRecord, ledger: &DedupLedger) -> Result<RecordId> {
        let id = record.id().clone();
        if ledger.has_seen(&id) {
            return Err(VigilError::DuplicateFingerprint(id.to_string()));
        }
        let now = Utc::now();
        let mut doc = record.to_document()?;
        doc.append_field(LifecycleState::Inbox.entered_at_key(), &format_timestamp(now))?;

        let inserted = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO records (id, state, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    id.as_str(),
                    LifecycleState::Inbox.dir_name(),
                    doc.render(),
                    now.timestamp()
                ],
            )
            .map_err(sql_err("insert record"))
        })?;
        if inserted == 0 {
            return Err(VigilError::DuplicateFingerprint(id.to_string()));
        }
        debug!(record = %id, "Record created in inbox");
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

        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err("begin move"))?;

            let content: Option<String> = tx
                .query_row(
                    "SELECT content FROM records WHERE id = ?1 AND state = ?2",
                    params![id.as_str(), from.dir_name()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("select record"))?;
            let content = content.ok_or_else(|| VigilError::NotFound {
                id: id.to_string(),
                state: from.to_string(),
            })?;

            let now = Utc::now();
            let mut doc = match RecordDocument::parse(&content) {
                Ok(doc) => doc,
                Err(VigilError::MalformedRecord(reason)) => {
                    warn!(record = %id, to = %to, %reason, "Moved record has malformed header; salvaging");
                    RecordDocument::salvage(&content, &reason)?
                }
                Err(e) => return Err(e),
            };
            for (key, value) in additions {
                doc.append_versioned(key, value)?;
            }
            doc.append_versioned(to.entered_at_key(), &format_timestamp(now))?;

            let updated = tx
                .execute(
                    "UPDATE records SET state = ?1, content = ?2, updated_at = ?3
                     WHERE id = ?4 AND state = ?5",
                    params![
                        to.dir_name(),
                        doc.render(),
                        now.timestamp(),
                        id.as_str(),
                        from.dir_name()
                    ],
                )
                .map_err(sql_err("update record"))?;
            if updated == 0 {
                return Err(VigilError::NotFound {
                    id: id.to_string(),
                    state: from.to_string(),
                });
            }
            tx.commit().map_err(sql_err("commit move"))?;
            debug!(record = %id, from = %from, to = %to, "Record moved");
            Ok(doc)
        })
    }

    fn read_in(&self, id: &RecordId, state: LifecycleState) -> Result<RecordDocument> {
        let content: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT content FROM records WHERE id = ?1 AND state = ?2",
                params![id.as_str(), state.dir_name()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("read record"))
        })?;
        let content = content.ok_or_else(|| VigilError::NotFound {
            id: id.to_string(),
            state: state.to_string(),
        })?;
        RecordDocument::parse(&content)
    }

    fn read(&self, id: &RecordId) -> Result<StoredRecord> {
        let row: Option<(String, String)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT state, content FROM records WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err("read record"))
        })?;
        let (state, content) = row.ok_or_else(|| VigilError::NotFound {
            id: id.to_string(),
            state: "any state".to_string(),
        })?;
        Ok(StoredRecord {
            id: id.clone(),
            state: parse_state(&state)?,
            document: RecordDocument::parse(&content)?,
        })
    }

    fn list(&self, state: LifecycleState) -> Result<Vec<RecordId>> {
        let ids: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM records WHERE state = ?1 ORDER BY updated_at ASC, id ASC")
                .map_err(sql_err("list records"))?;
            let rows = stmt
                .query_map(params![state.dir_name()], |row| row.get(0))
                .map_err(sql_err("list records"))?;
            rows.collect::<std::result::Result<Vec<String>, _>>()
                .map_err(sql_err("list records"))
        })?;
        ids.into_iter()
            .map(|raw| {
                raw.parse()
                    .map_err(|e: String| VigilError::Storage(format!("corrupt id column: {}", e)))
            })
            .collect()
    }

    fn locate(&self, id: &RecordId) -> Result<Option<LifecycleState>> {
        let state: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT state FROM records WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("locate record"))
        })?;
        state.as_deref().map(parse_state).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::{Fingerprint, Priority, SourceKind};

    fn record(source: &str) -> ActionRecord {
        ActionRecord {
            fingerprint: Fingerprint::compute(source, "pay invoice", None),
            kind: SourceKind::Transaction,
            source_id: source.to_string(),
            discovered_at: Utc::now(),
            priority: Priority::Urgent,
            summary: "Invoice due".to_string(),
            details: "Amount 120.00".to_string(),
            suggested_next_step: Some("Schedule payment".to_string()),
            extra: vec![("amount".to_string(), "120.00".to_string())],
        }
    }

    fn ledger() -> (tempfile::TempDir, DedupLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DedupLedger::open(dir.path(), "bank").unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_create_and_read() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let (_dir, ledger) = ledger();
        let rec = record("tx-1");
        let id = store.create(&rec, &ledger).unwrap();

        let stored = store.read(&id).unwrap();
        assert_eq!(stored.state, LifecycleState::Inbox);
        let parsed = ActionRecord::from_document(&stored.document).unwrap();
        assert_eq!(parsed.summary, rec.summary);
        assert_eq!(parsed.priority, Priority::Urgent);
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let (_dir, ledger) = ledger();
        store.create(&record("tx-1"), &ledger).unwrap();
        let err = store.create(&record("tx-1"), &ledger).unwrap_err();
        assert!(matches!(err, VigilError::DuplicateFingerprint(_)));
    }

    #[test]
    fn test_move_is_conditional_on_state() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let (_dir, ledger) = ledger();
        let id = store.create(&record("tx-1"), &ledger).unwrap();

        store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::Approved, &[])
            .unwrap();
        let err = store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::Rejected, &[])
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound { .. }));
        assert_eq!(store.locate(&id).unwrap(), Some(LifecycleState::Approved));
    }

    #[test]
    fn test_move_preserves_header_bytes() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let (_dir, ledger) = ledger();
        let id = store.create(&record("tx-1"), &ledger).unwrap();
        let before = store.read(&id).unwrap().document;

        store
            .move_record(&id, LifecycleState::Inbox, LifecycleState::Approved, &[])
            .unwrap();
        let doc = store
            .move_record(
                &id,
                LifecycleState::Approved,
                LifecycleState::Failed,
                &[
                    ("error".to_string(), "timeout".to_string()),
                    ("retry_count".to_string(), "2".to_string()),
                ],
            )
            .unwrap();

        assert!(doc.header_raw().starts_with(before.header_raw()));
        assert_eq!(doc.get("retry_count"), Some("2"));
        assert!(doc.get("failed_at").is_some());
    }

    #[test]
    fn test_move_salvages_malformed_header() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let (_dir, ledger) = ledger();
        let id = store.create(&record("tx-1"), &ledger).unwrap();
        let broken = "---\ntype: action\nthis line has no colon\n---\nbody\n";
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE records SET content = ?1 WHERE id = ?2",
                    params![broken, id.as_str()],
                )
                .map_err(sql_err("corrupt record"))
            })
            .unwrap();
        assert!(matches!(
            store.read_in(&id, LifecycleState::Inbox),
            Err(VigilError::MalformedRecord(_))
        ));

        let doc = store
            .move_record(
                &id,
                LifecycleState::Inbox,
                LifecycleState::Rejected,
                &[("rejection_reason".to_string(), "malformed_record".to_string())],
            )
            .unwrap();
        assert!(doc.is_salvaged());
        assert!(doc.body().contains(broken));

        let stored = store.read_in(&id, LifecycleState::Rejected).unwrap();
        assert_eq!(stored.get("rejection_reason"), Some("malformed_record"));
        assert!(stored.get("rejected_at").is_some());
    }

    #[test]
    fn test_list_by_state() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let (_dir, ledger) = ledger();
        let a = store.create(&record("tx-a"), &ledger).unwrap();
        let b = store.create(&record("tx-b"), &ledger).unwrap();
        store
            .move_record(&a, LifecycleState::Inbox, LifecycleState::PendingApproval, &[])
            .unwrap();

        assert_eq!(store.list(LifecycleState::Inbox).unwrap(), vec![b]);
        assert_eq!(store.list(LifecycleState::PendingApproval).unwrap(), vec![a]);
        assert!(store.list(LifecycleState::Done).unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.db");
        let (_ldir, ledger) = ledger();
        let id = {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.create(&record("tx-1"), &ledger).unwrap()
        };
        let store = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(store.locate(&id).unwrap(), Some(LifecycleState::Inbox));
    }
}
