//! Vigil storage crate - durable record store, dedup ledger, plan store.
//!
//! Records are structured text documents (header + markdown body) whose
//! lifecycle state is the directory (or table row state) they live in.
//! Two backends implement the same [`RecordStore`] contract: a
//! directory-per-state vault and a SQLite database.

pub mod db;
pub mod fs_store;
pub mod layout;
pub mod ledger;
pub mod migrations;
pub mod plan_store;
pub mod record;
pub mod sqlite_store;
pub mod state_machine;
pub mod store;

pub use db::Database;
pub use fs_store::FsRecordStore;
pub use layout::VaultLayout;
pub use ledger::{DedupLedger, LedgerEntry};
pub use plan_store::PlanStore;
pub use record::{ActionRecord, ApprovalRequest, PlanRecord, RecordDocument};
pub use sqlite_store::SqliteRecordStore;
pub use state_machine::{allowed_targets, validate_transition};
pub use store::{RecordStore, StoredRecord};
