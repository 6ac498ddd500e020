//! The record store contract shared by both backends.

use vigil_core::error::Result;
use vigil_core::types::{LifecycleState, RecordId};

use crate::ledger::DedupLedger;
use crate::record::{ActionRecord, RecordDocument};

/// A record together with the state it currently occupies.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: RecordId,
    pub state: LifecycleState,
    pub document: RecordDocument,
}

/// Durable, state-partitioned record storage.
///
/// A record occupies exactly one state at a time. Moves are the only way
/// a record changes state, and they only ever append header fields.
pub trait RecordStore: Send + Sync {
    /// Create `record` in the inbox.
    ///
    /// Fails with `DuplicateFingerprint` if the ledger has already seen the
    /// fingerprint or a record with this id already exists.
    fn create(&self, record: &ActionRecord, ledger: &DedupLedger) -> Result<RecordId>;

    /// Move a record from `from` to `to`, appending `additions` and the
    /// `<to>_at` timestamp to its header.
    ///
    /// Fails with `NotFound` if the record is not in `from` when the move
    /// happens (another actor moved it first).
    fn move_record(
        &self,
        id: &RecordId,
        from: LifecycleState,
        to: LifecycleState,
        additions: &[(String, String)],
    ) -> Result<RecordDocument>;

    /// Read a record that must currently be in `state`.
    fn read_in(&self, id: &RecordId, state: LifecycleState) -> Result<RecordDocument>;

    /// Read a record from whatever state it is in.
    fn read(&self, id: &RecordId) -> Result<StoredRecord>;

    /// Ids of the records in `state`, oldest first.
    fn list(&self, state: LifecycleState) -> Result<Vec<RecordId>>;

    /// Where the record currently lives, if anywhere.
    fn locate(&self, id: &RecordId) -> Result<Option<LifecycleState>>;
}
