//! Vigil watchers - producers that turn external events into records.
//!
//! A [`Watcher`] only knows how to poll its source. The [`WatcherHarness`]
//! owns everything else: fingerprinting, the dedup ledger, record creation,
//! heartbeats and the poll loop.

pub mod drop_folder;
pub mod error;
pub mod harness;
pub mod watcher;

pub use drop_folder::DropFolderWatcher;
pub use error::WatchError;
pub use harness::{CycleReport, HarnessSettings, WatcherHarness};
pub use watcher::{CandidateEvent, Watcher};
