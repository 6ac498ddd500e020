use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Fingerprint
// =============================================================================

/// Width of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 16;

/// Stable content hash identifying a source event.
///
/// The fingerprint doubles as the record id: record file names are derived
/// from it, so two producers never write the same path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

/// Records are addressed by the fingerprint of the event that produced them.
pub type RecordId = Fingerprint;

impl Fingerprint {
    /// Hash `(source_id, normalized content, discovery window)`.
    ///
    /// `window` is the start of the discovery window for sources that have
    /// no stable event id; sources with stable ids pass `None`.
    pub fn compute(source_id: &str, content: &str, window: Option<DateTime<Utc>>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize_content(content).as_bytes());
        hasher.update([0u8]);
        if let Some(w) = window {
            hasher.update(w.timestamp().to_be_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        Self(digest[..FINGERPRINT_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name used by file-backed stores.
    pub fn file_name(&self) -> String {
        format!("{}.md", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == FINGERPRINT_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(format!("Invalid fingerprint: {}", s))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Trim and collapse runs of whitespace so cosmetic re-formatting of the
/// same event does not produce a new fingerprint.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Enums
// =============================================================================

/// Kind of external source an action record was perceived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Message,
    Transaction,
    Social,
    File,
    Manual,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Message => write!(f, "message"),
            SourceKind::Transaction => write!(f, "transaction"),
            SourceKind::Social => write!(f, "social"),
            SourceKind::File => write!(f, "file"),
            SourceKind::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(SourceKind::Message),
            "transaction" => Ok(SourceKind::Transaction),
            "social" => Ok(SourceKind::Social),
            "file" => Ok(SourceKind::File),
            "manual" => Ok(SourceKind::Manual),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

/// Record priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Lifecycle state of a record. Each state is one well-known directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Inbox,
    PendingApproval,
    Approved,
    Rejected,
    Done,
    Failed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 6] = [
        LifecycleState::Inbox,
        LifecycleState::PendingApproval,
        LifecycleState::Approved,
        LifecycleState::Rejected,
        LifecycleState::Done,
        LifecycleState::Failed,
    ];

    /// Directory name for this state.
    pub fn dir_name(&self) -> &'static str {
        match self {
            LifecycleState::Inbox => "inbox-of-work",
            LifecycleState::PendingApproval => "pending-approval",
            LifecycleState::Approved => "approved",
            LifecycleState::Rejected => "rejected",
            LifecycleState::Done => "done",
            LifecycleState::Failed => "failed",
        }
    }

    /// Header key stamped when a record enters this state.
    pub fn entered_at_key(&self) -> &'static str {
        match self {
            LifecycleState::Inbox => "inbox_at",
            LifecycleState::PendingApproval => "pending_approval_at",
            LifecycleState::Approved => "approved_at",
            LifecycleState::Rejected => "rejected_at",
            LifecycleState::Done => "done_at",
            LifecycleState::Failed => "failed_at",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Rejected | LifecycleState::Done | LifecycleState::Failed
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for LifecycleState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleState::ALL
            .into_iter()
            .find(|state| state.dir_name() == s)
            .ok_or_else(|| format!("Unknown lifecycle state: {}", s))
    }
}

/// Planner classification of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Auto,
    RequiresApproval,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Auto => write!(f, "auto"),
            Classification::RequiresApproval => write!(f, "requires-approval"),
        }
    }
}

impl FromStr for Classification {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Classification::Auto),
            "requires-approval" => Ok(Classification::RequiresApproval),
            _ => Err(format!("Unknown classification: {}", s)),
        }
    }
}

/// Outcome of one adapter execution as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "failure"),
        }
    }
}

// =============================================================================
// Value objects
// =============================================================================

/// Risk narrative attached to a plan by the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub impact: String,
    pub reversibility: String,
    pub blast_radius: String,
}

/// One ordered execution step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub adapter: String,
    pub operation: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}
