//! Action engine for Vigil.
//!
//! Turns inbox records into plans, gates them on approval, executes the
//! approved ones through pluggable adapters under a retry policy, and
//! writes a sanitized audit trail of every execution.

pub mod adapter;
pub mod audit;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod retry;
pub mod triage;
pub mod types;

pub use adapter::{ActionAdapter, AdapterRegistry};
pub use audit::{AuditEntry, AuditLogger};
pub use error::{AdapterError, ExecutionError, GateError, RegistrationError, TriageError, ValidationError};
pub use gate::{ApprovalGate, SweepReport};
pub use orchestrator::{ExecutionOutcome, Orchestrator, OrchestratorCycle, OrchestratorSettings};
pub use planner::{FilePlanner, Planner};
pub use policy::AutoApprovePolicy;
pub use retry::{RetryOutcome, RetryPolicy};
pub use triage::{Triage, TriageReport};
pub use types::{ActionKind, AdapterDescriptor, AdapterOutput, ErrorClass, ParamSpec, ParamType, Params};
