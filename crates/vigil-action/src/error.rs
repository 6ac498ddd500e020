//! Error types for the action engine.

use vigil_core::error::VigilError;

use crate::types::ErrorClass;

/// A failed adapter invocation, tagged with how it may be retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class} adapter error: {message}")]
pub struct AdapterError {
    pub class: ErrorClass,
    pub message: String,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Unclassified,
            message: message.into(),
        }
    }
}

/// A plan step that cannot be executed as written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),
    #[error("adapter {adapter} has no operation {operation}")]
    UnknownOperation { adapter: String, operation: String },
    #[error("invalid params for {adapter}/{operation}: {reason}")]
    InvalidParams {
        adapter: String,
        operation: String,
        reason: String,
    },
    #[error("unparseable steps: {0}")]
    UnparseableSteps(String),
    #[error("plan has no steps")]
    EmptyPlan,
}

/// Adapter registration conflicts, detected when the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("adapter already registered: {0}")]
    DuplicateAdapter(String),
    #[error("operation registered twice: {adapter}/{operation}")]
    DuplicateOperation { adapter: String, operation: String },
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
}

/// Errors from executing approved records.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Adapter failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),
    #[error("Triage error: {0}")]
    Triage(#[from] TriageError),
    #[error("Storage error: {0}")]
    Storage(#[from] VigilError),
}

impl ExecutionError {
    /// Whether the orchestrator must halt.
    pub fn is_fatal(&self) -> bool {
        match self {
            ExecutionError::Storage(e) => e.is_storage_failure(),
            ExecutionError::Gate(e) => e.is_fatal(),
            ExecutionError::Triage(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Errors from the approval gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Record {0} is not pending approval")]
    NotPending(String),
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Storage(#[from] VigilError),
}

impl GateError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::Storage(e) if e.is_storage_failure())
    }
}

/// Errors from triage and the planner boundary.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Planner failed: {0}")]
    Planner(String),
    #[error("Storage error: {0}")]
    Storage(#[from] VigilError),
}

impl TriageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TriageError::Storage(e) if e.is_storage_failure())
    }
}
