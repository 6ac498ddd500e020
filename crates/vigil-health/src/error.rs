use vigil_core::error::VigilError;

/// Errors from the supervisor and its launchers.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Launch failed for {component}: {reason}")]
    Launch { component: String, reason: String },

    #[error("No launcher entry for component: {0}")]
    UnknownComponent(String),

    #[error("Storage error: {0}")]
    Storage(#[from] VigilError),
}

impl SupervisorError {
    /// Whether the supervisor itself must halt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SupervisorError::Storage(e) if e.is_storage_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SupervisorError::Launch {
            component: "orchestrator".into(),
            reason: "no such file".into(),
        };
        assert_eq!(err.to_string(), "Launch failed for orchestrator: no such file");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_storage_is_fatal() {
        let err: SupervisorError = VigilError::Io(std::io::Error::other("eio")).into();
        assert!(err.is_fatal());
    }
}
