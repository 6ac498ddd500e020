//! Vault directory layout.

use std::path::{Path, PathBuf};

use vigil_core::error::Result;
use vigil_core::types::LifecycleState;

/// Well-known paths under a vault root.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self, state: LifecycleState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("plans")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join(".ledger")
    }

    pub fn health_dir(&self) -> PathBuf {
        self.root.join(".health")
    }

    /// Scratch directory for atomic writes. Same filesystem as the vault.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.root.join("notes")
    }

    pub fn drop_dir(&self, name: &str) -> PathBuf {
        self.root.join("drop").join(name)
    }

    /// Create every directory the vault needs. Idempotent.
    pub fn ensure(&self) -> Result<()> {
        for state in LifecycleState::ALL {
            std::fs::create_dir_all(self.state_dir(state))?;
        }
        for dir in [
            self.plans_dir(),
            self.ledger_dir(),
            self.health_dir(),
            self.tmp_dir(),
            self.audit_dir().join("archive"),
            self.notes_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_creates_all_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        layout.ensure().unwrap();
        layout.ensure().unwrap();

        assert!(dir.path().join("inbox-of-work").is_dir());
        assert!(dir.path().join("pending-approval").is_dir());
        assert!(dir.path().join("failed").is_dir());
        assert!(dir.path().join("audit/archive").is_dir());
        assert!(layout.tmp_dir().is_dir());
    }

    #[test]
    fn test_drop_dir_is_per_watcher() {
        let layout = VaultLayout::new("/vault");
        assert_eq!(layout.drop_dir("mail"), PathBuf::from("/vault/drop/mail"));
    }
}
