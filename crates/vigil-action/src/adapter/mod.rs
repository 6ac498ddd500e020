//! Action adapter trait and registry.
//!
//! An adapter performs side effects for one external system. The registry
//! maps `(adapter name, operation)` to a typed [`ActionKind`] and the
//! adapter implementing it, and rejects conflicting registrations up front.

pub mod command;
pub mod note;
pub mod notify;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use vigil_core::config::AdaptersConfig;
use vigil_core::types::PlanStep;
use vigil_store::VaultLayout;

use crate::error::{AdapterError, RegistrationError, ValidationError};
use crate::types::{ActionKind, AdapterDescriptor, AdapterOutput, Params};

pub use command::CommandAdapter;
pub use note::NoteAdapter;
pub use notify::NotifyAdapter;

/// A side-effecting integration.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    /// Registry name, as used in plan steps.
    fn name(&self) -> &str;

    /// Operations this adapter implements.
    fn operations(&self) -> Vec<ActionKind>;

    /// Perform `kind` with already-validated `params`.
    async fn invoke(&self, kind: ActionKind, params: &Params) -> Result<AdapterOutput, AdapterError>;

    /// What a dry run reports instead of invoking.
    fn simulate(&self, kind: ActionKind, _params: &Params) -> AdapterOutput {
        AdapterOutput::new(format!("dry run: {} via {} not performed", kind, self.name()))
    }
}

/// Registry of adapters and their operation descriptors.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ActionAdapter>>,
    descriptors: BTreeMap<(String, ActionKind), AdapterDescriptor>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in adapters plus every configured command adapter.
    pub fn with_builtins(layout: &VaultLayout, config: &AdaptersConfig) -> Result<Self, RegistrationError> {
        let mut registry = Self::new();
        registry.register(Arc::new(NoteAdapter::new(layout.notes_dir(), layout.tmp_dir())))?;
        registry.register(Arc::new(NotifyAdapter))?;
        for adapter in CommandAdapter::from_configs(&config.commands)? {
            registry.register(Arc::new(adapter))?;
        }
        Ok(registry)
    }

    /// Register an adapter and all of its operations.
    pub fn register(&mut self, adapter: Arc<dyn ActionAdapter>) -> Result<(), RegistrationError> {
        let name = adapter.name().to_string();
        if name.is_empty() {
            return Err(RegistrationError::InvalidConfig("adapter name must not be empty".into()));
        }
        if self.adapters.contains_key(&name) {
            return Err(RegistrationError::DuplicateAdapter(name));
        }

        let mut new_descriptors = Vec::new();
        for kind in adapter.operations() {
            let key = (name.clone(), kind);
            if self.descriptors.contains_key(&key) || new_descriptors.iter().any(|(k, _)| *k == key) {
                return Err(RegistrationError::DuplicateOperation {
                    adapter: name,
                    operation: kind.to_string(),
                });
            }
            new_descriptors.push((key, AdapterDescriptor::new(name.clone(), kind)));
        }

        tracing::debug!(adapter = %name, operations = new_descriptors.len(), "Adapter registered");
        self.descriptors.extend(new_descriptors);
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, adapter: &str) -> Option<&Arc<dyn ActionAdapter>> {
        self.adapters.get(adapter)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &AdapterDescriptor> {
        self.descriptors.values()
    }

    /// Route a plan step to its adapter and typed operation, validating the
    /// parameters against the operation schema.
    pub fn resolve(
        &self,
        step: &PlanStep,
    ) -> Result<(Arc<dyn ActionAdapter>, ActionKind), ValidationError> {
        let adapter = self
            .adapters
            .get(&step.adapter)
            .ok_or_else(|| ValidationError::UnknownAdapter(step.adapter.clone()))?;
        let unknown_op = || ValidationError::UnknownOperation {
            adapter: step.adapter.clone(),
            operation: step.operation.clone(),
        };
        let kind: ActionKind = step.operation.parse().map_err(|_| unknown_op())?;
        let descriptor = self
            .descriptors
            .get(&(step.adapter.clone(), kind))
            .ok_or_else(unknown_op)?;
        descriptor
            .validate(&step.params)
            .map_err(|reason| ValidationError::InvalidParams {
                adapter: step.adapter.clone(),
                operation: step.operation.clone(),
                reason,
            })?;
        Ok((Arc::clone(adapter), kind))
    }

    /// Validate every step of a plan.
    pub fn validate_steps(&self, steps: &[PlanStep]) -> Result<(), ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }
        for step in steps {
            self.resolve(step)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fake {
        name: &'static str,
        ops: Vec<ActionKind>,
    }

    #[async_trait]
    impl ActionAdapter for Fake {
        fn name(&self) -> &str {
            self.name
        }
        fn operations(&self) -> Vec<ActionKind> {
            self.ops.clone()
        }
        async fn invoke(&self, kind: ActionKind, _params: &Params) -> Result<AdapterOutput, AdapterError> {
            Ok(AdapterOutput::new(kind.to_string()))
        }
    }

    fn step(adapter: &str, operation: &str, params: serde_json::Value) -> PlanStep {
        PlanStep {
            adapter: adapter.into(),
            operation: operation.into(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn registry() -> AdapterRegistry {
        let mut r = AdapterRegistry::new();
        r.register(Arc::new(Fake {
            name: "mailer",
            ops: vec![ActionKind::SendMessage],
        }))
        .unwrap();
        r
    }

    #[test]
    fn test_duplicate_adapter_rejected() {
        let mut r = registry();
        let err = r
            .register(Arc::new(Fake {
                name: "mailer",
                ops: vec![ActionKind::Notify],
            }))
            .unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateAdapter("mailer".into()));
    }

    #[test]
    fn test_duplicate_operation_rejected() {
        let mut r = AdapterRegistry::new();
        let err = r
            .register(Arc::new(Fake {
                name: "twice",
                ops: vec![ActionKind::Notify, ActionKind::Notify],
            }))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateOperation { .. }));
        assert!(r.get("twice").is_none());
    }

    #[test]
    fn test_resolve_routes_to_kind() {
        let r = registry();
        let (adapter, kind) = r
            .resolve(&step("mailer", "send_message", json!({"to": "a@b.c", "body": "hi"})))
            .unwrap();
        assert_eq!(adapter.name(), "mailer");
        assert_eq!(kind, ActionKind::SendMessage);
    }

    #[test]
    fn test_resolve_unknown_adapter() {
        let err = registry()
            .resolve(&step("fax", "send_message", json!({})))
            .err()
            .unwrap();
        assert_eq!(err, ValidationError::UnknownAdapter("fax".into()));
    }

    #[test]
    fn test_resolve_unknown_operation() {
        let r = registry();
        assert!(matches!(
            r.resolve(&step("mailer", "write_note", json!({"title": "t", "body": "b"}))),
            Err(ValidationError::UnknownOperation { .. })
        ));
        assert!(matches!(
            r.resolve(&step("mailer", "teleport", json!({}))),
            Err(ValidationError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn test_resolve_schema_mismatch() {
        let err = registry()
            .resolve(&step("mailer", "send_message", json!({"to": "a@b.c"})))
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::InvalidParams { .. }));
    }

    #[test]
    fn test_validate_steps_rejects_empty_plan() {
        assert_eq!(registry().validate_steps(&[]), Err(ValidationError::EmptyPlan));
    }

    #[test]
    fn test_with_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        let r = AdapterRegistry::with_builtins(&layout, &AdaptersConfig::default()).unwrap();
        assert!(r.get("notes").is_some());
        assert!(r.get("notify").is_some());
        assert_eq!(r.descriptors().count(), 2);
    }

    #[tokio::test]
    async fn test_default_simulate_does_not_invoke() {
        let fake = Fake {
            name: "mailer",
            ops: vec![ActionKind::SendMessage],
        };
        let out = fake.simulate(ActionKind::SendMessage, &Params::new());
        assert!(out.summary.starts_with("dry run"));
    }
}
