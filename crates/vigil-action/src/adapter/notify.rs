//! Notify adapter: surfaces a message through the log.

use async_trait::async_trait;

use crate::adapter::ActionAdapter;
use crate::error::AdapterError;
use crate::types::{ActionKind, AdapterOutput, Params};

/// Emits the message as a structured log event at the requested level.
pub struct NotifyAdapter;

#[async_trait]
impl ActionAdapter for NotifyAdapter {
    fn name(&self) -> &str {
        "notify"
    }

    fn operations(&self) -> Vec<ActionKind> {
        vec![ActionKind::Notify]
    }

    async fn invoke(&self, kind: ActionKind, params: &Params) -> Result<AdapterOutput, AdapterError> {
        if kind != ActionKind::Notify {
            return Err(AdapterError::permanent(format!("notify cannot {}", kind)));
        }
        let message = params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if message.is_empty() {
            return Err(AdapterError::permanent("notification message must not be empty"));
        }

        match params.get("level").and_then(|v| v.as_str()).unwrap_or("info") {
            "warn" | "warning" => tracing::warn!(notification = %message, "Notification"),
            "error" => tracing::error!(notification = %message, "Notification"),
            _ => tracing::info!(notification = %message, "Notification"),
        }

        Ok(AdapterOutput::new(format!("Notified: {}", message)))
    }
}
