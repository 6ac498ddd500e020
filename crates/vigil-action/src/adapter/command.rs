//! Command adapter: binds operations to external programs.
//!
//! The program receives `{"operation": ..., "params": {...}}` as JSON on
//! stdin. Exit status decides the outcome:
//!
//! - `0`: success; stdout is the output (parsed as JSON when possible)
//! - `75` (`EX_TEMPFAIL`): transient
//! - other `64..=78` (sysexits): permanent
//! - anything else, or killed by a signal: unclassified

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use vigil_core::config::CommandAdapterConfig;

use crate::adapter::ActionAdapter;
use crate::error::{AdapterError, RegistrationError};
use crate::types::{ActionKind, AdapterOutput, Params};

const EX_TEMPFAIL: i32 = 75;
const STDERR_TAIL_CHARS: usize = 512;

#[derive(Debug, Clone)]
struct Binding {
    program: String,
    args: Vec<String>,
}

/// One adapter name backed by one or more external programs.
#[derive(Debug)]
pub struct CommandAdapter {
    name: String,
    bindings: BTreeMap<ActionKind, Binding>,
}

impl CommandAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: BTreeMap::new(),
        }
    }

    /// Bind `kind` to `program`. Fails if `kind` is already bound.
    pub fn bind(
        &mut self,
        kind: ActionKind,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Result<(), RegistrationError> {
        if self.bindings.contains_key(&kind) {
            return Err(RegistrationError::DuplicateOperation {
                adapter: self.name.clone(),
                operation: kind.to_string(),
            });
        }
        self.bindings.insert(
            kind,
            Binding {
                program: program.into(),
                args,
            },
        );
        Ok(())
    }

    /// Group `[[adapters.commands]]` entries into one adapter per name.
    pub fn from_configs(configs: &[CommandAdapterConfig]) -> Result<Vec<Self>, RegistrationError> {
        let mut by_name: BTreeMap<String, CommandAdapter> = BTreeMap::new();
        for cfg in configs {
            if cfg.program.trim().is_empty() {
                return Err(RegistrationError::InvalidConfig(format!(
                    "{}/{}: program must not be empty",
                    cfg.adapter, cfg.operation
                )));
            }
            let kind: ActionKind = cfg
                .operation
                .parse()
                .map_err(|e: String| RegistrationError::InvalidConfig(format!("{}: {}", cfg.adapter, e)))?;
            by_name
                .entry(cfg.adapter.clone())
                .or_insert_with(|| CommandAdapter::new(cfg.adapter.clone()))
                .bind(kind, cfg.program.clone(), cfg.args.clone())?;
        }
        Ok(by_name.into_values().collect())
    }
}

fn classify_exit(code: Option<i32>, stderr: &str) -> AdapterError {
    let tail: String = {
        let trimmed = stderr.trim();
        let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
        trimmed.chars().skip(skip).collect()
    };
    match code {
        Some(EX_TEMPFAIL) => AdapterError::transient(format!("exit {}: {}", EX_TEMPFAIL, tail)),
        Some(c @ 64..=78) => AdapterError::permanent(format!("exit {}: {}", c, tail)),
        Some(c) => AdapterError::unclassified(format!("exit {}: {}", c, tail)),
        None => AdapterError::unclassified(format!("terminated by signal: {}", tail)),
    }
}

#[async_trait]
impl ActionAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<ActionKind> {
        self.bindings.keys().copied().collect()
    }

    async fn invoke(&self, kind: ActionKind, params: &Params) -> Result<AdapterOutput, AdapterError> {
        let binding = self
            .bindings
            .get(&kind)
            .ok_or_else(|| AdapterError::permanent(format!("{} has no binding for {}", self.name, kind)))?;

        let mut child = Command::new(&binding.program)
            .args(&binding.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    AdapterError::permanent(format!("cannot run {}: {}", binding.program, e))
                }
                _ => AdapterError::transient(format!("spawn {}: {}", binding.program, e)),
            })?;

        let input = json!({ "operation": kind.to_string(), "params": params }).to_string();
        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading stdin is not an error.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(AdapterError::transient(format!("write stdin: {}", e)));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AdapterError::transient(format!("wait {}: {}", binding.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_exit(output.status.code(), &stderr));
        }

        let data = serde_json::from_str(&stdout).unwrap_or(serde_json::Value::String(stdout));
        tracing::debug!(adapter = %self.name, operation = %kind, "Command completed");
        Ok(AdapterOutput::new(format!("{} completed via {}", kind, self.name)).with_data(data))
    }
}
