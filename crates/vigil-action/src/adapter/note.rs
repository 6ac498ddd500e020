//! Note adapter.
//!
//! Writes one markdown file per note under `<vault>/notes/`. The file name
//! is derived from the note content, so a retried write lands on the same
//! path and is reported as already done.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use vigil_core::fsutil;
use vigil_core::types::Fingerprint;

use crate::adapter::ActionAdapter;
use crate::error::AdapterError;
use crate::types::{ActionKind, AdapterOutput, Params};

pub struct NoteAdapter {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl NoteAdapter {
    pub fn new(dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self { dir, tmp_dir }
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= 48 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "note".to_string()
    } else {
        slug
    }
}

fn str_param<'a>(params: &'a Params, key: &str) -> Result<&'a str, AdapterError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AdapterError::permanent(format!("note {} must not be empty", key)))
}

#[async_trait]
impl ActionAdapter for NoteAdapter {
    fn name(&self) -> &str {
        "notes"
    }

    fn operations(&self) -> Vec<ActionKind> {
        vec![ActionKind::WriteNote]
    }

    async fn invoke(&self, kind: ActionKind, params: &Params) -> Result<AdapterOutput, AdapterError> {
        if kind != ActionKind::WriteNote {
            return Err(AdapterError::permanent(format!("notes cannot {}", kind)));
        }
        let title = str_param(params, "title")?;
        let body = str_param(params, "body")?;
        let tags: Vec<&str> = params
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|t| t.as_str()).collect())
            .unwrap_or_default();

        let hash = Fingerprint::compute(title, body, None);
        let file_name = format!("{}-{}.md", slugify(title), &hash.as_str()[..8]);
        let path = self.dir.join(&file_name);

        let mut text = format!("# {}\n\n{}\n", title.trim(), body.trim());
        if !tags.is_empty() {
            text.push_str(&format!("\nTags: {}\n", tags.join(", ")));
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AdapterError::transient(format!("create notes dir: {}", e)))?;
        let created = fsutil::create_atomic(&self.tmp_dir, &path, text.as_bytes())
            .map_err(|e| AdapterError::transient(format!("write note: {}", e)))?;

        tracing::info!(note = %file_name, created, "Note written");
        Ok(AdapterOutput::new(format!("Note saved: {}", file_name))
            .with_data(json!({ "file": file_name, "created": created })))
    }
}
