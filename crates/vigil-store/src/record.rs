//! Record file format.
//!
//! A record is a `---` delimited header of `key: value` lines followed by
//! a markdown body:
//!
//! ```text
//! ---
//! type: action
//! fingerprint: 3f9a0c1d2e4b5a67
//! kind: message
//! ...
//! ---
//!
//! ## Summary
//! ...
//! ```
//!
//! The raw header text is kept verbatim. New fields are only ever appended,
//! so every existing header byte survives any number of state moves.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use vigil_core::error::{Result, VigilError};
use vigil_core::types::{
    Classification, Fingerprint, LifecycleState, PlanStep, Priority, RecordId, RiskSummary,
    SourceKind,
};

const DELIMITER: &str = "---";

/// Header field marking a record whose original header could not be parsed.
pub const MALFORMED_HEADER: &str = "malformed_header";

/// Format a timestamp the way every header stores it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a header timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VigilError::MalformedRecord(format!("bad timestamp {:?}: {}", value, e)))
}

// =============================================================================
// RecordDocument
// =============================================================================

/// A parsed record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDocument {
    header_raw: String,
    fields: Vec<(String, String)>,
    body: String,
}

impl RecordDocument {
    /// Build a document from ordered header fields and a body.
    pub fn new(fields: Vec<(String, String)>, body: String) -> Result<Self> {
        let mut doc = Self {
            header_raw: String::new(),
            fields: Vec::new(),
            body,
        };
        for (key, value) in fields {
            if !doc.append_field(&key, &value)? {
                return Err(VigilError::MalformedRecord(format!(
                    "duplicate header key: {}",
                    key
                )));
            }
        }
        Ok(doc)
    }

    /// Parse the on-disk text of a record.
    pub fn parse(text: &str) -> Result<Self> {
        let rest = text
            .strip_prefix("---\n")
            .or_else(|| text.strip_prefix("---\r\n"))
            .ok_or_else(|| VigilError::MalformedRecord("missing header delimiter".into()))?;

        let mut header_len = None;
        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == DELIMITER {
                header_len = Some((offset, offset + line.len()));
                break;
            }
            offset += line.len();
        }
        let (header_end, body_start) = header_len
            .ok_or_else(|| VigilError::MalformedRecord("unterminated header".into()))?;

        let header_raw = rest[..header_end].to_string();
        let body = rest[body_start..].to_string();

        let mut fields: Vec<(String, String)> = Vec::new();
        for line in header_raw.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                VigilError::MalformedRecord(format!("header line without ':': {:?}", line))
            })?;
            let key = key.trim();
            if !is_valid_key(key) {
                return Err(VigilError::MalformedRecord(format!("invalid header key: {:?}", key)));
            }
            if fields.iter().any(|(k, _)| k == key) {
                return Err(VigilError::MalformedRecord(format!(
                    "duplicate header key: {}",
                    key
                )));
            }
            fields.push((key.to_string(), value.trim().to_string()));
        }

        Ok(Self {
            header_raw,
            fields,
            body,
        })
    }

    /// Wrap text whose header cannot be parsed.
    ///
    /// The result carries a single `malformed_header` field and keeps the
    /// original text verbatim under an `## Original` body section, so the
    /// record can still be moved and stamped.
    pub fn salvage(text: &str, reason: &str) -> Result<Self> {
        let mut body = String::from("\n## Original\n\n");
        body.push_str(text);
        if !text.ends_with('\n') {
            body.push('\n');
        }
        Self::new(
            vec![(MALFORMED_HEADER.to_string(), reason.to_string())],
            body,
        )
    }

    /// Whether this document was produced by [`RecordDocument::salvage`].
    pub fn is_salvaged(&self) -> bool {
        self.get(MALFORMED_HEADER).is_some()
    }

    /// Render back to file text. Parsing then rendering is byte-exact.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.header_raw.len() + self.body.len() + 8);
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&self.header_raw);
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&self.body);
        out
    }

    /// Append a header field.
    ///
    /// Existing keys are never altered: if `key` is already present the
    /// document is left untouched and `Ok(false)` is returned. Line breaks
    /// in `value` are folded to spaces.
    pub fn append_field(&mut self, key: &str, value: &str) -> Result<bool> {
        if !is_valid_key(key) {
            return Err(VigilError::MalformedRecord(format!("invalid header key: {:?}", key)));
        }
        if self.get(key).is_some() {
            return Ok(false);
        }
        let value: String = value
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let value = value.trim().to_string();
        if !self.header_raw.is_empty() && !self.header_raw.ends_with('\n') {
            self.header_raw.push('\n');
        }
        self.header_raw.push_str(&format!("{}: {}\n", key, value));
        self.fields.push((key.to_string(), value));
        Ok(true)
    }

    /// Append a header field, suffixing the key when it is already taken.
    ///
    /// The first value stays under `key`; later ones land under `key_2`,
    /// `key_3` and so on. Returns the key actually written.
    pub fn append_versioned(&mut self, key: &str, value: &str) -> Result<String> {
        if self.append_field(key, value)? {
            return Ok(key.to_string());
        }
        let mut generation = 2u32;
        loop {
            let candidate = format!("{}_{}", key, generation);
            if self.append_field(&candidate, value)? {
                return Ok(candidate);
            }
            generation += 1;
        }
    }

    /// Header position of the newest generation of `key`.
    pub fn latest_index(&self, key: &str) -> Option<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(i, (k, _))| generation_of(k, key).map(|g| (g, i)))
            .max()
            .map(|(_, i)| i)
    }

    /// Value of the newest generation of `key`.
    pub fn latest(&self, key: &str) -> Option<&str> {
        self.latest_index(key).map(|i| self.fields[i].1.as_str())
    }

    /// Look up a header value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a header value that must be present.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| VigilError::MalformedRecord(format!("missing header field: {}", key)))
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn header_raw(&self) -> &str {
        &self.header_raw
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The `type` header (`action` or `plan`).
    pub fn record_type(&self) -> Option<&str> {
        self.get("type")
    }

    /// Split the body into `## Heading` sections keyed by heading text.
    pub fn sections(&self) -> BTreeMap<String, String> {
        let mut sections = BTreeMap::new();
        let mut current: Option<String> = None;
        let mut buf = String::new();
        for line in self.body.lines() {
            if let Some(title) = line.strip_prefix("## ") {
                if let Some(name) = current.take() {
                    sections.insert(name, buf.trim().to_string());
                }
                current = Some(title.trim().to_string());
                buf.clear();
            } else if current.is_some() {
                buf.push_str(line);
                buf.push('\n');
            }
        }
        if let Some(name) = current {
            sections.insert(name, buf.trim().to_string());
        }
        sections
    }
}

/// `Some(1)` for `key` itself, `Some(n)` for `key_n` with n >= 2.
fn generation_of(candidate: &str, key: &str) -> Option<u32> {
    if candidate == key {
        return Some(1);
    }
    candidate
        .strip_prefix(key)?
        .strip_prefix('_')?
        .parse::<u32>()
        .ok()
        .filter(|g| *g >= 2)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

fn render_body(sections: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (title, content) in sections {
        body.push_str(&format!("\n## {}\n\n{}\n", title, content.trim()));
    }
    body
}

// =============================================================================
// ActionRecord
// =============================================================================

/// The unit of work produced by a watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub fingerprint: Fingerprint,
    pub kind: SourceKind,
    pub source_id: String,
    pub discovered_at: DateTime<Utc>,
    pub priority: Priority,
    pub summary: String,
    pub details: String,
    pub suggested_next_step: Option<String>,
    /// Kind-specific optional header fields.
    pub extra: Vec<(String, String)>,
}

impl ActionRecord {
    pub fn id(&self) -> &RecordId {
        &self.fingerprint
    }

    /// Render as a new document with `status: new`.
    pub fn to_document(&self) -> Result<RecordDocument> {
        if self.summary.trim().is_empty() {
            return Err(VigilError::MalformedRecord("summary must not be empty".into()));
        }
        let mut fields = vec![
            ("type".to_string(), "action".to_string()),
            ("fingerprint".to_string(), self.fingerprint.to_string()),
            ("kind".to_string(), self.kind.to_string()),
            ("source_id".to_string(), self.source_id.clone()),
            ("discovered_at".to_string(), format_timestamp(self.discovered_at)),
            ("status".to_string(), "new".to_string()),
            ("priority".to_string(), self.priority.to_string()),
        ];
        fields.extend(self.extra.iter().cloned());

        let details = if self.details.trim().is_empty() {
            "(none)"
        } else {
            self.details.as_str()
        };
        let mut sections = vec![("Summary", self.summary.as_str()), ("Details", details)];
        if let Some(next) = &self.suggested_next_step {
            sections.push(("Suggested Next Step", next.as_str()));
        }
        RecordDocument::new(fields, render_body(&sections))
    }

    /// Validate and read an action record from a document.
    pub fn from_document(doc: &RecordDocument) -> Result<Self> {
        if doc.record_type() != Some("action") {
            return Err(VigilError::MalformedRecord(format!(
                "expected type action, got {:?}",
                doc.record_type()
            )));
        }
        let fingerprint: Fingerprint = doc
            .require("fingerprint")?
            .parse()
            .map_err(VigilError::MalformedRecord)?;
        let kind: SourceKind = doc.require("kind")?.parse().map_err(VigilError::MalformedRecord)?;
        let priority: Priority = doc
            .require("priority")?
            .parse()
            .map_err(VigilError::MalformedRecord)?;
        let discovered_at = parse_timestamp(doc.require("discovered_at")?)?;
        doc.require("status")?;

        let sections = doc.sections();
        let summary = sections
            .get("Summary")
            .cloned()
            .ok_or_else(|| VigilError::MalformedRecord("missing Summary section".into()))?;
        let details = sections
            .get("Details")
            .cloned()
            .ok_or_else(|| VigilError::MalformedRecord("missing Details section".into()))?;

        const CORE: [&str; 7] = [
            "type",
            "fingerprint",
            "kind",
            "source_id",
            "discovered_at",
            "status",
            "priority",
        ];
        let extra = doc
            .fields()
            .iter()
            .filter(|(k, _)| !CORE.contains(&k.as_str()))
            .cloned()
            .collect();

        Ok(Self {
            fingerprint,
            kind,
            source_id: doc.get("source_id").unwrap_or_default().to_string(),
            discovered_at,
            priority,
            summary,
            details,
            suggested_next_step: sections.get("Suggested Next Step").cloned(),
            extra,
        })
    }
}

// =============================================================================
// PlanRecord
// =============================================================================

/// Planner output for one action record. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRecord {
    pub plan_id: String,
    pub record_id: RecordId,
    pub classification: Classification,
    pub steps: Vec<PlanStep>,
    pub rationale: String,
    pub risk: RiskSummary,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PlanRecord {
    /// Create a plan with a fresh id.
    pub fn new(
        record_id: RecordId,
        classification: Classification,
        steps: Vec<PlanStep>,
        rationale: impl Into<String>,
        risk: RiskSummary,
    ) -> Self {
        Self {
            plan_id: Uuid::new_v4().simple().to_string(),
            record_id,
            classification,
            steps,
            rationale: rationale.into(),
            risk,
            deadline: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn to_document(&self) -> Result<RecordDocument> {
        let mut fields = vec![
            ("type".to_string(), "plan".to_string()),
            ("plan_id".to_string(), self.plan_id.clone()),
            ("record_id".to_string(), self.record_id.to_string()),
            ("classification".to_string(), self.classification.to_string()),
            ("created_at".to_string(), format_timestamp(self.created_at)),
            ("steps".to_string(), serde_json::to_string(&self.steps)?),
            ("risk_impact".to_string(), self.risk.impact.clone()),
            ("risk_reversibility".to_string(), self.risk.reversibility.clone()),
            ("risk_blast_radius".to_string(), self.risk.blast_radius.clone()),
        ];
        if let Some(deadline) = self.deadline {
            fields.push(("deadline".to_string(), format_timestamp(deadline)));
        }
        RecordDocument::new(fields, render_body(&[("Rationale", &self.rationale)]))
    }

    pub fn from_document(doc: &RecordDocument) -> Result<Self> {
        if doc.record_type() != Some("plan") {
            return Err(VigilError::MalformedRecord(format!(
                "expected type plan, got {:?}",
                doc.record_type()
            )));
        }
        Ok(Self {
            plan_id: doc.require("plan_id")?.to_string(),
            record_id: doc
                .require("record_id")?
                .parse()
                .map_err(VigilError::MalformedRecord)?,
            classification: doc
                .require("classification")?
                .parse()
                .map_err(VigilError::MalformedRecord)?,
            steps: parse_steps(doc.require("steps")?)?,
            rationale: doc.sections().get("Rationale").cloned().unwrap_or_default(),
            risk: read_risk(doc),
            deadline: doc.get("deadline").map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(doc.require("created_at")?)?,
        })
    }
}

fn parse_steps(raw: &str) -> Result<Vec<PlanStep>> {
    let steps: Vec<PlanStep> = serde_json::from_str(raw)
        .map_err(|e| VigilError::MalformedRecord(format!("unparseable steps: {}", e)))?;
    if steps.is_empty() {
        return Err(VigilError::MalformedRecord("plan has no steps".into()));
    }
    Ok(steps)
}

fn read_risk(doc: &RecordDocument) -> RiskSummary {
    RiskSummary {
        impact: doc.get("risk_impact").unwrap_or_default().to_string(),
        reversibility: doc.get("risk_reversibility").unwrap_or_default().to_string(),
        blast_radius: doc.get("risk_blast_radius").unwrap_or_default().to_string(),
    }
}

// =============================================================================
// ApprovalRequest
// =============================================================================

/// The executable view of a triaged record.
///
/// Materialized as header fields appended to the action record when it
/// leaves the inbox.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub record_id: RecordId,
    pub plan_id: String,
    pub classification: Classification,
    pub steps: Vec<PlanStep>,
    pub risk: RiskSummary,
    pub deadline: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Derive the request from a plan, applying a default deadline when the
    /// plan has none and approval is required.
    pub fn from_plan(plan: &PlanRecord, default_deadline: Option<DateTime<Utc>>) -> Self {
        let deadline = match plan.classification {
            Classification::RequiresApproval => plan.deadline.or(default_deadline),
            Classification::Auto => plan.deadline,
        };
        Self {
            record_id: plan.record_id.clone(),
            plan_id: plan.plan_id.clone(),
            classification: plan.classification,
            steps: plan.steps.clone(),
            risk: plan.risk.clone(),
            deadline,
        }
    }

    /// Header fields appended to the action record.
    pub fn header_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("plan_id".to_string(), self.plan_id.clone()),
            ("classification".to_string(), self.classification.to_string()),
            ("steps".to_string(), serde_json::to_string(&self.steps)?),
            ("risk_impact".to_string(), self.risk.impact.clone()),
            ("risk_reversibility".to_string(), self.risk.reversibility.clone()),
            ("risk_blast_radius".to_string(), self.risk.blast_radius.clone()),
        ];
        if let Some(deadline) = self.deadline {
            fields.push(("deadline".to_string(), format_timestamp(deadline)));
        }
        Ok(fields)
    }

    /// Read the request from an action record header.
    ///
    /// Each field is read at its newest generation. A record put back into
    /// pending-approval after a rejection is a new request: a deadline
    /// stamped before the latest rejection no longer applies.
    pub fn from_document(doc: &RecordDocument) -> Result<Self> {
        let require_latest = |key: &str| {
            doc.latest(key)
                .ok_or_else(|| VigilError::MalformedRecord(format!("missing header field: {}", key)))
        };
        let deadline = match (doc.latest_index("deadline"), doc.latest_index(LifecycleState::Rejected.entered_at_key())) {
            (Some(d), Some(r)) if d < r => None,
            (Some(d), _) => Some(parse_timestamp(&doc.fields()[d].1)?),
            (None, _) => None,
        };
        Ok(Self {
            record_id: doc
                .require("fingerprint")?
                .parse()
                .map_err(VigilError::MalformedRecord)?,
            plan_id: require_latest("plan_id")?.to_string(),
            classification: require_latest("classification")?
                .parse()
                .map_err(VigilError::MalformedRecord)?,
            steps: parse_steps(require_latest("steps")?)?,
            risk: read_risk(doc),
            deadline,
        })
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> ActionRecord {
        ActionRecord {
            fingerprint: Fingerprint::compute("msg-1", "Can you send the Q3 invoice?", None),
            kind: SourceKind::Message,
            source_id: "msg-1".to_string(),
            discovered_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
            priority: Priority::High,
            summary: "Client asks for Q3 invoice".to_string(),
            details: "From: client@example.com\nCan you send the Q3 invoice?".to_string(),
            suggested_next_step: Some("Reply with the invoice attached".to_string()),
            extra: vec![("sender".to_string(), "client@example.com".to_string())],
        }
    }

    // ---- RecordDocument ----

    #[test]
    fn test_parse_render_is_byte_exact() {
        let text = "---\ntype: action\nkind:   message\n# comment\n\npriority: low\n---\n\n## Summary\n\nhi\n";
        let doc = RecordDocument::parse(text).unwrap();
        assert_eq!(doc.render(), text);
        assert_eq!(doc.get("kind"), Some("message"));
        assert_eq!(doc.fields().len(), 3);
    }

    #[test]
    fn test_append_preserves_existing_bytes() {
        let text = "---\ntype: action\nweird_spacing:    keep  me\n---\nbody\n";
        let mut doc = RecordDocument::parse(text).unwrap();
        assert!(doc.append_field("moved_at", "2026-01-01T00:00:00Z").unwrap());
        let rendered = doc.render();
        assert!(rendered.starts_with("---\ntype: action\nweird_spacing:    keep  me\n"));
        assert!(rendered.contains("moved_at: 2026-01-01T00:00:00Z\n---\nbody\n"));
    }

    #[test]
    fn test_append_never_alters_existing_key() {
        let mut doc = RecordDocument::parse("---\nstatus: new\n---\n").unwrap();
        assert!(!doc.append_field("status", "done").unwrap());
        assert_eq!(doc.get("status"), Some("new"));
        assert_eq!(doc.render(), "---\nstatus: new\n---\n");
    }

    #[test]
    fn test_append_folds_newlines() {
        let mut doc = RecordDocument::parse("---\ntype: action\n---\n").unwrap();
        doc.append_field("error", "line one\nline two").unwrap();
        assert_eq!(doc.get("error"), Some("line one line two"));
        let reparsed = RecordDocument::parse(&doc.render()).unwrap();
        assert_eq!(reparsed.get("error"), Some("line one line two"));
    }

    #[test]
    fn test_parse_crlf_header() {
        let text = "---\r\ntype: action\r\n---\r\nbody\r\n";
        let doc = RecordDocument::parse(text).unwrap();
        assert_eq!(doc.get("type"), Some("action"));
        assert_eq!(doc.render().len(), text.len() - 2);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RecordDocument::parse("type: action\n").is_err());
        assert!(RecordDocument::parse("---\ntype: action\n").is_err());
        assert!(RecordDocument::parse("---\nno colon here\n---\n").is_err());
        assert!(RecordDocument::parse("---\nBad Key: x\n---\n").is_err());
        assert!(RecordDocument::parse("---\na: 1\na: 2\n---\n").is_err());
    }

    #[test]
    fn test_sections() {
        let doc = RecordDocument::parse(
            "---\ntype: action\n---\n\n## Summary\n\nShort.\n\n## Details\n\nLong\ntext.\n",
        )
        .unwrap();
        let sections = doc.sections();
        assert_eq!(sections["Summary"], "Short.");
        assert_eq!(sections["Details"], "Long\ntext.");
    }

    // ---- ActionRecord ----

    #[test]
    fn test_action_record_document_round_trip() {
        let record = sample_record();
        let doc = record.to_document().unwrap();
        let text = doc.render();
        assert!(text.contains("type: action\n"));
        assert!(text.contains("status: new\n"));
        assert!(text.contains("## Summary"));
        assert!(text.contains("## Details"));

        let parsed = ActionRecord::from_document(&RecordDocument::parse(&text).unwrap()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_action_record_requires_sections() {
        let text = "---\ntype: action\nfingerprint: 00112233aabbccdd\nkind: file\ndiscovered_at: 2026-01-01T00:00:00Z\nstatus: new\npriority: low\n---\n\n## Summary\n\nx\n";
        let doc = RecordDocument::parse(text).unwrap();
        let err = ActionRecord::from_document(&doc).unwrap_err();
        assert!(err.to_string().contains("Details"));
    }

    #[test]
    fn test_action_record_rejects_bad_kind() {
        let text = "---\ntype: action\nfingerprint: 00112233aabbccdd\nkind: fax\ndiscovered_at: 2026-01-01T00:00:00Z\nstatus: new\npriority: low\n---\n\n## Summary\n\nx\n\n## Details\n\ny\n";
        let doc = RecordDocument::parse(text).unwrap();
        assert!(ActionRecord::from_document(&doc).is_err());
    }

    #[test]
    fn test_empty_summary_rejected() {
        let mut record = sample_record();
        record.summary = "  ".to_string();
        assert!(record.to_document().is_err());
    }

    // ---- PlanRecord / ApprovalRequest ----

    fn sample_plan(classification: Classification) -> PlanRecord {
        let mut params = serde_json::Map::new();
        params.insert("to".into(), serde_json::json!("client@example.com"));
        PlanRecord::new(
            sample_record().fingerprint,
            classification,
            vec![PlanStep {
                adapter: "mailer".into(),
                operation: "send_message".into(),
                params,
            }],
            "Client is waiting on the invoice.",
            RiskSummary {
                impact: "external email".into(),
                reversibility: "irreversible".into(),
                blast_radius: "one recipient".into(),
            },
        )
    }

    #[test]
    fn test_plan_document_round_trip() {
        let deadline = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let mut plan = sample_plan(Classification::RequiresApproval).with_deadline(deadline);
        plan.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let doc = plan.to_document().unwrap();
        let parsed = PlanRecord::from_document(&RecordDocument::parse(&doc.render()).unwrap())
            .unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_plan_without_steps_rejected() {
        let mut plan = sample_plan(Classification::Auto);
        plan.steps.clear();
        let doc = plan.to_document().unwrap();
        assert!(PlanRecord::from_document(&doc).is_err());
    }

    #[test]
    fn test_approval_request_default_deadline_only_when_required() {
        let default = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();

        let req = ApprovalRequest::from_plan(&sample_plan(Classification::RequiresApproval), Some(default));
        assert_eq!(req.deadline, Some(default));

        let req = ApprovalRequest::from_plan(&sample_plan(Classification::Auto), Some(default));
        assert_eq!(req.deadline, None);
    }

    #[test]
    fn test_approval_request_from_appended_fields() {
        let record = sample_record();
        let mut doc = record.to_document().unwrap();
        let plan = sample_plan(Classification::RequiresApproval);
        let deadline = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let req = ApprovalRequest::from_plan(&plan, Some(deadline));
        for (k, v) in req.header_fields().unwrap() {
            assert!(doc.append_field(&k, &v).unwrap());
        }
        let parsed = ApprovalRequest::from_document(&doc).unwrap();
        assert_eq!(parsed, req);
        assert!(parsed.is_expired(deadline + chrono::Duration::seconds(1)));
        assert!(!parsed.is_expired(deadline));
    }

    #[test]
    fn test_deadline_before_latest_rejection_is_ignored() {
        let mut doc = sample_record().to_document().unwrap();
        let deadline = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let req = ApprovalRequest::from_plan(&sample_plan(Classification::RequiresApproval), Some(deadline));
        for (k, v) in req.header_fields().unwrap() {
            doc.append_field(&k, &v).unwrap();
        }
        doc.append_versioned("rejection_reason", "expired_deadline").unwrap();
        doc.append_versioned("rejected_at", "2026-03-02T00:00:05Z").unwrap();

        // Back in pending: the old deadline no longer applies.
        let parsed = ApprovalRequest::from_document(&doc).unwrap();
        assert_eq!(parsed.deadline, None);
        assert!(!parsed.is_expired(deadline + chrono::Duration::days(30)));

        // A deadline stamped after the rejection does.
        let fresh = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(doc.append_versioned("deadline", &format_timestamp(fresh)).unwrap(), "deadline_2");
        assert_eq!(ApprovalRequest::from_document(&doc).unwrap().deadline, Some(fresh));
    }

    // ---- Salvage / versioned fields ----

    #[test]
    fn test_salvage_keeps_original_text() {
        let text = "---\ntype: action\nno colon here\n---\n\n## Summary\n\nx\n";
        let reason = match RecordDocument::parse(text) {
            Err(VigilError::MalformedRecord(reason)) => reason,
            other => panic!("expected malformed header, got {:?}", other),
        };
        let doc = RecordDocument::salvage(text, &reason).unwrap();
        assert!(doc.is_salvaged());
        assert!(doc.body().starts_with("\n## Original\n\n---\n"));

        let reparsed = RecordDocument::parse(&doc.render()).unwrap();
        assert_eq!(reparsed, doc);
        assert!(reparsed.body().contains(text));
    }

    #[test]
    fn test_append_versioned_suffixes_taken_keys() {
        let mut doc = RecordDocument::parse("---\nrejection_reason: first\n---\n").unwrap();
        assert_eq!(doc.append_versioned("rejection_reason", "second").unwrap(), "rejection_reason_2");
        assert_eq!(doc.append_versioned("rejection_reason", "third").unwrap(), "rejection_reason_3");
        assert_eq!(doc.append_versioned("error", "boom").unwrap(), "error");

        assert_eq!(doc.get("rejection_reason"), Some("first"));
        assert_eq!(doc.latest("rejection_reason"), Some("third"));
        assert_eq!(doc.latest("error"), Some("boom"));
        assert_eq!(doc.latest("rejection"), None);
        assert!(doc.render().starts_with("---\nrejection_reason: first\n"));
    }
}
