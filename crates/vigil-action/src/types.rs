//! Core types for the action engine: operations, parameter schemas and
//! adapter outputs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Step parameters as they appear in a plan.
pub type Params = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Enums
// =============================================================================

/// Closed set of operations an adapter can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendMessage,
    PublishPost,
    CreateLedgerEntry,
    WriteNote,
    Notify,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::SendMessage,
        ActionKind::PublishPost,
        ActionKind::CreateLedgerEntry,
        ActionKind::WriteNote,
        ActionKind::Notify,
    ];

    /// Parameter schema every adapter implementing this operation accepts.
    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            ActionKind::SendMessage => SEND_MESSAGE_PARAMS,
            ActionKind::PublishPost => PUBLISH_POST_PARAMS,
            ActionKind::CreateLedgerEntry => CREATE_LEDGER_ENTRY_PARAMS,
            ActionKind::WriteNote => WRITE_NOTE_PARAMS,
            ActionKind::Notify => NOTIFY_PARAMS,
        }
    }
}

const SEND_MESSAGE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("to", ParamType::String),
    ParamSpec::optional("subject", ParamType::String),
    ParamSpec::required("body", ParamType::String),
    ParamSpec::optional("in_reply_to", ParamType::String),
];

const PUBLISH_POST_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("channel", ParamType::String),
    ParamSpec::required("text", ParamType::String),
];

const CREATE_LEDGER_ENTRY_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("account", ParamType::String),
    ParamSpec::required("amount", ParamType::Number),
    ParamSpec::optional("currency", ParamType::String),
    ParamSpec::optional("memo", ParamType::String),
    ParamSpec::optional("date", ParamType::String),
];

const WRITE_NOTE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("title", ParamType::String),
    ParamSpec::required("body", ParamType::String),
    ParamSpec::optional("tags", ParamType::Array),
];

const NOTIFY_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("message", ParamType::String),
    ParamSpec::optional("level", ParamType::String),
];

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::SendMessage => write!(f, "send_message"),
            ActionKind::PublishPost => write!(f, "publish_post"),
            ActionKind::CreateLedgerEntry => write!(f, "create_ledger_entry"),
            ActionKind::WriteNote => write!(f, "write_note"),
            ActionKind::Notify => write!(f, "notify"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(ActionKind::SendMessage),
            "publish_post" => Ok(ActionKind::PublishPost),
            "create_ledger_entry" => Ok(ActionKind::CreateLedgerEntry),
            "write_note" => Ok(ActionKind::WriteNote),
            "notify" => Ok(ActionKind::Notify),
            _ => Err(format!("Unknown operation: {}", s)),
        }
    }
}

/// JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl ParamType {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Bool => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Number => write!(f, "number"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::Array => write!(f, "array"),
            ParamType::Object => write!(f, "object"),
        }
    }
}

/// How an adapter failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeout, rate limit, service unavailable.
    Transient,
    /// Bad credentials, malformed input, unknown target, duplicate submission.
    Permanent,
    Unclassified,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Unclassified => write!(f, "unclassified"),
        }
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// One named parameter in an operation's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// Static registration of one `(adapter, operation)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    pub adapter: String,
    pub kind: ActionKind,
}

impl AdapterDescriptor {
    pub fn new(adapter: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            adapter: adapter.into(),
            kind,
        }
    }

    pub fn params(&self) -> &'static [ParamSpec] {
        self.kind.params()
    }

    /// Check `params` against the operation schema.
    ///
    /// Missing required keys, wrong JSON types and unknown keys are all
    /// reported; the first problem found is returned.
    pub fn validate(&self, params: &Params) -> Result<(), String> {
        let schema = self.params();
        for spec in schema {
            match params.get(spec.name) {
                None | Some(serde_json::Value::Null) if spec.required => {
                    return Err(format!("missing required param '{}'", spec.name));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !spec.ty.matches(value) => {
                    return Err(format!("param '{}' must be a {}", spec.name, spec.ty));
                }
                Some(_) => {}
            }
        }
        if let Some(unknown) = params.keys().find(|k| !schema.iter().any(|s| s.name == k.as_str())) {
            return Err(format!("unknown param '{}' for {}", unknown, self.kind));
        }
        Ok(())
    }
}

/// What an adapter reports back on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOutput {
    pub summary: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AdapterOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "summary": self.summary, "data": self.data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: serde_json::Value) -> Params {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_action_kind_display_from_str() {
        for kind in ActionKind::ALL {
            let parsed: ActionKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("launch_rocket".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_action_kind_serde_matches_display() {
        let json = serde_json::to_string(&ActionKind::CreateLedgerEntry).unwrap();
        assert_eq!(json, "\"create_ledger_entry\"");
    }

    #[test]
    fn test_every_kind_has_a_required_param() {
        for kind in ActionKind::ALL {
            assert!(kind.params().iter().any(|p| p.required), "{}", kind);
        }
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let d = AdapterDescriptor::new("mailer", ActionKind::SendMessage);
        assert!(d
            .validate(&params(json!({"to": "a@example.com", "body": "hi", "subject": "x"})))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let d = AdapterDescriptor::new("mailer", ActionKind::SendMessage);
        let err = d.validate(&params(json!({"to": "a@example.com"}))).unwrap_err();
        assert!(err.contains("body"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let d = AdapterDescriptor::new("books", ActionKind::CreateLedgerEntry);
        let err = d
            .validate(&params(json!({"account": "4000", "amount": "12.50"})))
            .unwrap_err();
        assert!(err.contains("amount"));
        assert!(err.contains("number"));
    }

    #[test]
    fn test_validate_unknown_param() {
        let d = AdapterDescriptor::new("notify", ActionKind::Notify);
        let err = d
            .validate(&params(json!({"message": "hi", "volume": 11})))
            .unwrap_err();
        assert!(err.contains("volume"));
    }

    #[test]
    fn test_null_optional_is_absent() {
        let d = AdapterDescriptor::new("notify", ActionKind::Notify);
        assert!(d.validate(&params(json!({"message": "hi", "level": null}))).is_ok());
    }

    #[test]
    fn test_adapter_output_to_value() {
        let out = AdapterOutput::new("sent").with_data(json!({"id": 7}));
        assert_eq!(out.to_value()["data"]["id"], 7);
    }
}
