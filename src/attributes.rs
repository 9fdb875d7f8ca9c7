//! User-overridable script attributes.
//!
//! Every top-level primitive a script produces (bool, int, float, string)
//! is surfaced as an [`AttributeRecord`]. Records are keyed by (key, kind)
//! so a name that changes type keeps the value recorded for its old type.
//! Re-evaluation only ever flips `defined`; stored values belong to the user.

use serde::{Deserialize, Serialize};

use crate::scripting::{NameBindings, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Bool,
    Int,
    Float,
    Str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Bool(_) => AttributeKind::Bool,
            AttributeValue::Int(_) => AttributeKind::Int,
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::Str(_) => AttributeKind::Str,
        }
    }

    /// The primitive held by an evaluated value, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            Value::Int(i) => Some(AttributeValue::Int(*i)),
            Value::Float(f) => Some(AttributeValue::Float(*f)),
            Value::Str(s) => Some(AttributeValue::Str(s.clone())),
            _ => None,
        }
    }

    /// Parse user input (e.g. a CLI `--set` value) as a value of `kind`.
    pub fn parse(kind: AttributeKind, text: &str) -> Result<Self, String> {
        let text = text.trim();
        match kind {
            AttributeKind::Bool => text
                .parse()
                .map(AttributeValue::Bool)
                .map_err(|_| format!("'{}' is not a boolean", text)),
            AttributeKind::Int => text
                .parse()
                .map(AttributeValue::Int)
                .map_err(|_| format!("'{}' is not an integer", text)),
            AttributeKind::Float => text
                .parse()
                .map(AttributeValue::Float)
                .map_err(|_| format!("'{}' is not a number", text)),
            AttributeKind::Str => Ok(AttributeValue::Str(text.to_string())),
        }
    }

    /// Format the value as a script literal.
    pub fn to_literal(&self) -> String {
        match self {
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Int(i) => i.to_string(),
            AttributeValue::Float(f) if f.is_nan() => "(0.0 / 0.0)".to_string(),
            AttributeValue::Float(f) if f.is_infinite() => {
                if *f > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" }.to_string()
            }
            AttributeValue::Float(f) => {
                let text = f.to_string();
                if text.contains('.') {
                    text
                } else {
                    format!("{}.0", text)
                }
            }
            AttributeValue::Str(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\r', "\\r")
                    .replace('\t', "\\t");
                format!("\"{}\"", escaped)
            }
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// One user-overridable primitive surfaced from a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub key: String,
    pub value: AttributeValue,
    /// Whether the latest successful evaluation still produced this key
    /// with this kind.
    pub defined: bool,
}

impl AttributeRecord {
    pub fn new(key: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            key: key.into(),
            value,
            defined: true,
        }
    }

    pub fn kind(&self) -> AttributeKind {
        self.value.kind()
    }

    /// Replace the stored value (a user edit). The kind must not change.
    pub fn set_value(&mut self, value: AttributeValue) -> Result<(), String> {
        if value.kind() != self.kind() {
            return Err(format!(
                "attribute '{}' holds a {:?}, not a {:?}",
                self.key,
                self.kind(),
                value.kind()
            ));
        }
        self.value = value;
        Ok(())
    }
}

/// Find the record for (key, kind).
pub fn find_mut<'a>(
    records: &'a mut [AttributeRecord],
    key: &str,
    kind: AttributeKind,
) -> Option<&'a mut AttributeRecord> {
    records
        .iter_mut()
        .find(|r| r.key == key && r.kind() == kind)
}

/// Sync records with a successful evaluation.
///
/// Existing records only have `defined` updated; primitives with no record
/// for their (key, kind) get a new one appended.
pub fn reconcile(bindings: &NameBindings, records: &mut Vec<AttributeRecord>) {
    for record in records.iter_mut() {
        record.defined = bindings
            .get(&record.key)
            .and_then(AttributeValue::from_value)
            .is_some_and(|value| value.kind() == record.kind());
    }

    for (key, value) in bindings.iter() {
        let Some(value) = AttributeValue::from_value(value) else {
            continue;
        };
        let exists = records
            .iter()
            .any(|r| &r.key == key && r.kind() == value.kind());
        if !exists {
            log::debug!("New attribute '{}' = {}", key, value);
            records.push(AttributeRecord::new(key.clone(), value));
        }
    }
}
