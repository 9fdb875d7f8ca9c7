//! Per-root binding state, persisted with the host document.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeRecord;
use crate::scene_graph::ObjectId;
use crate::text_source::SourceId;

fn default_auto_regenerate() -> bool {
    true
}

/// Back-reference to a host object generated for a binding. The host scene
/// owns the object; the reference is only used to clean it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedObjectRef {
    pub object: ObjectId,
    pub name: String,
}

/// Association between a root object, its script, its attributes and the
/// objects generated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptBinding {
    /// Text buffer identity, never a copy of its content.
    #[serde(default)]
    pub script: Option<SourceId>,

    #[serde(default = "default_auto_regenerate")]
    pub auto_regenerate: bool,

    #[serde(default)]
    pub attributes: Vec<AttributeRecord>,

    #[serde(default)]
    pub generated: Vec<GeneratedObjectRef>,
}

impl ScriptBinding {
    pub fn new(script: Option<SourceId>) -> Self {
        Self {
            script,
            auto_regenerate: default_auto_regenerate(),
            attributes: Vec::new(),
            generated: Vec::new(),
        }
    }
}

/// One root's binding as stored in a host document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedBinding {
    pub root: ObjectId,
    pub binding: ScriptBinding,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeValue;

    #[test]
    fn test_defaults_from_sparse_json() {
        let binding: ScriptBinding = serde_json::from_str("{}").unwrap();
        assert_eq!(binding, ScriptBinding::new(None));
        assert!(binding.auto_regenerate);
    }

    #[test]
    fn test_document_round_trip_keeps_records_and_refs() {
        let mut binding = ScriptBinding::new(Some(SourceId(7)));
        binding.auto_regenerate = false;
        binding
            .attributes
            .push(AttributeRecord::new("width", AttributeValue::Str("10".into())));
        binding.generated.push(GeneratedObjectRef {
            object: ObjectId(3),
            name: "result".into(),
        });

        let stored = vec![PersistedBinding {
            root: ObjectId(1),
            binding,
        }];
        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("autoRegenerate"));

        let loaded: Vec<PersistedBinding> = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, stored);
    }
}
