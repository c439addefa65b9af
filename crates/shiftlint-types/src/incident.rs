use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Zero-based position within a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// A start/end range within a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    pub start_position: Position,
    pub end_position: Position,
}

impl CodeLocation {
    /// Clamp the range so that end never precedes start.
    pub fn normalized(self) -> Self {
        if (self.end_position.line, self.end_position.character)
            < (self.start_position.line, self.start_position.character)
        {
            CodeLocation {
                start_position: self.start_position,
                end_position: self.start_position,
            }
        } else {
            self
        }
    }
}

/// A single finding produced by a matched rule. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Absolute, canonicalized `file://` URI.
    pub uri: String,
    /// Rendered rule message.
    #[serde(default)]
    pub message: String,
    /// 1-based line number, when the provider reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_location: Option<CodeLocation>,
    /// Context lines around the finding, when a snippet resolver exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snip: Option<String>,
    /// Templating inputs for the rule message, keyed by variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dependency_incident: bool,
    /// Per-incident effort override, when it differs from the rule's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
}
