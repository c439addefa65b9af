mod cancel;
mod dependency;
mod error;
mod incident;
mod labels;
mod report;
mod rules;
mod uri;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use cancel::CancelToken;
pub use dependency::{DepDagItem, Dependency, VersionRange, parse_lenient};
pub use error::{Error, Result};
pub use incident::{CodeLocation, Incident, Position};
pub use labels::{Label, LabelSelector};
pub use report::{RuleSetReport, Violation};
pub use rules::{Category, Link, RuleMeta, RuleSetMeta};
pub use uri::{canonical_file_uri, file_uri, uri_to_path};

/// A named provider feature such as `referenced`, `file`, or `dependency`.
///
/// Only the name is significant for dispatch; the schemas feed the CLI help
/// surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl Capability {
    pub fn named(name: impl Into<String>) -> Self {
        Capability {
            name: name.into(),
            input_schema: None,
            output_schema: None,
        }
    }
}

/// Per-name binding emitted by a chain condition and consumed by later
/// siblings in the same rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTemplate {
    #[serde(default)]
    pub filepaths: Vec<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,
}

impl ChainTemplate {
    /// Merge another template's scope into this one, deduplicating paths.
    pub fn merge(&mut self, other: &ChainTemplate) {
        for path in &other.filepaths {
            if !self.filepaths.contains(path) {
                self.filepaths.push(path.clone());
            }
        }
        for path in &other.excluded_paths {
            if !self.excluded_paths.contains(path) {
                self.excluded_paths.push(path.clone());
            }
        }
        for (key, value) in &other.extras {
            self.extras.insert(key.clone(), value.clone());
        }
    }
}

/// Kind of change reported through `NotifyFileChanges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

/// Best-effort incremental hint handed to providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub uri: String,
    pub kind: FileChangeKind,
}

/// Whether dependency information participates in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    #[default]
    Full,
    SourceOnly,
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisMode::Full => write!(f, "full"),
            AnalysisMode::SourceOnly => write!(f, "source-only"),
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" | "" => Ok(AnalysisMode::Full),
            "source-only" => Ok(AnalysisMode::SourceOnly),
            other => Err(format!("unknown analysis mode: {:?}", other)),
        }
    }
}
