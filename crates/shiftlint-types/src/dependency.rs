use crate::{Error, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A resolved dependency reported by a provider for one source file.
///
/// Produced by providers, owned by the per-session dependency cache, shared
/// read-only with rule evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Dependency scope as the build tool reports it (`compile`, `runtime`, ...).
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_identifier: Option<String>,
    #[serde(default)]
    pub indirect: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    /// URI prefix of files that belong to this dependency, used to adopt
    /// its labels for incident filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_uri_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,
}

impl Dependency {
    /// Identity used for deduplication within one file's dependency list.
    pub fn dedup_key(&self) -> (String, String, Option<String>) {
        (
            self.name.clone(),
            self.version.clone(),
            self.resolved_identifier.clone(),
        )
    }
}

/// One node of a per-file dependency DAG, preserving the direct/indirect
/// hierarchy flat dependency lists discard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepDagItem {
    pub dep: Dependency,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DepDagItem>,
}

impl DepDagItem {
    /// Flatten the subtree into a dependency list, marking every node below
    /// the root as indirect.
    pub fn flatten(&self) -> Vec<Dependency> {
        let mut out = vec![self.dep.clone()];
        for child in &self.children {
            for mut dep in child.flatten() {
                dep.indirect = true;
                out.push(dep);
            }
        }
        out
    }
}

/// An inclusive version interval; either bound may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<String>,
}

impl VersionRange {
    /// True when `version` lies within `[lower, upper]`.
    ///
    /// Invalid version strings on either side are reported as errors, never
    /// treated as a non-match.
    pub fn contains(&self, version: &str) -> Result<bool> {
        let version = parse_lenient(version)?;
        if let Some(lower) = &self.lower_bound
            && version < parse_lenient(lower)?
        {
            return Ok(false);
        }
        if let Some(upper) = &self.upper_bound
            && version > parse_lenient(upper)?
        {
            return Ok(false);
        }
        Ok(true)
    }
}

/// Parse a version that may omit minor/patch components or carry a leading
/// `v`, as build tools commonly emit (`1.2`, `v4`, `4.0.1.Final`).
pub fn parse_lenient(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return Err(Error::InvalidVersion(raw.to_string()));
    }
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    // Split off a trailing qualifier (".Final", ".RELEASE") and pad missing
    // numeric components before giving up.
    let mut numeric = Vec::new();
    let mut pre = None;
    for (i, part) in trimmed.split('.').enumerate() {
        if numeric.len() < 3 && part.chars().all(|c| c.is_ascii_digit()) && !part.is_empty() {
            numeric.push(part);
        } else {
            pre = Some(trimmed.splitn(i + 1, '.').last().unwrap_or(part));
            break;
        }
    }
    if numeric.is_empty() {
        return Err(Error::InvalidVersion(raw.to_string()));
    }
    let mut padded = numeric
        .iter()
        .chain(std::iter::repeat(&"0"))
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(".");
    if let Some(pre) = pre {
        let sanitized: String = pre
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
            .collect();
        padded = format!("{}-{}", padded, sanitized);
    }
    Version::parse(&padded).map_err(|_| Error::InvalidVersion(raw.to_string()))
}
