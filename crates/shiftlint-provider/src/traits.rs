use crate::Result;
use crate::config::{InitConfig, ProviderConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shiftlint_types::{
    CancelToken, Capability, ChainTemplate, CodeLocation, DepDagItem, Dependency, FileChange,
};
use std::collections::BTreeMap;

/// Dependencies keyed by the `file://` URI of the manifest that declares them.
pub type DepsByFile = BTreeMap<String, Vec<Dependency>>;
/// DAG variant preserving the direct/indirect hierarchy.
pub type DepDagsByFile = BTreeMap<String, Vec<DepDagItem>>;
/// Union of condition payloads that will ever be evaluated, per capability.
pub type ConditionsByCapability = BTreeMap<String, Vec<Value>>;

/// Rule-scoped state the engine embeds into every evaluate payload under
/// the `providerContext` key: the run's templated tag set and the chain
/// templates visible to the condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template: BTreeMap<String, ChainTemplate>,
    /// Path constraints consumed from the condition's `from` chain links.
    #[serde(default, skip_serializing_if = "scope_is_empty")]
    pub scope: ChainTemplate,
}

fn scope_is_empty(scope: &ChainTemplate) -> bool {
    scope.filepaths.is_empty() && scope.excluded_paths.is_empty() && scope.extras.is_empty()
}

impl ProviderContext {
    /// Merge this context into a condition payload under the
    /// `providerContext` key. A payload that is not an object (e.g. the
    /// bare tag list of `hasTags`) is wrapped as `{"value": payload}`.
    pub fn embed(&self, info: &mut Value) {
        let Ok(ctx) = serde_json::to_value(self) else {
            return;
        };
        match info {
            Value::Object(map) => {
                map.insert("providerContext".to_string(), ctx);
            }
            other => {
                let original = other.take();
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), original);
                map.insert("providerContext".to_string(), ctx);
                *other = Value::Object(map);
            }
        }
    }

    /// Extract the context a caller embedded, if any.
    pub fn extract(info: &Value) -> ProviderContext {
        info.get("providerContext")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Undo `embed`'s wrapping for payloads that were not objects.
    pub fn unwrap_value(info: &Value) -> &Value {
        info.get("value").unwrap_or(info)
    }
}

/// One finding inside a provider's evaluate response, before the engine
/// normalizes it into an incident.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentContext {
    pub file_uri: String,
    /// As reported; may be zero or negative, the engine forces it positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_location: Option<CodeLocation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub is_dependency_incident: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
}

/// Outcome of one evaluate call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incidents: Vec<IncidentContext>,
    /// Extra values published into the rule's chain template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_context: BTreeMap<String, Value>,
}

/// Result of `init`: the issued session and any additional locations the
/// provider discovered (decompiled archives, generated sources) that the
/// built-in provider should also scan.
#[derive(Debug, Clone, Default)]
pub struct InitOutcome {
    pub session_id: i64,
    pub discovered: Vec<InitConfig>,
}

/// The uniform contract every language analyzer satisfies, whether it runs
/// in-process or behind the RPC transport.
///
/// Lifecycle is monotonic: `init` → (`provider_init`?) → `prepare` →
/// `evaluate`* → `stop`. `capabilities` is pure and callable before `init`;
/// `stop` is idempotent and cancels in-flight evaluates.
pub trait Provider: Send + Sync {
    fn capabilities(&self) -> Vec<Capability>;

    /// Bring the provider up for one configuration. May spawn subprocesses
    /// or subordinate language servers.
    fn init(&self, ctx: &CancelToken, config: &ProviderConfig) -> Result<InitOutcome>;

    /// Batched multi-workspace init for providers that share one runtime
    /// across several code locations.
    fn provider_init(&self, ctx: &CancelToken, additional: Vec<InitConfig>) -> Result<()>;

    /// One-time warmup with the full set of conditions that will later be
    /// evaluated. Idempotent relative to a session.
    fn prepare(&self, ctx: &CancelToken, conditions: &ConditionsByCapability) -> Result<()>;

    /// Request-scoped, cancellation-respecting condition evaluation.
    fn evaluate(
        &self,
        ctx: &CancelToken,
        capability: &str,
        condition_info: &Value,
    ) -> Result<EvaluateResponse>;

    /// May return `Error::Unsupported`; callers cache results per session.
    fn get_dependencies(&self, ctx: &CancelToken) -> Result<DepsByFile>;

    /// May return `Error::Unsupported`.
    fn get_dependencies_dag(&self, ctx: &CancelToken) -> Result<DepDagsByFile>;

    /// Best-effort incremental hint; failures are logged, not propagated.
    fn notify_file_changes(&self, ctx: &CancelToken, changes: &[FileChange]) -> Result<()>;

    /// Release all owned resources including child processes. Idempotent.
    fn stop(&self);

    /// Optional sub-contract, feature-detected.
    fn dependency_location_resolver(&self) -> Option<&dyn DependencyLocationResolver> {
        None
    }

    /// Optional sub-contract, feature-detected.
    fn code_snippet_resolver(&self) -> Option<&dyn CodeSnippetResolver> {
        None
    }
}

/// Maps a dependency to the file range where it is declared.
pub trait DependencyLocationResolver: Send + Sync {
    fn resolve_location(
        &self,
        ctx: &CancelToken,
        dep: &Dependency,
        file_uri: &str,
    ) -> Result<Option<CodeLocation>>;
}

/// Extracts context lines around a location for incident snippets.
pub trait CodeSnippetResolver: Send + Sync {
    fn code_snip(
        &self,
        ctx: &CancelToken,
        file_uri: &str,
        location: &CodeLocation,
        context_lines: usize,
    ) -> Result<Option<String>>;
}
