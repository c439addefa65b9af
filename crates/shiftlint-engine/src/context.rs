use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use shiftlint_types::ChainTemplate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// Tag set shared across every rule in one run. Tag-adding rules insert;
/// `hasTags` conditions read a snapshot.
#[derive(Debug, Clone, Default)]
pub struct RunTags {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl RunTags {
    pub fn seeded(tags: impl IntoIterator<Item = String>) -> Self {
        RunTags {
            inner: Arc::new(RwLock::new(tags.into_iter().collect())),
        }
    }

    pub fn add(&self, tags: &[String]) {
        let mut set = self.inner.write().expect("tag set poisoned");
        for tag in tags {
            set.insert(tag.clone());
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("tag set poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

/// Per-rule evaluation state: chain bindings published so far, the active
/// `from` scope, and the shared run tags.
#[derive(Debug, Clone)]
pub struct ConditionContext {
    pub rule_id: String,
    pub tags: RunTags,
    pub templates: BTreeMap<String, ChainTemplate>,
    pub scope: ChainTemplate,
}

impl ConditionContext {
    pub fn new(rule_id: impl Into<String>, tags: RunTags) -> Self {
        ConditionContext {
            rule_id: rule_id.into(),
            tags,
            templates: BTreeMap::new(),
            scope: ChainTemplate::default(),
        }
    }
}

static QUOTED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""\{\{\s*([A-Za-z0-9_./\-]+)\s*\}\}""#).expect("static regex"));
static INLINE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_./\-]+)\s*\}\}").expect("static regex"));

/// Substitute `{{ name.field }}` placeholders in a condition payload.
///
/// A placeholder that is the entire value of a JSON string is replaced by
/// the serialized binding (quotation stripping: a list substitutes as a
/// list, not a string). Placeholders embedded in longer strings render as
/// scalars. Unknown bindings render as empty.
pub fn render_payload(info: &Value, templates: &BTreeMap<String, ChainTemplate>) -> Value {
    let serialized = info.to_string();
    if !serialized.contains("{{") {
        return info.clone();
    }
    let pass1 = QUOTED_PLACEHOLDER.replace_all(&serialized, |caps: &regex::Captures<'_>| {
        let value = lookup(templates, &caps[1]).unwrap_or(Value::String(String::new()));
        value.to_string()
    });
    let pass2 = INLINE_PLACEHOLDER.replace_all(&pass1, |caps: &regex::Captures<'_>| {
        // Inside a JSON string: render as an escaped scalar fragment
        let rendered = lookup(templates, &caps[1])
            .map(|v| scalar(&v))
            .unwrap_or_default();
        let escaped = serde_json::to_string(&rendered).unwrap_or_default();
        escaped.trim_matches('"').to_string()
    });
    serde_json::from_str(&pass2).unwrap_or_else(|_| info.clone())
}

/// Render a rule message, resolving incident variables first and chain
/// bindings second.
pub fn render_message(
    template: &str,
    variables: &BTreeMap<String, Value>,
    templates: &BTreeMap<String, ChainTemplate>,
) -> String {
    INLINE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            if let Some(value) = variables.get(key) {
                return scalar(value);
            }
            lookup(templates, key).map(|v| scalar(&v)).unwrap_or_default()
        })
        .to_string()
}

/// Resolve `name.field` against the chain templates. Fields are
/// `filepaths`, `excludedPaths`, or a key into the template's extras.
fn lookup(templates: &BTreeMap<String, ChainTemplate>, path: &str) -> Option<Value> {
    let (name, field) = path.split_once('.')?;
    let template = templates.get(name)?;
    match field {
        "filepaths" => Some(Value::Array(
            template
                .filepaths
                .iter()
                .map(|p| Value::String(p.clone()))
                .collect(),
        )),
        "excludedPaths" => Some(Value::Array(
            template
                .excluded_paths
                .iter()
                .map(|p| Value::String(p.clone()))
                .collect(),
        )),
        extra => template.extras.get(extra).cloned(),
    }
}

/// Human rendering of a JSON value: bare strings, space-joined lists.
pub fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(scalar)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
