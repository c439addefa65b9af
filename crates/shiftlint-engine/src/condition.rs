use crate::context::{ConditionContext, render_payload, scalar};
use crate::deps::{DepLabelIndex, DependencyResolver};
use crate::{Error, Result};
use serde_json::Value;
use shiftlint_provider::{IncidentContext, Provider, ProviderContext};
use shiftlint_types::{
    CancelToken, ChainTemplate, Label, LabelSelector, VersionRange, canonical_file_uri,
    uri_to_path,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A leaf that ships a condition payload to a provider capability.
pub struct ProviderCall {
    pub provider: String,
    pub capability: String,
    pub info: Value,
    pub client: Arc<dyn Provider>,
}

impl fmt::Debug for ProviderCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCall")
            .field("provider", &self.provider)
            .field("capability", &self.capability)
            .finish()
    }
}

/// A leaf that evaluates version predicates against a provider's
/// dependency set.
#[derive(Debug)]
pub struct DependencyCall {
    pub provider: String,
    pub dep_name: String,
    pub range: VersionRange,
}

/// A bound condition tree: every provider reference resolved, every chain
/// link validated.
#[derive(Debug)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Chain(ChainNode),
    ProviderCall(ProviderCall),
    DependencyRange(DependencyCall),
}

/// Binding node: names a child's output (`as`) or consumes a prior
/// sibling's output as scope (`from`).
#[derive(Debug)]
pub struct ChainNode {
    pub as_name: Option<String>,
    pub from: Option<String>,
    pub ignorable: bool,
    pub child: Box<Condition>,
}

impl Condition {
    /// True when any leaf below this node needs dependency information.
    pub fn uses_dependencies(&self) -> bool {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                children.iter().any(|c| c.uses_dependencies())
            }
            Condition::Not(child) => child.uses_dependencies(),
            Condition::Chain(node) => node.child.uses_dependencies(),
            Condition::ProviderCall(_) => false,
            Condition::DependencyRange(_) => true,
        }
    }

    /// True when every leaf below this node is a dependency condition.
    pub fn only_dependencies(&self) -> bool {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                !children.is_empty() && children.iter().all(|c| c.only_dependencies())
            }
            Condition::Not(child) => child.only_dependencies(),
            Condition::Chain(node) => node.child.only_dependencies(),
            Condition::ProviderCall(_) => false,
            Condition::DependencyRange(_) => true,
        }
    }
}

/// A normalized finding plus the provider that produced it, so the
/// scheduler can consult that provider's snippet resolver.
#[derive(Debug, Clone)]
pub struct CollectedIncident {
    pub context: IncidentContext,
    pub provider: String,
}

/// Result of evaluating one condition node.
#[derive(Debug, Default)]
pub struct EvalOutcome {
    pub matched: bool,
    /// Set by ignorable chains on a miss: enclosing `And` skips over it.
    pub transparent: bool,
    pub incidents: Vec<CollectedIncident>,
    /// Provider template context, consumed by an enclosing `as` chain.
    pub extras: BTreeMap<String, Value>,
}

impl EvalOutcome {
    fn miss() -> Self {
        EvalOutcome::default()
    }
}

/// Engine-wide filters and resolvers threaded through evaluation.
pub struct EvalSettings<'a> {
    pub incident_selector: Option<&'a LabelSelector>,
    pub dep_label_selector: Option<&'a LabelSelector>,
    pub dep_index: &'a DepLabelIndex,
    pub resolver: Option<&'a DependencyResolver>,
}

/// Evaluate a condition tree. Siblings run sequentially in document order;
/// chain bindings published by earlier siblings are visible to later ones.
pub fn evaluate(
    condition: &Condition,
    ctx: &mut ConditionContext,
    token: &CancelToken,
    settings: &EvalSettings<'_>,
) -> Result<EvalOutcome> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    match condition {
        Condition::And(children) => {
            let mut incidents = Vec::new();
            let mut any_matched = false;
            for child in children {
                let outcome = evaluate(child, ctx, token, settings)?;
                if !outcome.matched {
                    if outcome.transparent {
                        continue;
                    }
                    // Short-circuit: zero incidents regardless of the rest
                    return Ok(EvalOutcome::miss());
                }
                any_matched = true;
                incidents.extend(outcome.incidents);
            }
            Ok(EvalOutcome {
                matched: any_matched,
                incidents,
                ..Default::default()
            })
        }
        Condition::Or(children) => {
            // Every child runs even after the first match so each branch
            // contributes its incidents.
            let mut incidents = Vec::new();
            let mut matched = false;
            for child in children {
                let outcome = evaluate(child, ctx, token, settings)?;
                if outcome.matched {
                    matched = true;
                    incidents.extend(outcome.incidents);
                }
            }
            Ok(EvalOutcome {
                matched,
                incidents,
                ..Default::default()
            })
        }
        Condition::Not(child) => {
            // A negation preserves nothing: no incidents, no bindings.
            let saved_templates = ctx.templates.clone();
            let saved_scope = ctx.scope.clone();
            let outcome = evaluate(child, ctx, token, settings)?;
            ctx.templates = saved_templates;
            ctx.scope = saved_scope;
            Ok(EvalOutcome {
                matched: !outcome.matched,
                ..Default::default()
            })
        }
        Condition::Chain(node) => {
            let saved_scope = ctx.scope.clone();
            if let Some(from) = &node.from {
                // Parse-time validation guarantees the binding name exists;
                // a sibling that missed publishes an empty template.
                if let Some(template) = ctx.templates.get(from).cloned() {
                    ctx.scope.merge(&template);
                }
            }
            let outcome = evaluate(&node.child, ctx, token, settings);
            ctx.scope = saved_scope;
            let mut outcome = outcome?;

            if let Some(name) = &node.as_name {
                let template = template_from(&outcome);
                ctx.templates.insert(name.clone(), template);
                // A binding producer feeds downstream siblings; its own
                // findings surface through the consumers, not directly.
                outcome.incidents.clear();
            }
            if !outcome.matched && node.ignorable {
                outcome.transparent = true;
            }
            Ok(outcome)
        }
        Condition::ProviderCall(call) => eval_provider_call(call, ctx, token, settings),
        Condition::DependencyRange(call) => eval_dependency_range(call, ctx, token, settings),
    }
}

/// Build the published chain template from a child's outcome: the file set
/// comes from incident URIs, extras from the provider response.
fn template_from(outcome: &EvalOutcome) -> ChainTemplate {
    let mut template = ChainTemplate {
        extras: outcome.extras.clone(),
        ..Default::default()
    };
    // The provider's own filepaths binding wins over URI derivation when
    // present, so path shapes stay exactly as the provider emitted them.
    if let Some(Value::Array(paths)) = outcome.extras.get("filepaths") {
        template.filepaths = paths
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
    } else {
        for incident in &outcome.incidents {
            let path = uri_to_path(&incident.context.file_uri).display().to_string();
            if !template.filepaths.contains(&path) {
                template.filepaths.push(path);
            }
        }
    }
    template
}

fn eval_provider_call(
    call: &ProviderCall,
    ctx: &mut ConditionContext,
    token: &CancelToken,
    settings: &EvalSettings<'_>,
) -> Result<EvalOutcome> {
    let mut payload = render_payload(&call.info, &ctx.templates);
    let provider_ctx = ProviderContext {
        tags: ctx.tags.snapshot(),
        template: ctx.templates.clone(),
        scope: ctx.scope.clone(),
    };
    provider_ctx.embed(&mut payload);

    tracing::debug!(
        rule = %ctx.rule_id,
        provider = %call.provider,
        capability = %call.capability,
        "dispatching condition"
    );
    let response = call.client.evaluate(token, &call.capability, &payload)?;

    let mut incidents = Vec::new();
    for mut incident in response.incidents {
        normalize(&mut incident);
        if !passes_selectors(&incident, settings) {
            continue;
        }
        incidents.push(CollectedIncident {
            context: incident,
            provider: call.provider.clone(),
        });
    }
    Ok(EvalOutcome {
        matched: response.matched,
        incidents,
        extras: response.template_context,
        ..Default::default()
    })
}

fn eval_dependency_range(
    call: &DependencyCall,
    _ctx: &mut ConditionContext,
    token: &CancelToken,
    settings: &EvalSettings<'_>,
) -> Result<EvalOutcome> {
    let resolver = settings
        .resolver
        .ok_or_else(|| Error::Fatal("dependency resolution is disabled for this run".to_string()))?;
    let deps = resolver.flat(token, &call.provider)?;

    let mut outcome = EvalOutcome::miss();
    for (uri, file_deps) in deps.iter() {
        for dep in file_deps {
            if dep.name != call.dep_name {
                continue;
            }
            // Invalid versions are per-call errors, never a silent miss
            if !call.range.contains(&dep.version).map_err(|e| {
                Error::Provider(shiftlint_provider::Error::Evaluate(e.to_string()))
            })? {
                continue;
            }
            outcome.matched = true;
            let mut variables = BTreeMap::new();
            variables.insert("name".to_string(), Value::String(dep.name.clone()));
            variables.insert("version".to_string(), Value::String(dep.version.clone()));
            let mut incident = IncidentContext {
                file_uri: uri.clone(),
                variables,
                is_dependency_incident: true,
                ..Default::default()
            };
            // Providers that can point at the declaration upgrade the
            // incident from file-level to range-level
            if let Some(provider) = resolver.provider(&call.provider)
                && let Some(locations) = provider.dependency_location_resolver()
                && let Ok(Some(location)) = locations.resolve_location(token, dep, uri)
            {
                incident.line_number = Some(i64::from(location.start_position.line) + 1);
                incident.code_location = Some(location);
            }
            normalize(&mut incident);
            if passes_selectors(&incident, settings) {
                outcome.incidents.push(CollectedIncident {
                    context: incident,
                    provider: call.provider.clone(),
                });
            }
        }
    }
    Ok(outcome)
}

/// Canonicalize the URI, force line numbers positive, and clamp code
/// locations to valid ranges.
fn normalize(incident: &mut IncidentContext) {
    incident.file_uri = canonical_file_uri(&incident.file_uri);
    if let Some(line) = incident.line_number {
        incident.line_number = Some(line.abs().max(1));
    }
    if let Some(location) = incident.code_location {
        incident.code_location = Some(location.normalized());
    }
}

fn passes_selectors(incident: &IncidentContext, settings: &EvalSettings<'_>) -> bool {
    if let Some(selector) = settings.incident_selector {
        let labels: Vec<Label> = incident
            .variables
            .iter()
            .map(|(key, value)| Label {
                key: key.clone(),
                value: Some(scalar(value)),
            })
            .collect();
        if !selector.matches(&labels) {
            return false;
        }
    }
    if let Some(selector) = settings.dep_label_selector
        && let Some(labels) = settings.dep_index.labels_for(&incident.file_uri)
        && !selector.matches(&labels)
    {
        return false;
    }
    true
}
