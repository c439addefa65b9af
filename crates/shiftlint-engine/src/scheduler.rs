use crate::condition::{CollectedIncident, EvalSettings, evaluate};
use crate::context::{ConditionContext, RunTags, render_message};
use crate::deps::{DepLabelIndex, DependencyResolver};
use crate::parse::{Rule, RuleSet};
use crate::{Error, Result};
use shiftlint_provider::Provider;
use shiftlint_types::{
    CancelToken, CodeLocation, Incident, LabelSelector, Position, RuleSetReport, Violation,
};
use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};

/// Default width of the rule worker pool.
pub const DEFAULT_WORKERS: usize = 10;

/// Engine-level knobs for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workers: usize,
    /// Cap on incidents per rule; 0 means unlimited.
    pub incident_limit: usize,
    /// Cap on rendered snippet characters; 0 means unlimited.
    pub code_snip_limit: usize,
    /// Lines of surrounding source fetched per incident; 0 disables.
    pub context_lines: usize,
    pub incident_selector: Option<LabelSelector>,
    pub dep_label_selector: Option<LabelSelector>,
    /// Tags present before any rule fires.
    pub seed_tags: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            workers: DEFAULT_WORKERS,
            incident_limit: 0,
            code_snip_limit: 0,
            context_lines: 10,
            incident_selector: None,
            dep_label_selector: None,
            seed_tags: Vec::new(),
        }
    }
}

/// Where one rule ended up after evaluation.
enum Disposition {
    Matched {
        violation: Option<Violation>,
        tags: Vec<String>,
    },
    Unmatched,
    Skipped(String),
    Errored(String),
    Cancelled,
}

struct RuleResult {
    set_idx: usize,
    rule_idx: usize,
    disposition: Disposition,
}

/// Parallel-across-rules evaluator. Within a rule, the condition tree runs
/// sequentially so chain bindings observe document order.
pub struct RuleEngine {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    config: RunConfig,
}

impl RuleEngine {
    pub fn new(providers: BTreeMap<String, Arc<dyn Provider>>, config: RunConfig) -> Self {
        RuleEngine { providers, config }
    }

    /// Run every included rule on the worker pool and assemble per-set
    /// reports, sorted by rule-set name.
    ///
    /// `resolver` is `None` when dependency rules are disabled; such rules
    /// are skipped with a recorded diagnostic. `progress` receives
    /// `(completed, total)` after every finished rule.
    pub fn run(
        &self,
        rule_sets: &[RuleSet],
        resolver: Option<&DependencyResolver>,
        token: &CancelToken,
        progress: &(dyn Fn(usize, usize) + Sync),
    ) -> Result<Vec<RuleSetReport>> {
        let run_tags = RunTags::seeded(self.config.seed_tags.iter().cloned());
        let dep_index = match (resolver, &self.config.dep_label_selector) {
            (Some(resolver), Some(_)) => resolver.label_index(token)?,
            _ => DepLabelIndex::default(),
        };

        let mut reports: Vec<RuleSetReport> = rule_sets
            .iter()
            .map(|set| RuleSetReport {
                name: set.meta.name.clone(),
                description: set.meta.description.clone(),
                ..Default::default()
            })
            .collect();

        // Queue every included rule; excluded ones go straight to the report
        let mut jobs = Vec::new();
        for (set_idx, set) in rule_sets.iter().enumerate() {
            for (rule_idx, rule) in set.rules.iter().enumerate() {
                if rule.excluded {
                    reports[set_idx].skipped.push(rule.meta.id.clone());
                } else {
                    jobs.push((set_idx, rule_idx));
                }
            }
        }
        let total = jobs.len();
        tracing::info!(rules = total, workers = self.config.workers, "rule evaluation starting");

        let (job_tx, job_rx) = channel::<(usize, usize)>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = channel::<RuleResult>();

        let workers = self.config.workers.max(1);
        std::thread::scope(|scope| -> Result<()> {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let run_tags = run_tags.clone();
                let dep_index = &dep_index;
                std::thread::Builder::new()
                    .name(format!("rule-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        loop {
                            let job = {
                                let rx = job_rx.lock().expect("job queue poisoned");
                                rx.recv()
                            };
                            let Ok((set_idx, rule_idx)) = job else { break };
                            if token.is_cancelled() {
                                break;
                            }
                            let rule = &rule_sets[set_idx].rules[rule_idx];
                            let disposition = self.evaluate_rule(
                                rule,
                                resolver,
                                dep_index,
                                run_tags.clone(),
                                token,
                            );
                            let sent = result_tx.send(RuleResult {
                                set_idx,
                                rule_idx,
                                disposition,
                            });
                            if sent.is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| Error::Fatal(format!("failed to spawn rule worker: {}", e)))?;
            }
            drop(result_tx);

            for job in jobs {
                // Receiver outlives senders inside the scope; send cannot fail
                let _ = job_tx.send(job);
            }
            drop(job_tx);

            self.collect(rule_sets, &mut reports, result_rx, total, progress);
            Ok(())
        })?;

        reports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(reports)
    }

    fn collect(
        &self,
        rule_sets: &[RuleSet],
        reports: &mut [RuleSetReport],
        result_rx: Receiver<RuleResult>,
        total: usize,
        progress: &(dyn Fn(usize, usize) + Sync),
    ) {
        let mut done = 0usize;
        for result in result_rx {
            done += 1;
            progress(done, total);
            let rule = &rule_sets[result.set_idx].rules[result.rule_idx];
            let report = &mut reports[result.set_idx];
            match result.disposition {
                Disposition::Matched { violation, tags } => {
                    for tag in tags {
                        if !report.tags.contains(&tag) {
                            report.tags.push(tag);
                        }
                    }
                    if let Some(violation) = violation {
                        report.violations.insert(rule.meta.id.clone(), violation);
                    }
                }
                Disposition::Unmatched => report.unmatched.push(rule.meta.id.clone()),
                Disposition::Skipped(reason) => {
                    tracing::debug!(rule = %rule.meta.id, %reason, "rule skipped");
                    report.skipped.push(rule.meta.id.clone());
                }
                Disposition::Errored(message) => {
                    report.errors.insert(rule.meta.id.clone(), message);
                }
                Disposition::Cancelled => {}
            }
        }
    }

    fn evaluate_rule(
        &self,
        rule: &Rule,
        resolver: Option<&DependencyResolver>,
        dep_index: &DepLabelIndex,
        run_tags: RunTags,
        token: &CancelToken,
    ) -> Disposition {
        if rule.when.uses_dependencies() && resolver.is_none() {
            return Disposition::Skipped("dependency conditions are disabled".to_string());
        }
        if rule.when.only_dependencies()
            && let Some(resolver) = resolver
            && !self.workspace_has_matching_deps(resolver, token)
        {
            return Disposition::Skipped("no dependency matches the selector".to_string());
        }

        let rule_token = token.child();
        let mut ctx = ConditionContext::new(rule.meta.id.clone(), run_tags.clone());
        let settings = EvalSettings {
            incident_selector: self.config.incident_selector.as_ref(),
            dep_label_selector: self.config.dep_label_selector.as_ref(),
            dep_index,
            resolver,
        };

        let outcome = match evaluate(&rule.when, &mut ctx, &rule_token, &settings) {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => return Disposition::Cancelled,
            Err(err) => return Disposition::Errored(err.to_string()),
        };
        if !outcome.matched {
            return Disposition::Unmatched;
        }

        if !rule.meta.tags.is_empty() {
            run_tags.add(&rule.meta.tags);
        }
        let violation = rule
            .meta
            .message
            .is_some()
            .then(|| self.build_violation(rule, &ctx, outcome.incidents, &rule_token));
        Disposition::Matched {
            violation,
            tags: rule.meta.tags.clone(),
        }
    }

    /// A dependency-only rule is pointless when no dependency survives the
    /// selector; report it as skipped instead of unmatched.
    fn workspace_has_matching_deps(
        &self,
        resolver: &DependencyResolver,
        token: &CancelToken,
    ) -> bool {
        let Ok(all) = resolver.all_flat(token) else {
            return true;
        };
        match &self.config.dep_label_selector {
            Some(selector) => all
                .values()
                .flatten()
                .any(|dep| selector.matches_strs(&dep.labels)),
            None => all.values().any(|deps| !deps.is_empty()),
        }
    }

    fn build_violation(
        &self,
        rule: &Rule,
        ctx: &ConditionContext,
        collected: Vec<CollectedIncident>,
        token: &CancelToken,
    ) -> Violation {
        let message_template = rule.meta.message.as_deref().unwrap_or("");
        let limit = if self.config.incident_limit == 0 {
            usize::MAX
        } else {
            self.config.incident_limit
        };

        let mut incidents = Vec::new();
        // Truncation is deterministic: first-N in provider response order
        for collected in collected.into_iter().take(limit) {
            let context = collected.context;
            let message = render_message(message_template, &context.variables, &ctx.templates);
            let code_snip = self.resolve_snippet(&collected.provider, &context, token);
            incidents.push(Incident {
                uri: context.file_uri,
                message,
                line_number: context.line_number.map(|l| l as u32),
                code_location: context.code_location,
                code_snip,
                variables: context.variables,
                is_dependency_incident: context.is_dependency_incident,
                effort: context.effort,
            });
        }

        Violation {
            description: rule.meta.description.clone(),
            category: rule.meta.category,
            labels: rule.meta.labels.clone(),
            links: rule.meta.links.clone(),
            effort: rule.meta.effort,
            incidents,
        }
    }

    fn resolve_snippet(
        &self,
        provider_name: &str,
        incident: &shiftlint_provider::IncidentContext,
        token: &CancelToken,
    ) -> Option<String> {
        if self.config.context_lines == 0 {
            return None;
        }
        let provider = self.providers.get(provider_name)?;
        let resolver = provider.code_snippet_resolver()?;
        let location = incident.code_location.unwrap_or_else(|| {
            let line = incident.line_number.unwrap_or(1).saturating_sub(1) as u32;
            CodeLocation {
                start_position: Position { line, character: 0 },
                end_position: Position { line, character: 0 },
            }
        });
        let snip = resolver
            .code_snip(token, &incident.file_uri, &location, self.config.context_lines)
            .ok()
            .flatten()?;
        Some(truncate_snip(snip, self.config.code_snip_limit))
    }
}

fn truncate_snip(snip: String, limit: usize) -> String {
    if limit == 0 || snip.len() <= limit {
        return snip;
    }
    let mut cut = limit;
    while cut > 0 && !snip.is_char_boundary(cut) {
        cut -= 1;
    }
    snip[..cut].to_string()
}
