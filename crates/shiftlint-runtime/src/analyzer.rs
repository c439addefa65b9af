use crate::options::{AnalyzerOptions, ValidatedOptions};
use crate::progress::{ProgressBus, ProgressEvent, ProgressReporter, Stage, SubscriptionId};
use anyhow::{Context, Result, anyhow, bail};
use shiftlint_builtin::BuiltinProvider;
use shiftlint_engine::{
    DepLabelRules, DependencyResolver, RuleEngine, RuleParser, RuleSet, RunConfig,
};
use shiftlint_provider::{
    ConditionsByCapability, InitConfig, InitOutcome, Provider, ProviderConfig, load_settings,
};
use shiftlint_rpc::RemoteProvider;
use shiftlint_types::{AnalysisMode, CancelToken, FileChange, RuleSetReport};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Instant;

/// Name under which the filesystem-native provider is always registered.
const BUILTIN: &str = "builtin";

enum Phase {
    Constructed,
    Parsed,
    Started,
}

/// The façade over the whole engine: construct with validated options,
/// then `parse_rules` → `start_providers` → `run` → `stop`, in that order.
pub struct Analyzer {
    options: ValidatedOptions,
    root_token: CancelToken,
    progress: Arc<ProgressBus>,
    providers: BTreeMap<String, Arc<dyn Provider>>,
    configs: BTreeMap<String, ProviderConfig>,
    rule_sets: Vec<RuleSet>,
    conditions: BTreeMap<String, ConditionsByCapability>,
    resolver: Option<DependencyResolver>,
    phase: Phase,
    stopped: AtomicBool,
}

impl Analyzer {
    /// Validate options, load provider settings, and connect provider
    /// clients. No provider is initialized yet.
    pub fn new(options: AnalyzerOptions) -> Result<Self> {
        let options = options.validate()?;
        let mut configs: BTreeMap<String, ProviderConfig> = BTreeMap::new();
        for mut config in load_settings(&options.raw.provider_settings)? {
            if config.jwt_secret.is_none() {
                config.jwt_secret = options.raw.jwt_secret.clone();
            }
            if configs.insert(config.name.clone(), config).is_some() {
                bail!("duplicate provider entry in settings");
            }
        }
        // The built-in provider is always present; without an explicit
        // entry it inherits every configured location.
        if !configs.contains_key(BUILTIN) {
            let init_config = configs_union(configs.values());
            configs.insert(
                BUILTIN.to_string(),
                ProviderConfig {
                    name: BUILTIN.to_string(),
                    init_config,
                    ..Default::default()
                },
            );
        }

        let mut providers: BTreeMap<String, Arc<dyn Provider>> = BTreeMap::new();
        let mut problems = Vec::new();
        for (name, config) in &configs {
            if name == BUILTIN {
                providers.insert(name.clone(), Arc::new(BuiltinProvider::new()));
                continue;
            }
            match RemoteProvider::from_config(config, "shiftlint") {
                Ok(Some(remote)) => {
                    providers.insert(name.clone(), Arc::new(remote));
                }
                Ok(None) => problems.push(format!(
                    "provider {:?} has neither an address nor a binaryPath",
                    name
                )),
                Err(err) => problems.push(format!("provider {:?}: {}", name, err)),
            }
        }
        if !problems.is_empty() {
            bail!(problems.join("; "));
        }

        Ok(Analyzer {
            options,
            root_token: CancelToken::new(),
            progress: Arc::new(ProgressBus::new()),
            providers,
            configs,
            rule_sets: Vec::new(),
            conditions: BTreeMap::new(),
            resolver: None,
            phase: Phase::Constructed,
            stopped: AtomicBool::new(false),
        })
    }

    /// Register an in-process provider under a name, replacing any remote
    /// client configured for it. Must happen before `parse_rules`.
    pub fn register_provider(&mut self, name: &str, provider: Arc<dyn Provider>) {
        self.providers.insert(name.to_string(), provider);
    }

    pub fn subscribe(&self, reporter: Arc<dyn ProgressReporter>) -> SubscriptionId {
        self.progress.subscribe(reporter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.progress.unsubscribe(id);
    }

    /// Parse and bind every rule path. Failures aggregate; retry with the
    /// offending files removed to proceed with the valid subset.
    pub fn parse_rules(&mut self) -> Result<()> {
        self.progress
            .publish(ProgressEvent::stage_started(Stage::RuleParsing));
        let mut parser = RuleParser::new(
            self.providers.clone(),
            self.options.label_selector.clone(),
        );
        let output = parser.parse_paths(&self.options.raw.rule_paths);
        self.rule_sets = output.rule_sets;
        self.conditions = output.conditions_by_provider;
        let rule_count: usize = self.rule_sets.iter().map(|set| set.rules.len()).sum();
        tracing::info!(
            rule_sets = self.rule_sets.len(),
            rules = rule_count,
            "rules parsed"
        );
        if let Some(err) = shiftlint_engine::Error::join(output.errors) {
            return Err(anyhow!(err.to_string()));
        }
        self.phase = Phase::Parsed;
        Ok(())
    }

    /// Boot every non-built-in provider in parallel under the start
    /// timeout, then the built-in provider last with the union of locations
    /// the others discovered, then `prepare` each with its conditions.
    pub fn start_providers(&mut self) -> Result<()> {
        if matches!(self.phase, Phase::Constructed) {
            bail!("parse_rules must run before start_providers");
        }
        self.progress
            .publish(ProgressEvent::stage_started(Stage::ProviderStart));

        let (tx, rx) = channel::<(String, shiftlint_provider::Result<InitOutcome>)>();
        let mut launched = 0usize;
        for (name, provider) in &self.providers {
            if name == BUILTIN {
                continue;
            }
            launched += 1;
            let tx = tx.clone();
            let name = name.clone();
            let provider = provider.clone();
            let config = self
                .configs
                .get(&name)
                .cloned()
                .unwrap_or_else(|| ProviderConfig {
                    name: name.clone(),
                    ..Default::default()
                });
            let token = self.root_token.child();
            std::thread::Builder::new()
                .name(format!("provider-start-{}", name))
                .spawn(move || {
                    let outcome = provider.init(&token, &config);
                    let _ = tx.send((name, outcome));
                })
                .map_err(|e| anyhow!("failed to spawn provider start thread: {}", e))?;
        }
        drop(tx);

        let deadline = Instant::now() + self.options.raw.provider_start_timeout;
        let mut discovered: Vec<InitConfig> = Vec::new();
        let mut problems = Vec::new();
        for _ in 0..launched {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((name, Ok(outcome))) => {
                    tracing::info!(provider = %name, session = outcome.session_id, "provider started");
                    self.progress.publish(ProgressEvent {
                        stage: Stage::ProviderInit,
                        message: name.clone(),
                        completed: 0,
                        total: launched,
                    });
                    discovered.extend(outcome.discovered);
                }
                Ok((name, Err(err))) => {
                    // Fatal only if some surviving rule needs this provider
                    if self.conditions.contains_key(&name) {
                        problems.push(format!("provider {:?} failed to start: {}", name, err));
                    } else {
                        tracing::warn!(provider = %name, %err, "unused provider failed to start");
                    }
                }
                Err(_) => {
                    problems.push(format!(
                        "provider start timed out after {:?}",
                        self.options.raw.provider_start_timeout
                    ));
                    break;
                }
            }
        }
        if !problems.is_empty() {
            bail!(problems.join("; "));
        }

        // Built-in goes last so it can absorb workspaces the language
        // providers discovered during their init.
        let builtin = &self.providers[BUILTIN];
        let mut builtin_config = self.configs[BUILTIN].clone();
        builtin_config.init_config.extend(discovered.clone());
        builtin
            .init(&self.root_token.child(), &builtin_config)
            .with_context(|| "builtin provider failed to start")?;
        if !discovered.is_empty() {
            builtin.provider_init(&self.root_token.child(), discovered)?;
        }

        self.progress
            .publish(ProgressEvent::stage_started(Stage::ProviderPrepare));
        for (name, conditions) in &self.conditions {
            let Some(provider) = self.providers.get(name) else {
                continue;
            };
            provider
                .prepare(&self.root_token.child(), conditions)
                .with_context(|| format!("provider {:?} failed to prepare", name))?;
        }

        if self.options.raw.analysis_mode == AnalysisMode::Full
            && !self.options.raw.disable_dep_rules
        {
            let rules = DepLabelRules::from_files(
                self.options.raw.open_source_packages_file.as_deref(),
                self.options.raw.excluded_packages_file.as_deref(),
            )
            .map_err(|e| anyhow!(e.to_string()))?;
            self.resolver = Some(DependencyResolver::new(self.providers.clone(), rules));
        }

        self.phase = Phase::Started;
        Ok(())
    }

    /// Evaluate every included rule and return per-set reports sorted by
    /// name.
    pub fn run(&self) -> Result<Vec<RuleSetReport>> {
        if !matches!(self.phase, Phase::Started) {
            bail!("start_providers must run before run");
        }
        self.progress
            .publish(ProgressEvent::stage_started(Stage::RuleEvaluation));

        let config = RunConfig {
            workers: self.options.raw.workers,
            incident_limit: self.options.raw.incident_limit,
            code_snip_limit: self.options.raw.code_snip_limit,
            context_lines: self.options.raw.context_lines,
            incident_selector: self.options.incident_selector.clone(),
            dep_label_selector: self.options.dep_label_selector.clone(),
            seed_tags: self.options.raw.initial_tags.clone(),
        };
        let engine = RuleEngine::new(self.providers.clone(), config);
        let progress = self.progress.clone();
        let reports = engine
            .run(
                &self.rule_sets,
                self.resolver.as_ref(),
                &self.root_token,
                &move |completed, total| {
                    progress.publish(ProgressEvent {
                        stage: Stage::RuleEvaluation,
                        message: String::new(),
                        completed,
                        total,
                    });
                },
            )
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(reports)
    }

    /// Forward a best-effort change hint to every provider and drop the
    /// cached dependency results the hint may have invalidated.
    pub fn notify_file_changes(&self, changes: &[FileChange]) {
        for (name, provider) in &self.providers {
            if let Err(err) = provider.notify_file_changes(&self.root_token.child(), changes) {
                tracing::debug!(provider = %name, %err, "file change hint dropped");
            }
        }
        if let Some(resolver) = &self.resolver {
            resolver.invalidate();
        }
    }

    /// Cancel the root context, stop every provider, and drop progress
    /// subscribers. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("analyzer stopping");
        self.root_token.cancel();
        for provider in self.providers.values() {
            provider.stop();
        }
        self.progress.unsubscribe_all();
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Union of every provider's locations, for the implicit builtin entry.
fn configs_union<'a>(configs: impl Iterator<Item = &'a ProviderConfig>) -> Vec<InitConfig> {
    let mut union: Vec<InitConfig> = Vec::new();
    for config in configs {
        for init in &config.init_config {
            if !union.iter().any(|existing| existing.location == init.location) {
                union.push(init.clone());
            }
        }
    }
    union
}
