use crate::condition::{ChainNode, Condition, DependencyCall, ProviderCall};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use shiftlint_provider::{ConditionsByCapability, Provider, yaml_to_json};
use shiftlint_types::{LabelSelector, Link, RuleMeta, RuleSetMeta, VersionRange};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reserved file name that carries a directory's rule-set metadata.
const RULESET_MANIFEST: &str = "ruleset.yaml";

/// A parsed rule bound to its providers.
pub struct Rule {
    pub meta: RuleMeta,
    pub when: Condition,
    /// Parsed but filtered out by the rule selector; never evaluated.
    pub excluded: bool,
}

/// A named bundle of parsed rules.
pub struct RuleSet {
    pub meta: RuleSetMeta,
    pub rules: Vec<Rule>,
}

/// Everything the parser learned from one batch of rule files.
pub struct ParseOutput {
    pub rule_sets: Vec<RuleSet>,
    /// Union of condition payloads per provider, handed to `prepare`.
    pub conditions_by_provider: BTreeMap<String, ConditionsByCapability>,
    /// One entry per rejected rule or file; good rules are unaffected.
    pub errors: Vec<Error>,
}

impl ParseOutput {
    /// The joined error for callers that treat any rejection as fatal.
    pub fn into_result(self) -> Result<(Vec<RuleSet>, BTreeMap<String, ConditionsByCapability>)> {
        match Error::join(self.errors) {
            Some(err) => Err(err),
            None => Ok((self.rule_sets, self.conditions_by_provider)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "ruleID")]
    rule_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<shiftlint_types::Category>,
    #[serde(default)]
    effort: Option<u32>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tag: Vec<String>,
    when: serde_yaml::Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawRuleSetMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: Vec<String>,
}

/// Parses rule files and binds their conditions to configured providers.
pub struct RuleParser {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    capabilities: BTreeMap<String, BTreeSet<String>>,
    rule_selector: Option<LabelSelector>,
    seen_rule_ids: BTreeSet<String>,
}

impl RuleParser {
    pub fn new(
        providers: BTreeMap<String, Arc<dyn Provider>>,
        rule_selector: Option<LabelSelector>,
    ) -> Self {
        let capabilities = providers
            .iter()
            .map(|(name, provider)| {
                let caps = provider
                    .capabilities()
                    .into_iter()
                    .map(|c| c.name)
                    .collect();
                (name.clone(), caps)
            })
            .collect();
        RuleParser {
            providers,
            capabilities,
            rule_selector,
            seen_rule_ids: BTreeSet::new(),
        }
    }

    /// Parse rule files and directories. Errors accumulate per rule; one
    /// bad rule never aborts the batch.
    pub fn parse_paths(&mut self, paths: &[PathBuf]) -> ParseOutput {
        let mut output = ParseOutput {
            rule_sets: Vec::new(),
            conditions_by_provider: BTreeMap::new(),
            errors: Vec::new(),
        };
        for path in paths {
            if path.is_dir() {
                self.parse_dir(path, &mut output);
            } else {
                self.parse_file(path, None, &mut output);
            }
        }
        output
    }

    fn parse_dir(&mut self, dir: &Path, output: &mut ParseOutput) {
        let manifest = dir.join(RULESET_MANIFEST);
        let dir_meta = if manifest.is_file() {
            match std::fs::read_to_string(&manifest)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_yaml::from_str::<RawRuleSetMeta>(&s).map_err(|e| e.to_string()))
            {
                Ok(meta) => Some(RuleSetMeta {
                    name: meta.name.unwrap_or_else(|| dir_name(dir)),
                    description: meta.description,
                    labels: meta.labels,
                }),
                Err(message) => {
                    output.errors.push(Error::Parse {
                        file: Some(manifest.clone()),
                        rule_id: None,
                        message,
                    });
                    None
                }
            }
        } else {
            None
        };

        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.file_name().and_then(|n| n.to_str()) != Some(RULESET_MANIFEST)
                        && p.extension()
                            .and_then(|e| e.to_str())
                            .is_some_and(|e| e == "yaml" || e == "yml")
                })
                .collect(),
            Err(e) => {
                output.errors.push(Error::Parse {
                    file: Some(dir.to_path_buf()),
                    rule_id: None,
                    message: e.to_string(),
                });
                return;
            }
        };
        files.sort();

        match dir_meta {
            // A manifest makes the whole directory one rule set
            Some(meta) => {
                let mut rules = Vec::new();
                for file in &files {
                    rules.extend(self.parse_rules_of_file(file, &meta, output));
                }
                output.rule_sets.push(RuleSet { meta, rules });
            }
            None => {
                for file in &files {
                    self.parse_file(file, None, output);
                }
            }
        }
    }

    fn parse_file(&mut self, file: &Path, meta: Option<RuleSetMeta>, output: &mut ParseOutput) {
        let meta = meta.unwrap_or_else(|| RuleSetMeta {
            name: file_stem(file),
            ..Default::default()
        });
        let rules = self.parse_rules_of_file(file, &meta, output);
        output.rule_sets.push(RuleSet { meta, rules });
    }

    /// Parse every document in one YAML file into rules of `set_meta`.
    fn parse_rules_of_file(
        &mut self,
        file: &Path,
        set_meta: &RuleSetMeta,
        output: &mut ParseOutput,
    ) -> Vec<Rule> {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                output.errors.push(Error::Parse {
                    file: Some(file.to_path_buf()),
                    rule_id: None,
                    message: e.to_string(),
                });
                return Vec::new();
            }
        };

        let mut rules = Vec::new();
        for document in serde_yaml::Deserializer::from_str(&content) {
            let value = match serde_yaml::Value::deserialize(document) {
                Ok(value) => value,
                Err(e) => {
                    output.errors.push(Error::Parse {
                        file: Some(file.to_path_buf()),
                        rule_id: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let raw_rules: Vec<serde_yaml::Value> = match value {
                serde_yaml::Value::Sequence(seq) => seq,
                serde_yaml::Value::Mapping(_) => vec![value],
                serde_yaml::Value::Null => continue,
                other => {
                    output.errors.push(Error::Parse {
                        file: Some(file.to_path_buf()),
                        rule_id: None,
                        message: format!("expected a rule or list of rules, got {:?}", other),
                    });
                    continue;
                }
            };
            for raw in raw_rules {
                match self.parse_rule(raw, set_meta, file) {
                    Ok(rule) => {
                        if !rule.excluded {
                            self.accumulate_conditions(&rule.when, &mut output.conditions_by_provider);
                        }
                        rules.push(rule);
                    }
                    Err(err) => output.errors.push(err),
                }
            }
        }
        rules
    }

    fn parse_rule(
        &mut self,
        raw: serde_yaml::Value,
        set_meta: &RuleSetMeta,
        file: &Path,
    ) -> Result<Rule> {
        let raw: RawRule = serde_yaml::from_value(raw).map_err(|e| Error::Parse {
            file: Some(file.to_path_buf()),
            rule_id: None,
            message: e.to_string(),
        })?;
        let at = |message: String| Error::Parse {
            file: Some(file.to_path_buf()),
            rule_id: Some(raw.rule_id.clone()),
            message,
        };

        if raw.rule_id.is_empty() {
            return Err(at("ruleID must not be empty".to_string()));
        }
        if !self.seen_rule_ids.insert(raw.rule_id.clone()) {
            return Err(at("duplicate ruleID".to_string()));
        }
        if raw.message.is_none() && raw.tag.is_empty() {
            return Err(at("rule must have a message or a tag action".to_string()));
        }

        let when_json = yaml_to_json(raw.when).map_err(|e| at(e.to_string()))?;
        let when = self.parse_condition(&when_json).map_err(|e| at(e.to_string()))?;
        let mut published = BTreeSet::new();
        validate_chains(&when, &mut published).map_err(|e| at(e.to_string()))?;

        // Rule-set labels propagate down into the rule's effective set
        let mut labels = set_meta.labels.clone();
        for label in &raw.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        let excluded = match &self.rule_selector {
            Some(selector) => !selector.matches_strs(&labels),
            None => false,
        };

        Ok(Rule {
            meta: RuleMeta {
                id: raw.rule_id,
                description: raw.description,
                category: raw.category.unwrap_or_default(),
                effort: raw.effort,
                labels,
                links: raw.links,
                message: raw.message,
                tags: raw.tag,
            },
            when,
            excluded,
        })
    }

    /// Keys that modify a condition rather than select one.
    const MODIFIERS: &'static [&'static str] = &["as", "from", "ignorable", "not"];

    fn parse_condition(&self, value: &Value) -> Result<Condition> {
        let Value::Object(map) = value else {
            return Err(Error::parse(format!("condition must be a mapping, got {}", value)));
        };

        let as_name = map.get("as").and_then(|v| v.as_str()).map(|s| s.to_string());
        let from = map.get("from").and_then(|v| v.as_str()).map(|s| s.to_string());
        let ignorable = map
            .get("ignorable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let negated = map.get("not").and_then(|v| v.as_bool()).unwrap_or(false);

        let operative: Vec<(&String, &Value)> = map
            .iter()
            .filter(|(key, _)| !Self::MODIFIERS.contains(&key.as_str()))
            .collect();
        if operative.len() != 1 {
            return Err(Error::parse(format!(
                "condition must have exactly one operation, found {}",
                operative.len()
            )));
        }
        let (key, info) = operative[0];

        let mut condition = match key.as_str() {
            "and" => Condition::And(self.parse_children(info, "and")?),
            "or" => Condition::Or(self.parse_children(info, "or")?),
            _ => self.parse_leaf(key, info)?,
        };

        if negated {
            condition = Condition::Not(Box::new(condition));
        }
        if as_name.is_some() || from.is_some() || ignorable {
            condition = Condition::Chain(ChainNode {
                as_name,
                from,
                ignorable,
                child: Box::new(condition),
            });
        }
        Ok(condition)
    }

    fn parse_children(&self, info: &Value, op: &str) -> Result<Vec<Condition>> {
        let Value::Array(items) = info else {
            return Err(Error::parse(format!("{:?} expects a list of conditions", op)));
        };
        if items.is_empty() {
            return Err(Error::parse(format!("{:?} must not be empty", op)));
        }
        items.iter().map(|item| self.parse_condition(item)).collect()
    }

    /// Resolve `<provider>.<capability>` against the configured providers.
    fn parse_leaf(&self, key: &str, info: &Value) -> Result<Condition> {
        let Some((provider_name, capability)) = key.split_once('.') else {
            return Err(Error::parse(format!("unknown condition key {:?}", key)));
        };
        let client = self
            .providers
            .get(provider_name)
            .ok_or_else(|| Error::parse(format!("no provider configured for {:?}", provider_name)))?;
        let advertised = self
            .capabilities
            .get(provider_name)
            .is_some_and(|caps| caps.contains(capability));
        if !advertised {
            return Err(Error::parse(format!(
                "provider {:?} does not advertise capability {:?}",
                provider_name, capability
            )));
        }

        if capability == "dependency" {
            #[derive(Deserialize)]
            struct DepInfo {
                name: String,
                #[serde(default)]
                lowerbound: Option<String>,
                #[serde(default)]
                upperbound: Option<String>,
            }
            let dep: DepInfo = serde_json::from_value(info.clone())
                .map_err(|e| Error::parse(format!("bad dependency condition: {}", e)))?;
            if dep.lowerbound.is_none() && dep.upperbound.is_none() {
                return Err(Error::parse(
                    "dependency condition needs a lowerbound or upperbound".to_string(),
                ));
            }
            return Ok(Condition::DependencyRange(DependencyCall {
                provider: provider_name.to_string(),
                dep_name: dep.name,
                range: VersionRange {
                    lower_bound: dep.lowerbound,
                    upper_bound: dep.upperbound,
                },
            }));
        }

        Ok(Condition::ProviderCall(ProviderCall {
            provider: provider_name.to_string(),
            capability: capability.to_string(),
            info: info.clone(),
            client: client.clone(),
        }))
    }

    /// Record the union of conditions each provider will see, so `prepare`
    /// receives exactly that set.
    fn accumulate_conditions(
        &self,
        condition: &Condition,
        acc: &mut BTreeMap<String, ConditionsByCapability>,
    ) {
        match condition {
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    self.accumulate_conditions(child, acc);
                }
            }
            Condition::Not(child) => self.accumulate_conditions(child, acc),
            Condition::Chain(node) => self.accumulate_conditions(&node.child, acc),
            Condition::ProviderCall(call) => {
                acc.entry(call.provider.clone())
                    .or_default()
                    .entry(call.capability.clone())
                    .or_default()
                    .push(call.info.clone());
            }
            Condition::DependencyRange(call) => {
                let info = serde_json::json!({
                    "name": call.dep_name,
                    "lowerbound": call.range.lower_bound,
                    "upperbound": call.range.upper_bound,
                });
                acc.entry(call.provider.clone())
                    .or_default()
                    .entry("dependency".to_string())
                    .or_default()
                    .push(info);
            }
        }
    }
}

/// Every `from` must reference an `as` published strictly earlier in
/// left-to-right evaluation order.
fn validate_chains(condition: &Condition, published: &mut BTreeSet<String>) -> Result<()> {
    match condition {
        Condition::And(children) | Condition::Or(children) => {
            for child in children {
                validate_chains(child, published)?;
            }
            Ok(())
        }
        Condition::Not(child) => validate_chains(child, published),
        Condition::Chain(node) => {
            if let Some(from) = &node.from
                && !published.contains(from)
            {
                return Err(Error::parse(format!("unresolved chain reference: {}", from)));
            }
            validate_chains(&node.child, published)?;
            if let Some(name) = &node.as_name {
                published.insert(name.clone());
            }
            Ok(())
        }
        Condition::ProviderCall(_) | Condition::DependencyRange(_) => Ok(()),
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("ruleset")
        .to_string()
}

fn file_stem(file: &Path) -> String {
    file.file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("ruleset")
        .to_string()
}
