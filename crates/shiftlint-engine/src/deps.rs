use crate::{Error, Result};
use regex::Regex;
use shiftlint_provider::{DepDagsByFile, DependencyCache, DepsByFile, Provider};
use shiftlint_types::{CancelToken, Dependency, Label};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Label applied to dependencies matched by the open-source packages file.
pub const OPEN_SOURCE_LABEL: &str = "shiftlint.io/dep-source=open-source";
/// Label applied to dependencies matched by the exclude list.
pub const EXCLUDED_LABEL: &str = "shiftlint.io/excluded";
/// Key of the language label always appended to every dependency.
pub const LANGUAGE_LABEL_KEY: &str = "shiftlint.io/language";

/// Name-matching rules loaded from user-provided package list files, one
/// regex per line, `#` comments allowed.
#[derive(Debug, Default)]
pub struct DepLabelRules {
    open_source: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl DepLabelRules {
    pub fn new(open_source: Vec<Regex>, exclude: Vec<Regex>) -> Self {
        DepLabelRules {
            open_source,
            exclude,
        }
    }

    pub fn from_files(
        open_source_file: Option<&Path>,
        exclude_file: Option<&Path>,
    ) -> Result<Self> {
        Ok(DepLabelRules {
            open_source: load_patterns(open_source_file)?,
            exclude: load_patterns(exclude_file)?,
        })
    }
}

fn load_patterns(path: Option<&Path>) -> Result<Vec<Regex>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Fatal(format!("{}: {}", path.display(), e)))?;
    let mut patterns = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        patterns.push(
            Regex::new(line)
                .map_err(|e| Error::Fatal(format!("{}: bad pattern {:?}: {}", path.display(), line, e)))?,
        );
    }
    Ok(patterns)
}

/// Fans dependency fetches across providers, caches per provider, and
/// applies labeling and deduplication on the way out.
pub struct DependencyResolver {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    caches: BTreeMap<String, Arc<DependencyCache>>,
    rules: DepLabelRules,
}

impl DependencyResolver {
    pub fn new(providers: BTreeMap<String, Arc<dyn Provider>>, rules: DepLabelRules) -> Self {
        let caches = providers
            .keys()
            .map(|name| (name.clone(), Arc::new(DependencyCache::new())))
            .collect();
        DependencyResolver {
            providers,
            caches,
            rules,
        }
    }

    /// Flat dependencies of one provider: fetched once per session, then
    /// deduplicated and labeled.
    pub fn flat(&self, ctx: &CancelToken, provider: &str) -> Result<Arc<DepsByFile>> {
        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| Error::Fatal(format!("unknown provider: {}", provider)))?;
        let cache = &self.caches[provider];
        let deps = cache.flat(|| {
            let mut fetched = client.get_dependencies(ctx)?;
            for (_, deps) in fetched.iter_mut() {
                dedup_in_place(deps);
                for dep in deps.iter_mut() {
                    self.apply_labels(provider, dep);
                }
            }
            Ok(fetched)
        })?;
        Ok(deps)
    }

    /// DAG dependencies of one provider, hierarchy preserved.
    pub fn dag(&self, ctx: &CancelToken, provider: &str) -> Result<Arc<DepDagsByFile>> {
        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| Error::Fatal(format!("unknown provider: {}", provider)))?;
        let cache = &self.caches[provider];
        let dags = cache.dag(|| {
            let mut fetched = client.get_dependencies_dag(ctx)?;
            for (_, items) in fetched.iter_mut() {
                for item in items.iter_mut() {
                    self.label_dag(provider, item);
                }
            }
            Ok(fetched)
        })?;
        Ok(dags)
    }

    /// Union of every provider's flat dependencies, keyed by file URI.
    /// Providers that do not support dependency retrieval are skipped.
    pub fn all_flat(&self, ctx: &CancelToken) -> Result<DepsByFile> {
        let mut union: DepsByFile = BTreeMap::new();
        for name in self.providers.keys() {
            let per_provider = match self.flat(ctx, name) {
                Ok(deps) => deps,
                Err(Error::Provider(err)) if matches!(err, shiftlint_provider::Error::Unsupported) => {
                    continue;
                }
                Err(err) => return Err(err),
            };
            for (uri, deps) in per_provider.iter() {
                let slot = union.entry(uri.clone()).or_default();
                slot.extend(deps.iter().cloned());
                dedup_in_place(slot);
            }
        }
        Ok(union)
    }

    /// Union of every provider's dependency DAGs.
    pub fn all_dag(&self, ctx: &CancelToken) -> Result<DepDagsByFile> {
        let mut union: DepDagsByFile = BTreeMap::new();
        for name in self.providers.keys() {
            let per_provider = match self.dag(ctx, name) {
                Ok(dags) => dags,
                Err(Error::Provider(err)) if matches!(err, shiftlint_provider::Error::Unsupported) => {
                    continue;
                }
                Err(err) => return Err(err),
            };
            for (uri, items) in per_provider.iter() {
                union
                    .entry(uri.clone())
                    .or_default()
                    .extend(items.iter().cloned());
            }
        }
        Ok(union)
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    /// Drop every provider's cached dependency results, forcing the next
    /// read to refetch. Used when file-change hints arrive.
    pub fn invalidate(&self) {
        for cache in self.caches.values() {
            cache.invalidate();
        }
    }

    /// Prefix index used to let incidents adopt the labels of the
    /// dependency that owns their file.
    pub fn label_index(&self, ctx: &CancelToken) -> Result<DepLabelIndex> {
        let mut entries = Vec::new();
        for deps in self.all_flat(ctx)?.values() {
            for dep in deps {
                if let Some(prefix) = &dep.file_uri_prefix {
                    entries.push((prefix.clone(), Label::parse_set(&dep.labels)));
                }
            }
        }
        Ok(DepLabelIndex { entries })
    }

    fn apply_labels(&self, provider: &str, dep: &mut Dependency) {
        let language = format!("{}={}", LANGUAGE_LABEL_KEY, provider);
        if !dep.labels.contains(&language) {
            dep.labels.push(language);
        }
        if self.rules.open_source.iter().any(|re| re.is_match(&dep.name)) {
            let label = OPEN_SOURCE_LABEL.to_string();
            if !dep.labels.contains(&label) {
                dep.labels.push(label);
            }
        }
        if self.rules.exclude.iter().any(|re| re.is_match(&dep.name)) {
            let label = EXCLUDED_LABEL.to_string();
            if !dep.labels.contains(&label) {
                dep.labels.push(label);
            }
        }
    }

    fn label_dag(&self, provider: &str, item: &mut shiftlint_types::DepDagItem) {
        self.apply_labels(provider, &mut item.dep);
        for child in &mut item.children {
            self.label_dag(provider, child);
        }
    }
}

/// Remove duplicates within one file's dependency list. Identical
/// `(name, version, resolvedIdentifier)` entries collapse to one, with a
/// direct entry winning over an indirect one. Different versions never
/// merge.
pub fn dedup_in_place(deps: &mut Vec<Dependency>) {
    let mut seen: BTreeMap<(String, String, Option<String>), usize> = BTreeMap::new();
    let mut out: Vec<Dependency> = Vec::with_capacity(deps.len());
    for dep in deps.drain(..) {
        match seen.get(&dep.dedup_key()) {
            Some(&idx) => {
                if out[idx].indirect && !dep.indirect {
                    out[idx] = dep;
                }
            }
            None => {
                seen.insert(dep.dedup_key(), out.len());
                out.push(dep);
            }
        }
    }
    *deps = out;
}

/// Maps file URIs to the labels of the dependency whose prefix covers them.
#[derive(Debug, Default)]
pub struct DepLabelIndex {
    entries: Vec<(String, Vec<Label>)>,
}

impl DepLabelIndex {
    pub fn labels_for(&self, uri: &str) -> Option<Vec<Label>> {
        let mut merged: Vec<Label> = Vec::new();
        let mut found = false;
        for (prefix, labels) in &self.entries {
            if uri.starts_with(prefix.as_str()) {
                found = true;
                for label in labels {
                    if !merged.contains(label) {
                        merged.push(label.clone());
                    }
                }
            }
        }
        found.then_some(merged)
    }
}
