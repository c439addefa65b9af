//! Filesystem-native provider: evaluates conditions with no external
//! toolchain, directly against the configured analysis roots.

mod conditions;
pub mod search;
pub mod xpath;

use serde_json::Value;
use shiftlint_provider::{
    CodeSnippetResolver, ConditionsByCapability, Error, EvaluateResponse, InitConfig, InitOutcome,
    Provider, ProviderConfig, ProviderContext, Result,
};
use shiftlint_types::{
    CancelToken, Capability, ChainTemplate, CodeLocation, FileChange, uri_to_path,
};
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

pub use search::{DEFAULT_EXCLUDED_DIRS, FileSearcher};

/// Name the engine resolves `builtin.*` capabilities against.
pub const PROVIDER_NAME: &str = "builtin";

/// Capability names served by this provider.
pub const CAPABILITIES: &[&str] = &["file", "filecontent", "xml", "xmlPublicID", "json", "hasTags"];

#[derive(Debug, Default)]
struct State {
    locations: Vec<PathBuf>,
    excluded_dirs: Vec<String>,
    stopped: bool,
}

/// The default provider, always available in-process. It can also be served
/// behind the RPC transport as a co-process so language providers can hand
/// it workspaces they discover.
pub struct BuiltinProvider {
    state: RwLock<State>,
    session_counter: AtomicI64,
}

impl BuiltinProvider {
    pub fn new() -> Self {
        BuiltinProvider {
            state: RwLock::new(State {
                locations: Vec::new(),
                excluded_dirs: DEFAULT_EXCLUDED_DIRS.clone(),
                stopped: false,
            }),
            session_counter: AtomicI64::new(0),
        }
    }

    fn searcher(&self, scope: &ChainTemplate) -> Result<FileSearcher> {
        let state = self.state.read().expect("builtin state poisoned");
        if state.stopped {
            return Err(Error::Evaluate("builtin provider is stopped".to_string()));
        }
        Ok(FileSearcher::new(state.locations.clone(), state.excluded_dirs.clone())
            .with_rule_scope(&scope.filepaths, &scope.excluded_paths))
    }

    fn absorb_config(&self, configs: &[InitConfig]) {
        let mut state = self.state.write().expect("builtin state poisoned");
        for config in configs {
            let location = PathBuf::from(&config.location);
            if !location.as_os_str().is_empty() && !state.locations.contains(&location) {
                state.locations.push(location);
            }
            if let Some(Value::Array(dirs)) = config
                .provider_specific_config
                .get("excludedDirs")
            {
                state.excluded_dirs = dirs
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
            }
        }
    }
}

impl Default for BuiltinProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for BuiltinProvider {
    fn capabilities(&self) -> Vec<Capability> {
        CAPABILITIES.iter().map(|name| Capability::named(*name)).collect()
    }

    fn init(&self, _ctx: &CancelToken, config: &ProviderConfig) -> Result<InitOutcome> {
        self.absorb_config(&config.init_config);
        let session_id = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(session_id, locations = config.init_config.len(), "builtin init");
        Ok(InitOutcome {
            session_id,
            discovered: Vec::new(),
        })
    }

    fn provider_init(&self, _ctx: &CancelToken, additional: Vec<InitConfig>) -> Result<()> {
        tracing::debug!(count = additional.len(), "builtin absorbing discovered locations");
        self.absorb_config(&additional);
        Ok(())
    }

    fn prepare(&self, _ctx: &CancelToken, _conditions: &ConditionsByCapability) -> Result<()> {
        // Nothing to warm: searches walk the tree per call.
        Ok(())
    }

    fn evaluate(
        &self,
        ctx: &CancelToken,
        capability: &str,
        condition_info: &Value,
    ) -> Result<EvaluateResponse> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let provider_ctx = ProviderContext::extract(condition_info);
        let searcher = self.searcher(&provider_ctx.scope)?;
        match capability {
            "file" => conditions::eval_file(ctx, &searcher, condition_info),
            "filecontent" => conditions::eval_filecontent(ctx, &searcher, condition_info),
            "xml" => conditions::eval_xml(ctx, &searcher, condition_info),
            "xmlPublicID" => conditions::eval_xml_public_id(ctx, &searcher, condition_info),
            "json" => conditions::eval_json(ctx, &searcher, condition_info),
            "hasTags" => conditions::eval_has_tags(condition_info, &provider_ctx.tags),
            other => Err(Error::UnknownCapability(other.to_string())),
        }
    }

    fn get_dependencies(&self, _ctx: &CancelToken) -> Result<shiftlint_provider::DepsByFile> {
        Err(Error::Unsupported)
    }

    fn get_dependencies_dag(&self, _ctx: &CancelToken) -> Result<shiftlint_provider::DepDagsByFile> {
        Err(Error::Unsupported)
    }

    fn notify_file_changes(&self, _ctx: &CancelToken, changes: &[FileChange]) -> Result<()> {
        tracing::debug!(count = changes.len(), "builtin file change hint ignored");
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.write().expect("builtin state poisoned");
        state.stopped = true;
    }

    fn code_snippet_resolver(&self) -> Option<&dyn CodeSnippetResolver> {
        Some(self)
    }
}

impl CodeSnippetResolver for BuiltinProvider {
    fn code_snip(
        &self,
        _ctx: &CancelToken,
        file_uri: &str,
        location: &CodeLocation,
        context_lines: usize,
    ) -> Result<Option<String>> {
        let path = uri_to_path(file_uri);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        let lines: Vec<&str> = content.lines().collect();
        let target = location.start_position.line as usize;
        if target >= lines.len() {
            return Ok(None);
        }
        let first = target.saturating_sub(context_lines);
        let last = (target + context_lines).min(lines.len().saturating_sub(1));
        let mut snip = String::new();
        for (offset, line) in lines[first..=last].iter().enumerate() {
            let number = first + offset + 1;
            snip.push_str(&format!("{:>4}  {}\n", number, line));
        }
        Ok(Some(snip.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider_for(dir: &tempfile::TempDir) -> BuiltinProvider {
        let provider = BuiltinProvider::new();
        let config = ProviderConfig {
            name: PROVIDER_NAME.to_string(),
            init_config: vec![InitConfig {
                location: dir.path().display().to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        provider.init(&CancelToken::new(), &config).unwrap();
        provider
    }

    #[test]
    fn init_issues_distinct_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let provider = BuiltinProvider::new();
        let config = ProviderConfig {
            name: PROVIDER_NAME.to_string(),
            init_config: vec![InitConfig {
                location: dir.path().display().to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let ctx = CancelToken::new();
        let a = provider.init(&ctx, &config).unwrap();
        let b = provider.init(&ctx, &config).unwrap();
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn evaluate_dispatches_known_capabilities_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("App.java"), "class App {}").unwrap();
        let provider = provider_for(&dir);
        let ctx = CancelToken::new();

        let response = provider
            .evaluate(&ctx, "file", &json!({"pattern": "App.java"}))
            .unwrap();
        assert!(response.matched);

        let err = provider.evaluate(&ctx, "referenced", &json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownCapability(_)));
    }

    #[test]
    fn stop_is_idempotent_and_fails_later_evaluates() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider_for(&dir);
        provider.stop();
        provider.stop();
        let err = provider
            .evaluate(&CancelToken::new(), "file", &json!({"pattern": "*"}))
            .unwrap_err();
        assert!(err.to_string().contains("stopped"));
    }

    #[test]
    fn provider_init_extends_the_scanned_locations() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("web.xml"), "<web-app/>").unwrap();
        let provider = provider_for(&first);
        provider
            .provider_init(
                &CancelToken::new(),
                vec![InitConfig {
                    location: second.path().display().to_string(),
                    ..Default::default()
                }],
            )
            .unwrap();
        let response = provider
            .evaluate(&CancelToken::new(), "file", &json!({"pattern": "web.xml"}))
            .unwrap();
        assert!(response.matched);
    }

    #[test]
    fn code_snip_carries_context_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Main.java");
        std::fs::write(&file, "a\nb\nc\nd\ne\n").unwrap();
        let provider = provider_for(&dir);
        let location = CodeLocation {
            start_position: shiftlint_types::Position { line: 2, character: 0 },
            end_position: shiftlint_types::Position { line: 2, character: 1 },
        };
        let snip = provider
            .code_snip(&CancelToken::new(), &shiftlint_types::file_uri(&file), &location, 1)
            .unwrap()
            .unwrap();
        assert!(snip.contains("   2  b"));
        assert!(snip.contains("   3  c"));
        assert!(snip.contains("   4  d"));
        assert!(!snip.contains("   5  e"));
    }
}
