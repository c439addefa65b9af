use anyhow::{Result, anyhow};
use shiftlint_types::{AnalysisMode, LabelSelector};
use std::path::PathBuf;
use std::time::Duration;

/// Default guard around provider startup.
pub const PROVIDER_START_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Everything a caller can configure on the analyzer. Validated as a whole
/// so the user sees every problem at once.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub provider_settings: PathBuf,
    /// Rule files or directories, at least one.
    pub rule_paths: Vec<PathBuf>,
    pub label_selector: Option<String>,
    pub dep_label_selector: Option<String>,
    pub incident_selector: Option<String>,
    /// 0 = unlimited.
    pub incident_limit: usize,
    /// 0 = unlimited.
    pub code_snip_limit: usize,
    pub context_lines: usize,
    pub analysis_mode: AnalysisMode,
    pub disable_dep_rules: bool,
    /// Flag value; `JWT_SECRET` is consulted when unset.
    pub jwt_secret: Option<String>,
    pub workers: usize,
    /// Tags present before any rule fires.
    pub initial_tags: Vec<String>,
    /// Regex-per-line file labeling open-source packages.
    pub open_source_packages_file: Option<PathBuf>,
    /// Regex-per-line file labeling excluded packages.
    pub excluded_packages_file: Option<PathBuf>,
    pub provider_start_timeout: Duration,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            provider_settings: PathBuf::new(),
            rule_paths: Vec::new(),
            label_selector: None,
            dep_label_selector: None,
            incident_selector: None,
            incident_limit: 0,
            code_snip_limit: 0,
            context_lines: 10,
            analysis_mode: AnalysisMode::Full,
            disable_dep_rules: false,
            jwt_secret: None,
            workers: shiftlint_engine::DEFAULT_WORKERS,
            initial_tags: Vec::new(),
            open_source_packages_file: None,
            excluded_packages_file: None,
            provider_start_timeout: PROVIDER_START_TIMEOUT,
        }
    }
}

/// Options after validation, selectors parsed.
#[derive(Debug, Clone)]
pub struct ValidatedOptions {
    pub raw: AnalyzerOptions,
    pub label_selector: Option<LabelSelector>,
    pub dep_label_selector: Option<LabelSelector>,
    pub incident_selector: Option<LabelSelector>,
}

impl AnalyzerOptions {
    /// Check every field, aggregating the full list of problems into one
    /// error message.
    pub fn validate(self) -> Result<ValidatedOptions> {
        let mut problems = Vec::new();

        if self.provider_settings.as_os_str().is_empty() {
            problems.push("provider-settings path is required".to_string());
        } else if !self.provider_settings.is_file() {
            problems.push(format!(
                "provider-settings file not found: {}",
                self.provider_settings.display()
            ));
        }
        if self.rule_paths.is_empty() {
            problems.push("at least one rules path is required".to_string());
        }
        for path in &self.rule_paths {
            if !path.exists() {
                problems.push(format!("rules path not found: {}", path.display()));
            }
        }
        for file in [&self.open_source_packages_file, &self.excluded_packages_file]
            .into_iter()
            .flatten()
        {
            if !file.is_file() {
                problems.push(format!("packages file not found: {}", file.display()));
            }
        }
        if self.workers == 0 {
            problems.push("workers must be at least 1".to_string());
        }

        let parse_selector = |name: &str, raw: &Option<String>, problems: &mut Vec<String>| {
            raw.as_deref().and_then(|expr| match LabelSelector::parse(expr) {
                Ok(selector) => Some(selector),
                Err(err) => {
                    problems.push(format!("invalid {}: {}", name, err));
                    None
                }
            })
        };
        let label_selector = parse_selector("label-selector", &self.label_selector, &mut problems);
        let dep_label_selector =
            parse_selector("dep-label-selector", &self.dep_label_selector, &mut problems);
        let incident_selector =
            parse_selector("incident-selector", &self.incident_selector, &mut problems);

        if !problems.is_empty() {
            return Err(anyhow!(problems.join("; ")));
        }
        Ok(ValidatedOptions {
            raw: self,
            label_selector,
            dep_label_selector,
            incident_selector,
        })
    }
}
