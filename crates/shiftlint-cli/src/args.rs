use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum AnalysisModeArg {
    Full,
    SourceOnly,
}

impl From<AnalysisModeArg> for shiftlint_types::AnalysisMode {
    fn from(mode: AnalysisModeArg) -> Self {
        match mode {
            AnalysisModeArg::Full => shiftlint_types::AnalysisMode::Full,
            AnalysisModeArg::SourceOnly => shiftlint_types::AnalysisMode::SourceOnly,
        }
    }
}

/// Evaluate migration rules against configured source trees.
#[derive(Debug, Parser)]
#[command(name = "shiftlint", version, about)]
pub struct Cli {
    /// Provider settings file (YAML or JSON)
    #[arg(long, value_name = "PATH")]
    pub provider_settings: PathBuf,

    /// Rule file or directory; repeatable
    #[arg(long = "rules", value_name = "PATH", required = true)]
    pub rules: Vec<PathBuf>,

    /// Selector expression filtering rules by label
    #[arg(long, value_name = "EXPR")]
    pub label_selector: Option<String>,

    /// Selector expression filtering dependencies by label
    #[arg(long, value_name = "EXPR")]
    pub dep_label_selector: Option<String>,

    /// Selector expression filtering incidents by their variables
    #[arg(long, value_name = "EXPR")]
    pub incident_selector: Option<String>,

    /// Max incidents reported per rule; 0 means unlimited
    #[arg(long, default_value_t = 0)]
    pub incident_limit: usize,

    /// Max characters per code snippet; 0 means unlimited
    #[arg(long, default_value_t = 0)]
    pub code_snip_limit: usize,

    /// Lines of surrounding source attached to each incident
    #[arg(long, default_value_t = 10)]
    pub context_lines: usize,

    /// Whether dependency information participates in the run
    #[arg(long, value_enum, default_value_t = AnalysisModeArg::Full)]
    pub analysis_mode: AnalysisModeArg,

    /// Skip dependency conditions outright
    #[arg(long, default_value_t = false)]
    pub disable_dep_rules: bool,

    /// Regex-per-line file labeling open-source packages
    #[arg(long, value_name = "PATH")]
    pub open_source_packages_file: Option<PathBuf>,

    /// Shared secret for provider bearer tokens (falls back to JWT_SECRET)
    #[arg(long, value_name = "SECRET")]
    pub jwt_secret: Option<String>,

    /// Write the YAML report here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,
}
