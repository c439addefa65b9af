mod args;
mod output;

use anyhow::{Context, Result};
use shiftlint_runtime::{Analyzer, AnalyzerOptions, ProgressEvent, ProgressReporter, Throttled};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub use args::{AnalysisModeArg, Cli, LogLevel};

/// Logs stage transitions and evaluation progress through tracing.
struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: &ProgressEvent) {
        if event.total > 0 {
            tracing::info!(
                stage = %event.stage,
                completed = event.completed,
                total = event.total,
                "progress"
            );
        } else {
            tracing::info!(stage = %event.stage, "stage started");
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_level);

    let options = AnalyzerOptions {
        provider_settings: cli.provider_settings.clone(),
        rule_paths: cli.rules.clone(),
        label_selector: cli.label_selector.clone(),
        dep_label_selector: cli.dep_label_selector.clone(),
        incident_selector: cli.incident_selector.clone(),
        incident_limit: cli.incident_limit,
        code_snip_limit: cli.code_snip_limit,
        context_lines: cli.context_lines,
        analysis_mode: cli.analysis_mode.into(),
        disable_dep_rules: cli.disable_dep_rules,
        jwt_secret: cli.jwt_secret.clone(),
        open_source_packages_file: cli.open_source_packages_file.clone(),
        ..Default::default()
    };

    let mut analyzer = Analyzer::new(options)?;
    analyzer.subscribe(Arc::new(Throttled::new(
        LogProgress,
        Duration::from_millis(200),
    )));

    analyzer.parse_rules()?;
    analyzer.start_providers()?;

    let analyzer = Arc::new(analyzer);
    let interrupt_target = analyzer.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupted; stopping providers");
        interrupt_target.stop();
    })
    .context("failed to install interrupt handler")?;

    let reports = analyzer.run()?;
    output::write_reports(&reports, cli.output_file.as_deref())?;
    output::print_summary(&reports);

    analyzer.stop();
    Ok(())
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shiftlint={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
