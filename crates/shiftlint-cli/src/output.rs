use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use shiftlint_types::RuleSetReport;
use std::io::Write;
use std::path::Path;

/// Serialize the rule-set reports as YAML, to a file or stdout.
pub fn write_reports(reports: &[RuleSetReport], output_file: Option<&Path>) -> Result<()> {
    let rendered = serde_yaml::to_string(reports).context("failed to serialize reports")?;
    match output_file {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
        }
    }
    Ok(())
}

/// One-line run summary on stderr, colored when attached to a terminal.
pub fn print_summary(reports: &[RuleSetReport]) {
    let violations: usize = reports.iter().map(|r| r.violations.len()).sum();
    let incidents: usize = reports
        .iter()
        .flat_map(|r| r.violations.values())
        .map(|v| v.incidents.len())
        .sum();
    let errors: usize = reports.iter().map(|r| r.errors.len()).sum();

    let line = format!(
        "{} rule sets, {} violations, {} incidents, {} rule errors",
        reports.len(),
        violations,
        incidents,
        errors
    );
    if std::io::stderr().is_terminal() {
        if violations > 0 {
            eprintln!("{}", line.yellow());
        } else {
            eprintln!("{}", line.green());
        }
    } else {
        eprintln!("{}", line);
    }
}
