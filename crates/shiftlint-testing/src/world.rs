//! TestWorld pattern for declarative integration test setup.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated on-disk world: a source tree, rule files, and a provider
/// settings file, all under one temp directory.
///
/// # Example
/// ```no_run
/// use shiftlint_testing::TestWorld;
///
/// let world = TestWorld::new()
///     .with_source_file("src/App.java", "class App {}")
///     .with_rule_file("rules.yaml", "- ruleID: r1\n  ...");
/// ```
pub struct TestWorld {
    temp_dir: TempDir,
    rule_files: Vec<PathBuf>,
}

impl TestWorld {
    pub fn new() -> Self {
        TestWorld {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
            rule_files: Vec::new(),
        }
    }

    /// Root of the analyzed source tree (`<world>/src-root`).
    pub fn source_root(&self) -> PathBuf {
        self.temp_dir.path().join("src-root")
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn rule_files(&self) -> &[PathBuf] {
        &self.rule_files
    }

    /// Place a file under the source root, creating parent directories.
    pub fn with_source_file(self, relative: &str, content: &str) -> Self {
        let path = self.source_root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create source dirs");
        }
        fs::write(&path, content).expect("failed to write source file");
        self
    }

    /// Place a rule file outside the source root and remember it.
    pub fn with_rule_file(mut self, name: &str, content: &str) -> Self {
        let dir = self.temp_dir.path().join("rules");
        fs::create_dir_all(&dir).expect("failed to create rules dir");
        let path = dir.join(name);
        fs::write(&path, content).expect("failed to write rule file");
        self.rule_files.push(path);
        self
    }

    /// Write a provider settings file and return its path.
    pub fn write_settings(&self, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join("provider-settings.yaml");
        fs::write(&path, content).expect("failed to write settings");
        path
    }

    /// Settings for the built-in provider alone, scoped to the source root.
    pub fn builtin_settings(&self) -> PathBuf {
        self.write_settings(&format!(
            "- name: builtin\n  initConfig:\n    - location: {}\n",
            self.source_root().display()
        ))
    }

    /// Absolute path of a file under the source root.
    pub fn source_path(&self, relative: &str) -> PathBuf {
        self.source_root().join(relative)
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
