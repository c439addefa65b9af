use shiftlint_provider::{EvaluateResponse, IncidentContext, Provider};
use shiftlint_runtime::{Analyzer, AnalyzerOptions, ProgressEvent, ProgressReporter, Stage};
use shiftlint_testing::{BlockingProvider, FakeProvider, TestWorld, fixtures};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn options_for(world: &TestWorld, settings: PathBuf) -> AnalyzerOptions {
    AnalyzerOptions {
        provider_settings: settings,
        rule_paths: world.rule_files().to_vec(),
        ..Default::default()
    }
}

/// S1: a file match conjoined with `hasTags` against the run's initial
/// tag set yields exactly one incident, line unset.
#[test]
fn builtin_file_and_has_tags() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::FILE_AND_TAGS_RULE);
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(AnalyzerOptions {
        initial_tags: vec!["javaee".to_string()],
        ..options_for(&world, settings)
    })
    .unwrap();
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    let reports = analyzer.run().unwrap();

    let violation = &reports[0].violations["file-and-tags-001"];
    assert_eq!(violation.incidents.len(), 1);
    assert!(violation.incidents[0].uri.ends_with("src/App.java"));
    assert_eq!(violation.incidents[0].line_number, None);
}

/// S2: a chain binds matched poms, the xml condition queries only them;
/// one pom with two dependency nodes yields two incidents on that pom.
#[test]
fn chain_scope_narrowing() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::CHAIN_SCOPE_RULE);
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(options_for(&world, settings)).unwrap();
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    let reports = analyzer.run().unwrap();

    let violation = &reports[0].violations["chain-scope-001"];
    assert_eq!(violation.incidents.len(), 2);
    for incident in &violation.incidents {
        assert!(incident.uri.ends_with("pom.xml"));
    }
}

/// S3: a dependency outside the requested range is a clean no-match:
/// no incidents, no error.
#[test]
fn dependency_range_no_match() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dep-001
  message: outdated org.foo
  when:
    java.dependency:
      name: org.foo
      lowerbound: 2.0.0
"#,
    );
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(options_for(&world, settings)).unwrap();
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"]).with_dependency("file:///app/pom.xml", "org.foo", "1.2.3"),
    );
    analyzer.register_provider("java", fake);
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    let reports = analyzer.run().unwrap();

    assert!(reports[0].violations.is_empty());
    assert!(reports[0].errors.is_empty());
    assert_eq!(reports[0].unmatched, vec!["dep-001".to_string()]);
}

/// S4: cancelling the run while a provider call blocks terminates within
/// bounded time, with no incident and no spurious error for that rule.
#[test]
fn cancellation_mid_evaluate() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        "- ruleID: cancel-001\n  message: x\n  when:\n    slow.block: {}\n",
    );
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(options_for(&world, settings)).unwrap();
    let (blocking, _release) = BlockingProvider::new("block");
    let entered = blocking.entered();
    analyzer.register_provider("slow", Arc::new(blocking));
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();

    let analyzer = Arc::new(analyzer);
    let stopper = analyzer.clone();
    std::thread::spawn(move || {
        while !entered.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        stopper.stop();
    });

    let started = Instant::now();
    let reports = analyzer.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(reports[0].violations.is_empty());
    assert!(reports[0].errors.is_empty());
}

/// S5: one rule with an unresolved chain among two valid ones aggregates
/// into a parse error; retrying without the offending file succeeds.
#[test]
fn bad_rule_among_good_ones() {
    let good = r#"
- ruleID: good-001
  message: found
  when:
    builtin.file:
      pattern: App.java
- ruleID: good-002
  message: found too
  when:
    builtin.file:
      pattern: App.java
"#;
    let bad = r#"
- ruleID: broken-001
  message: x
  when:
    builtin.xml:
      xpath: //x
    from: nowhere
"#;
    let world = fixtures::java_app()
        .with_rule_file("good.yaml", good)
        .with_rule_file("broken.yaml", bad);
    let settings = world.builtin_settings();

    let mut analyzer = Analyzer::new(options_for(&world, settings.clone())).unwrap();
    let err = analyzer.parse_rules().unwrap_err().to_string();
    assert!(err.contains("unresolved chain reference: nowhere"));

    // Retry with only the valid file
    let good_only: Vec<PathBuf> = world
        .rule_files()
        .iter()
        .filter(|p| p.ends_with("good.yaml"))
        .cloned()
        .collect();
    let mut retry = Analyzer::new(AnalyzerOptions {
        rule_paths: good_only,
        ..options_for(&world, settings.clone())
    })
    .unwrap();
    retry.parse_rules().unwrap();
    retry.start_providers().unwrap();
    let reports = retry.run().unwrap();
    assert_eq!(reports[0].violations.len(), 2);

    // A single bad file parses to exactly the one error
    let bad_only: Vec<PathBuf> = world
        .rule_files()
        .iter()
        .filter(|p| p.ends_with("broken.yaml"))
        .cloned()
        .collect();
    let mut single = Analyzer::new(AnalyzerOptions {
        rule_paths: bad_only,
        ..options_for(&world, settings)
    })
    .unwrap();
    let err = single.parse_rules().unwrap_err().to_string();
    assert!(err.contains("unresolved chain reference: nowhere"));
    assert!(!err.contains(";"));
}

/// S6: an incident selector negating one variable value keeps the other
/// two incidents, including the one missing the key entirely.
#[test]
fn incident_selector_exclusion() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        "- ruleID: sel-001\n  message: x\n  when:\n    fake.scan: {}\n",
    );
    let settings = world.builtin_settings();
    let incident = |package: Option<&str>| {
        let mut variables = BTreeMap::new();
        if let Some(package) = package {
            variables.insert("package".to_string(), serde_json::json!(package));
        }
        IncidentContext {
            file_uri: "file:///src/App.java".to_string(),
            variables,
            ..Default::default()
        }
    };
    let fake: Arc<dyn Provider> = Arc::new(FakeProvider::new(&["scan"]).with_response(
        "scan",
        EvaluateResponse {
            matched: true,
            incidents: vec![
                incident(Some("com.legacyvendor")),
                incident(Some("com.other")),
                incident(None),
            ],
            ..Default::default()
        },
    ));
    let mut analyzer = Analyzer::new(AnalyzerOptions {
        incident_selector: Some("!package=com.legacyvendor".to_string()),
        ..options_for(&world, settings)
    })
    .unwrap();
    analyzer.register_provider("fake", fake);
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    let reports = analyzer.run().unwrap();

    let violation = &reports[0].violations["sel-001"];
    assert_eq!(violation.incidents.len(), 2);
}

#[test]
fn stop_is_idempotent() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::CHAIN_SCOPE_RULE);
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(options_for(&world, settings)).unwrap();
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    analyzer.stop();
    analyzer.stop();
}

#[test]
fn run_requires_started_providers() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::CHAIN_SCOPE_RULE);
    let settings = world.builtin_settings();
    let analyzer = Analyzer::new(options_for(&world, settings)).unwrap();
    assert!(analyzer.run().is_err());
}

#[test]
fn progress_stages_flow_to_subscribers() {
    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<Stage>>,
    }
    impl ProgressReporter for Recorder {
        fn report(&self, event: &ProgressEvent) {
            let mut stages = self.stages.lock().unwrap();
            if stages.last() != Some(&event.stage) {
                stages.push(event.stage);
            }
        }
    }

    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::CHAIN_SCOPE_RULE);
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(options_for(&world, settings)).unwrap();
    let recorder = Arc::new(Recorder::default());
    analyzer.subscribe(recorder.clone());
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    analyzer.run().unwrap();

    let stages = recorder.stages.lock().unwrap();
    assert_eq!(stages.first(), Some(&Stage::RuleParsing));
    assert!(stages.contains(&Stage::ProviderStart));
    assert!(stages.contains(&Stage::ProviderPrepare));
    assert_eq!(stages.last(), Some(&Stage::RuleEvaluation));
}

/// Source-only mode suppresses dependency fetches; dependency rules are
/// skipped with a recorded diagnostic rather than evaluated or errored.
#[test]
fn source_only_mode_skips_dependency_rules() {
    let world = TestWorld::new()
        .with_source_file("src/App.java", "class App {}")
        .with_rule_file(
            "rules.yaml",
            r#"
- ruleID: dep-skip-001
  message: x
  when:
    java.dependency:
      name: org.foo
      lowerbound: 1.0.0
- ruleID: plain-001
  message: found
  when:
    builtin.file:
      pattern: App.java
"#,
        );
    let settings = world.builtin_settings();
    let mut analyzer = Analyzer::new(AnalyzerOptions {
        analysis_mode: shiftlint_types::AnalysisMode::SourceOnly,
        ..options_for(&world, settings)
    })
    .unwrap();
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"]).with_dependency("file:///app/pom.xml", "org.foo", "1.5.0"),
    );
    analyzer.register_provider("java", fake);
    analyzer.parse_rules().unwrap();
    analyzer.start_providers().unwrap();
    let reports = analyzer.run().unwrap();

    assert_eq!(reports[0].skipped, vec!["dep-skip-001".to_string()]);
    assert!(reports[0].violations.contains_key("plain-001"));
    assert!(reports[0].errors.is_empty());
}
