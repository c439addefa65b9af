use serde_json::json;
use shiftlint_builtin::BuiltinProvider;
use shiftlint_engine::{
    DepLabelIndex, DepLabelRules, DependencyResolver, RuleEngine, RuleParser, RunConfig,
};
use shiftlint_provider::{
    EvaluateResponse, IncidentContext, InitConfig, Provider, ProviderConfig,
};
use shiftlint_testing::{BlockingProvider, FakeProvider, TestWorld, fixtures};
use shiftlint_types::{CancelToken, LabelSelector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn builtin_for(world: &TestWorld) -> Arc<dyn Provider> {
    let provider = BuiltinProvider::new();
    let config = ProviderConfig {
        name: "builtin".to_string(),
        init_config: vec![InitConfig {
            location: world.source_root().display().to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    provider.init(&CancelToken::new(), &config).unwrap();
    Arc::new(provider)
}

fn providers_with(
    entries: Vec<(&str, Arc<dyn Provider>)>,
) -> BTreeMap<String, Arc<dyn Provider>> {
    entries
        .into_iter()
        .map(|(name, provider)| (name.to_string(), provider))
        .collect()
}

fn run_engine(
    providers: BTreeMap<String, Arc<dyn Provider>>,
    rule_files: &[std::path::PathBuf],
    config: RunConfig,
    resolver: Option<&DependencyResolver>,
) -> Vec<shiftlint_types::RuleSetReport> {
    let mut parser = RuleParser::new(providers.clone(), None);
    let output = parser.parse_paths(rule_files);
    assert!(output.errors.is_empty(), "parse errors: {:?}", output.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>());
    let engine = RuleEngine::new(providers, config);
    engine
        .run(&output.rule_sets, resolver, &CancelToken::new(), &|_, _| {})
        .unwrap()
}

#[test]
fn unknown_capability_is_a_parse_error() {
    let world = TestWorld::new();
    let world = world.with_rule_file(
        "rules.yaml",
        "- ruleID: bad-cap-001\n  message: x\n  when:\n    builtin.referenced:\n      pattern: foo\n",
    );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let mut parser = RuleParser::new(providers, None);
    let output = parser.parse_paths(world.rule_files());
    assert_eq!(output.errors.len(), 1);
    assert!(output.errors[0].to_string().contains("does not advertise"));
    assert!(output.rule_sets[0].rules.is_empty());
}

#[test]
fn unresolved_chain_reference_has_stable_message() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dangling-001
  message: x
  when:
    builtin.xml:
      xpath: //dependency
      filepaths: "{{poms.filepaths}}"
    from: poms
"#,
    );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let mut parser = RuleParser::new(providers, None);
    let output = parser.parse_paths(world.rule_files());
    assert_eq!(output.errors.len(), 1);
    assert!(
        output.errors[0]
            .to_string()
            .contains("unresolved chain reference: poms")
    );
}

#[test]
fn one_bad_rule_does_not_abort_the_batch() {
    let world = TestWorld::new()
        .with_source_file("src/App.java", "class App {}")
        .with_rule_file(
            "rules.yaml",
            r#"
- ruleID: good-001
  message: found it
  when:
    builtin.file:
      pattern: App.java
- ruleID: bad-001
  message: x
  when:
    builtin.xml:
      xpath: //x
    from: nowhere
- ruleID: good-002
  message: also found
  when:
    builtin.file:
      pattern: App.java
"#,
        );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let mut parser = RuleParser::new(providers.clone(), None);
    let output = parser.parse_paths(world.rule_files());
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.rule_sets[0].rules.len(), 2);

    let engine = RuleEngine::new(providers, RunConfig::default());
    let reports = engine
        .run(&output.rule_sets, None, &CancelToken::new(), &|_, _| {})
        .unwrap();
    assert_eq!(reports[0].violations.len(), 2);
}

#[test]
fn duplicate_rule_ids_are_rejected() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dup-001
  message: a
  when:
    builtin.file:
      pattern: a.txt
- ruleID: dup-001
  message: b
  when:
    builtin.file:
      pattern: b.txt
"#,
    );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let mut parser = RuleParser::new(providers, None);
    let output = parser.parse_paths(world.rule_files());
    assert_eq!(output.errors.len(), 1);
    assert!(output.errors[0].to_string().contains("duplicate ruleID"));
}

#[test]
fn and_short_circuits_before_later_children() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: short-circuit-001
  message: x
  when:
    and:
      - fake.never:
          q: 1
      - fake.logged:
          q: 2
"#,
    );
    let fake = Arc::new(
        FakeProvider::new(&["never", "logged"]).with_response(
            "logged",
            EvaluateResponse {
                matched: true,
                ..Default::default()
            },
        ),
    );
    let providers = providers_with(vec![("fake", fake.clone() as Arc<dyn Provider>)]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);

    assert!(reports[0].violations.is_empty());
    assert_eq!(reports[0].unmatched, vec!["short-circuit-001".to_string()]);
    let calls = fake.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "never");
}

#[test]
fn or_evaluates_every_branch_and_collects_incidents() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: or-collect-001
  message: x
  when:
    or:
      - fake.first: {}
      - fake.second: {}
"#,
    );
    let incident = |uri: &str| IncidentContext {
        file_uri: uri.to_string(),
        ..Default::default()
    };
    let fake = Arc::new(
        FakeProvider::new(&["first", "second"])
            .with_response(
                "first",
                EvaluateResponse {
                    matched: true,
                    incidents: vec![incident("file:///a")],
                    ..Default::default()
                },
            )
            .with_response(
                "second",
                EvaluateResponse {
                    matched: true,
                    incidents: vec![incident("file:///b")],
                    ..Default::default()
                },
            ),
    );
    let providers = providers_with(vec![("fake", fake.clone() as Arc<dyn Provider>)]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);

    let violation = &reports[0].violations["or-collect-001"];
    assert_eq!(violation.incidents.len(), 2);
    assert_eq!(fake.recorded_calls().len(), 2);
}

#[test]
fn chain_scope_narrows_xml_to_bound_poms() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::CHAIN_SCOPE_RULE);
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);

    let violation = &reports[0].violations["chain-scope-001"];
    assert_eq!(violation.incidents.len(), 2);
    for incident in &violation.incidents {
        assert!(incident.uri.ends_with("pom.xml"));
        assert!(incident.message.contains("pom.xml"));
    }
}

#[test]
fn incident_limit_truncates_deterministically() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::CHAIN_SCOPE_RULE);
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let config = RunConfig {
        incident_limit: 1,
        ..Default::default()
    };
    let reports = run_engine(providers, world.rule_files(), config, None);
    let violation = &reports[0].violations["chain-scope-001"];
    assert_eq!(violation.incidents.len(), 1);
}

#[test]
fn ignorable_chain_is_transparent_inside_and() {
    let world = TestWorld::new()
        .with_source_file("src/App.java", "class App {}")
        .with_rule_file(
            "rules.yaml",
            r#"
- ruleID: ignorable-001
  message: x
  when:
    and:
      - builtin.file:
          pattern: DoesNotExist.java
        as: ghosts
        ignorable: true
      - builtin.file:
          pattern: App.java
"#,
        );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);

    let violation = &reports[0].violations["ignorable-001"];
    assert_eq!(violation.incidents.len(), 1);
    assert!(violation.incidents[0].uri.ends_with("App.java"));
}

#[test]
fn negated_condition_matches_on_miss_and_carries_nothing() {
    let world = TestWorld::new()
        .with_source_file("src/App.java", "class App {}")
        .with_rule_file(
            "rules.yaml",
            r#"
- ruleID: negation-001
  message: no legacy descriptor present
  when:
    builtin.file:
      pattern: web.xml
    not: true
"#,
        );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);

    let violation = &reports[0].violations["negation-001"];
    assert!(violation.incidents.is_empty());
}

#[test]
fn dependency_range_no_match_is_clean() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dep-range-001
  message: x
  when:
    java.dependency:
      name: org.foo
      lowerbound: 2.0.0
"#,
    );
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"]).with_dependency("file:///app/pom.xml", "org.foo", "1.2.3"),
    );
    let providers = providers_with(vec![("java", fake)]);
    let resolver = DependencyResolver::new(providers.clone(), DepLabelRules::default());
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), Some(&resolver));

    assert!(reports[0].violations.is_empty());
    assert!(reports[0].errors.is_empty());
    assert_eq!(reports[0].unmatched, vec!["dep-range-001".to_string()]);
}

#[test]
fn dependency_range_matches_inclusively() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dep-range-002
  message: "{{name}} {{version}} in range"
  when:
    java.dependency:
      name: org.foo
      lowerbound: 4.0.0
      upperbound: 4.0.2
"#,
    );
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"]).with_dependency("file:///app/pom.xml", "org.foo", "4.0.1"),
    );
    let providers = providers_with(vec![("java", fake)]);
    let resolver = DependencyResolver::new(providers.clone(), DepLabelRules::default());
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), Some(&resolver));

    let violation = &reports[0].violations["dep-range-002"];
    assert_eq!(violation.incidents.len(), 1);
    assert!(violation.incidents[0].is_dependency_incident);
    assert_eq!(violation.incidents[0].message, "org.foo 4.0.1 in range");
}

#[test]
fn invalid_dependency_version_is_an_error_not_a_miss() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dep-range-003
  message: x
  when:
    java.dependency:
      name: org.foo
      lowerbound: 1.0.0
"#,
    );
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"])
            .with_dependency("file:///app/pom.xml", "org.foo", "not-a-version"),
    );
    let providers = providers_with(vec![("java", fake)]);
    let resolver = DependencyResolver::new(providers.clone(), DepLabelRules::default());
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), Some(&resolver));

    assert!(reports[0].errors.contains_key("dep-range-003"));
    assert!(reports[0].violations.is_empty());
}

#[test]
fn dependency_rules_are_skipped_without_a_resolver() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: dep-skip-001
  message: x
  when:
    java.dependency:
      name: org.foo
      lowerbound: 1.0.0
"#,
    );
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"]).with_dependency("file:///app/pom.xml", "org.foo", "1.0.0"),
    );
    let providers = providers_with(vec![("java", fake)]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);

    assert_eq!(reports[0].skipped, vec!["dep-skip-001".to_string()]);
    assert!(reports[0].errors.is_empty());
}

#[test]
fn incident_selector_negation_passes_missing_keys() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: selector-001
  message: x
  when:
    fake.scan: {}
"#,
    );
    let incident = |package: Option<&str>| {
        let mut variables = BTreeMap::new();
        if let Some(package) = package {
            variables.insert("package".to_string(), json!(package));
        }
        IncidentContext {
            file_uri: "file:///a".to_string(),
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
    let providers = providers_with(vec![("fake", fake)]);
    let config = RunConfig {
        incident_selector: Some(LabelSelector::parse("!package=com.legacyvendor").unwrap()),
        ..Default::default()
    };
    let reports = run_engine(providers, world.rule_files(), config, None);

    let violation = &reports[0].violations["selector-001"];
    assert_eq!(violation.incidents.len(), 2);
}

#[test]
fn cancellation_mid_evaluate_terminates_cleanly() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: cancel-001
  message: x
  when:
    slow.block: {}
"#,
    );
    let (blocking, _release) = BlockingProvider::new("block");
    let entered = blocking.entered();
    let providers = providers_with(vec![("slow", Arc::new(blocking) as Arc<dyn Provider>)]);

    let mut parser = RuleParser::new(providers.clone(), None);
    let output = parser.parse_paths(world.rule_files());
    assert!(output.errors.is_empty());

    let token = CancelToken::new();
    let canceller = token.clone();
    std::thread::spawn(move || {
        while !entered.load(std::sync::atomic::Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        canceller.cancel();
    });

    let engine = RuleEngine::new(providers, RunConfig::default());
    let started = Instant::now();
    let reports = engine
        .run(&output.rule_sets, None, &token, &|_, _| {})
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(reports[0].violations.is_empty());
    assert!(reports[0].errors.is_empty());
}

#[test]
fn rule_selector_excludes_but_still_parses() {
    let world = TestWorld::new()
        .with_source_file("src/App.java", "class App {}")
        .with_rule_file(
            "rules.yaml",
            r#"
- ruleID: labeled-001
  message: x
  labels:
    - domain=web
  when:
    builtin.file:
      pattern: App.java
- ruleID: labeled-002
  message: x
  labels:
    - domain=batch
  when:
    builtin.file:
      pattern: App.java
"#,
        );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let selector = LabelSelector::parse("domain=web").unwrap();
    let mut parser = RuleParser::new(providers.clone(), Some(selector));
    let output = parser.parse_paths(world.rule_files());
    assert!(output.errors.is_empty());
    assert_eq!(output.rule_sets[0].rules.len(), 2);
    assert!(!output.rule_sets[0].rules[0].excluded);
    assert!(output.rule_sets[0].rules[1].excluded);

    let engine = RuleEngine::new(providers, RunConfig::default());
    let reports = engine
        .run(&output.rule_sets, None, &CancelToken::new(), &|_, _| {})
        .unwrap();
    assert!(reports[0].violations.contains_key("labeled-001"));
    assert_eq!(reports[0].skipped, vec!["labeled-002".to_string()]);
}

#[test]
fn prepare_receives_the_accumulated_condition_union() {
    let world = TestWorld::new().with_rule_file(
        "rules.yaml",
        r#"
- ruleID: prep-001
  message: x
  when:
    and:
      - fake.scan:
          q: 1
      - fake.scan:
          q: 2
"#,
    );
    let fake = Arc::new(FakeProvider::new(&["scan"]));
    let providers = providers_with(vec![("fake", fake.clone() as Arc<dyn Provider>)]);
    let mut parser = RuleParser::new(providers, None);
    let output = parser.parse_paths(world.rule_files());
    assert!(output.errors.is_empty());

    let conditions = &output.conditions_by_provider["fake"];
    assert_eq!(conditions["scan"].len(), 2);

    fake.prepare(&CancelToken::new(), conditions).unwrap();
    assert_eq!(fake.prepared_conditions().unwrap()["scan"].len(), 2);
}

#[test]
fn tag_rules_feed_has_tags_via_seeding() {
    let world = fixtures::java_app().with_rule_file("rules.yaml", fixtures::FILE_AND_TAGS_RULE);
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let config = RunConfig {
        seed_tags: vec!["javaee".to_string()],
        ..Default::default()
    };
    let reports = run_engine(providers, world.rule_files(), config, None);
    let violation = &reports[0].violations["file-and-tags-001"];
    assert_eq!(violation.incidents.len(), 1);
    assert!(violation.incidents[0].uri.ends_with("App.java"));
    assert_eq!(violation.incidents[0].line_number, None);
}

#[test]
fn report_order_is_stable_by_rule_set_name() {
    let world = TestWorld::new()
        .with_source_file("a.txt", "x")
        .with_rule_file(
            "zeta.yaml",
            "- ruleID: z-001\n  message: x\n  when:\n    builtin.file:\n      pattern: a.txt\n",
        )
        .with_rule_file(
            "alpha.yaml",
            "- ruleID: a-001\n  message: x\n  when:\n    builtin.file:\n      pattern: a.txt\n",
        );
    let providers = providers_with(vec![("builtin", builtin_for(&world))]);
    let reports = run_engine(providers, world.rule_files(), RunConfig::default(), None);
    let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn resolver_applies_language_labels_and_builds_the_index() {
    let fake: Arc<dyn Provider> = Arc::new(
        FakeProvider::new(&["dependency"]).with_dependency("file:///app/pom.xml", "org.x", "1.0.0"),
    );
    let providers = providers_with(vec![("java", fake)]);
    let resolver = DependencyResolver::new(providers, DepLabelRules::default());

    let all = resolver.all_flat(&CancelToken::new()).unwrap();
    let dep = &all["file:///app/pom.xml"][0];
    assert!(dep.labels.contains(&"shiftlint.io/language=java".to_string()));

    // No dependency declares a file prefix, so the index maps nothing
    let index = resolver.label_index(&CancelToken::new()).unwrap();
    assert!(index.labels_for("file:///unrelated").is_none());
    let _ = DepLabelIndex::default();
}

#[test]
fn dag_fanout_preserves_hierarchy_and_labels() {
    let mut dags = BTreeMap::new();
    dags.insert(
        "file:///app/pom.xml".to_string(),
        vec![shiftlint_types::DepDagItem {
            dep: shiftlint_types::Dependency {
                name: "org.root".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            children: vec![shiftlint_types::DepDagItem {
                dep: shiftlint_types::Dependency {
                    name: "org.leaf".to_string(),
                    version: "0.3.0".to_string(),
                    indirect: true,
                    ..Default::default()
                },
                children: Vec::new(),
            }],
        }],
    );
    let fake: Arc<dyn Provider> = Arc::new(FakeProvider::new(&["dependency"]).with_dag_deps(dags));
    let providers = providers_with(vec![("java", fake)]);
    let resolver = DependencyResolver::new(providers, DepLabelRules::default());

    let all = resolver.all_dag(&CancelToken::new()).unwrap();
    let roots = &all["file:///app/pom.xml"];
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].children.len(), 1);
    assert!(
        roots[0]
            .children[0]
            .dep
            .labels
            .contains(&"shiftlint.io/language=java".to_string())
    );
}
