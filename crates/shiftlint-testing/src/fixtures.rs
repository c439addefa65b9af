//! Sample source trees and rule documents shared across test suites.

use crate::world::TestWorld;

/// Minimal Maven-flavored Java tree: one class, one pom with two
/// dependencies.
pub fn java_app() -> TestWorld {
    TestWorld::new()
        .with_source_file(
            "src/App.java",
            "import javax.ejb.Stateless;\n\n@Stateless\npublic class App {\n}\n",
        )
        .with_source_file(
            "pom.xml",
            r#"<?xml version="1.0"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <dependencies>
    <dependency>
      <groupId>javax</groupId>
      <artifactId>javaee-api</artifactId>
    </dependency>
    <dependency>
      <groupId>org.foo</groupId>
      <artifactId>bar</artifactId>
    </dependency>
  </dependencies>
</project>
"#,
        )
}

/// A rule that matches `App.java` when the run carries the `javaee` tag.
pub const FILE_AND_TAGS_RULE: &str = r#"
- ruleID: file-and-tags-001
  description: EJB entry point present
  message: application entry point found
  when:
    and:
      - builtin.file:
          pattern: App.java
      - builtin.hasTags:
          - javaee
"#;

/// A chained rule: bind matched poms, then query them with XPath.
pub const CHAIN_SCOPE_RULE: &str = r#"
- ruleID: chain-scope-001
  description: dependencies declared in discovered poms
  message: dependency declared in {{poms.filepaths}}
  when:
    and:
      - builtin.file:
          pattern: pom.xml
        as: poms
      - builtin.xml:
          xpath: //dependency
          filepaths: "{{poms.filepaths}}"
        from: poms
"#;
