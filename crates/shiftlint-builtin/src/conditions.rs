use crate::search::{FileSearcher, compile_pattern};
use crate::xpath::{Xpath, parse_document};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use shiftlint_provider::{Error, EvaluateResponse, IncidentContext, Result};
use shiftlint_types::{CancelToken, file_uri};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// `file` condition: filename glob across the analysis roots.
#[derive(Debug, Deserialize)]
struct FileCondition {
    pattern: String,
}

pub fn eval_file(ctx: &CancelToken, searcher: &FileSearcher, info: &Value) -> Result<EvaluateResponse> {
    let cond: FileCondition = decode(info, "file")?;
    let set = compile_pattern(&cond.pattern)?;
    let files = searcher.matching(ctx, Some(&set), None)?;

    let mut response = EvaluateResponse {
        matched: !files.is_empty(),
        ..Default::default()
    };
    let mut filepaths = Vec::new();
    for path in files {
        filepaths.push(Value::String(path.display().to_string()));
        response.incidents.push(IncidentContext {
            file_uri: file_uri(&path),
            ..Default::default()
        });
    }
    response
        .template_context
        .insert("filepaths".to_string(), Value::Array(filepaths));
    Ok(response)
}

/// `filecontent` condition: line-regex search, optionally scoped by a
/// filename sub-pattern.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileContentCondition {
    pattern: String,
    #[serde(default)]
    file_pattern: Option<String>,
}

pub fn eval_filecontent(
    ctx: &CancelToken,
    searcher: &FileSearcher,
    info: &Value,
) -> Result<EvaluateResponse> {
    let cond: FileContentCondition = decode(info, "filecontent")?;
    let line_re = Regex::new(&cond.pattern)
        .map_err(|e| Error::Evaluate(format!("invalid content pattern {:?}: {}", cond.pattern, e)))?;
    let name_re = match &cond.file_pattern {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
            Error::Evaluate(format!("invalid file pattern {:?}: {}", pattern, e))
        })?),
        None => None,
    };

    let mut response = EvaluateResponse::default();
    for path in searcher.files(ctx)? {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(re) = &name_re {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !re.is_match(name) && !re.is_match(&path.display().to_string()) {
                continue;
            }
        }
        // Binary and unreadable files are silently skipped
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if let Some(found) = line_re.find(line) {
                let mut variables = BTreeMap::new();
                variables.insert(
                    "matchingText".to_string(),
                    Value::String(found.as_str().to_string()),
                );
                response.incidents.push(IncidentContext {
                    file_uri: file_uri(&path),
                    line_number: Some(idx as i64 + 1),
                    variables,
                    ..Default::default()
                });
            }
        }
    }
    response.matched = !response.incidents.is_empty();
    Ok(response)
}

/// `xml` condition: XPath query over XML files with a namespace map.
#[derive(Debug, Deserialize)]
struct XmlCondition {
    xpath: String,
    #[serde(default)]
    namespaces: BTreeMap<String, String>,
    #[serde(default)]
    filepaths: Option<Value>,
}

pub fn eval_xml(ctx: &CancelToken, searcher: &FileSearcher, info: &Value) -> Result<EvaluateResponse> {
    let cond: XmlCondition = decode(info, "xml")?;
    let xpath = Xpath::compile(&cond.xpath, &cond.namespaces)?;
    let files = xml_candidates(ctx, searcher, cond.filepaths.as_ref())?;

    let mut response = EvaluateResponse::default();
    for path in files {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(doc) = parse_document(&content) else {
            // Not every .xml candidate is well-formed; skip quietly
            continue;
        };
        for found in xpath.matches(&doc) {
            let mut variables = BTreeMap::new();
            variables.insert("data".to_string(), Value::String(found.value.clone()));
            response.incidents.push(IncidentContext {
                file_uri: file_uri(&path),
                line_number: Some(found.line as i64),
                variables,
                ..Default::default()
            });
        }
    }
    response.matched = !response.incidents.is_empty();
    Ok(response)
}

/// `xmlPublicID` condition: regex over DOCTYPE public identifiers.
#[derive(Debug, Deserialize)]
struct XmlPublicIdCondition {
    regex: String,
    #[serde(default)]
    filepaths: Option<Value>,
}

pub fn eval_xml_public_id(
    ctx: &CancelToken,
    searcher: &FileSearcher,
    info: &Value,
) -> Result<EvaluateResponse> {
    let cond: XmlPublicIdCondition = decode(info, "xmlPublicID")?;
    let re = Regex::new(&cond.regex)
        .map_err(|e| Error::Evaluate(format!("invalid public-id regex {:?}: {}", cond.regex, e)))?;
    let files = xml_candidates(ctx, searcher, cond.filepaths.as_ref())?;

    let mut response = EvaluateResponse::default();
    for path in files {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(doc) = parse_document(&content) else {
            continue;
        };
        if let Some(public_id) = doc.public_id
            && re.is_match(&public_id)
        {
            let mut variables = BTreeMap::new();
            variables.insert("publicID".to_string(), Value::String(public_id));
            response.incidents.push(IncidentContext {
                file_uri: file_uri(&path),
                variables,
                ..Default::default()
            });
        }
    }
    response.matched = !response.incidents.is_empty();
    Ok(response)
}

/// `json` condition: key-path navigation over JSON documents. The `xpath`
/// field reuses the `/key`, `//key` step syntax.
#[derive(Debug, Deserialize)]
struct JsonCondition {
    xpath: String,
    #[serde(default)]
    filepaths: Option<Value>,
}

pub fn eval_json(ctx: &CancelToken, searcher: &FileSearcher, info: &Value) -> Result<EvaluateResponse> {
    let cond: JsonCondition = decode(info, "json")?;
    let steps = parse_key_path(&cond.xpath)?;
    let files = match normalize_filepaths(cond.filepaths.as_ref()) {
        Some(paths) => searcher.matching(ctx, None, Some(paths.as_slice()))?,
        None => {
            let set = compile_pattern("*.json")?;
            searcher.matching(ctx, Some(&set), None)?
        }
    };

    let mut response = EvaluateResponse::default();
    for path in files {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(root) = serde_json::from_str::<Value>(&content) else {
            continue;
        };
        let mut hits = Vec::new();
        walk_json(&root, &steps, &mut hits);
        for hit in hits {
            let mut variables = BTreeMap::new();
            variables.insert("data".to_string(), hit);
            response.incidents.push(IncidentContext {
                file_uri: file_uri(&path),
                variables,
                ..Default::default()
            });
        }
    }
    response.matched = !response.incidents.is_empty();
    Ok(response)
}

/// `hasTags` condition: passes iff every listed tag is in the run's
/// templated tag set. Contributes no incidents of its own.
pub fn eval_has_tags(info: &Value, run_tags: &[String]) -> Result<EvaluateResponse> {
    let info = shiftlint_provider::ProviderContext::unwrap_value(info);
    let wanted: Vec<String> = match info {
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(Error::Evaluate(format!("hasTags entry must be a string, got {}", other))),
            })
            .collect::<Result<_>>()?,
        Value::Object(map) => match map.get("tags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => return Err(Error::Evaluate("hasTags expects a list of tags".to_string())),
        },
        other => {
            return Err(Error::Evaluate(format!(
                "hasTags expects a list of tags, got {}",
                other
            )));
        }
    };
    Ok(EvaluateResponse {
        matched: wanted.iter().all(|tag| run_tags.iter().any(|t| t == tag)),
        ..Default::default()
    })
}

fn decode<'a, T: Deserialize<'a>>(info: &'a Value, capability: &str) -> Result<T> {
    T::deserialize(info)
        .map_err(|e| Error::Evaluate(format!("bad {} condition: {}", capability, e)))
}

fn xml_candidates(
    ctx: &CancelToken,
    searcher: &FileSearcher,
    filepaths: Option<&Value>,
) -> Result<Vec<PathBuf>> {
    match normalize_filepaths(filepaths) {
        Some(paths) => searcher.matching(ctx, None, Some(paths.as_slice())),
        None => {
            let set = compile_pattern("*.{xml,xhtml,jsp,xmi}")?;
            searcher.matching(ctx, Some(&set), None)
        }
    }
}

/// Accept a path list given as an array, a whitespace-separated string, or
/// a single path. Empty input means "no constraint".
pub fn normalize_filepaths(value: Option<&Value>) -> Option<Vec<PathBuf>> {
    let value = value?;
    let paths: Vec<PathBuf> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| shiftlint_types::uri_to_path(s))
            .collect(),
        Value::String(s) => s
            .split_whitespace()
            .map(shiftlint_types::uri_to_path)
            .collect(),
        _ => Vec::new(),
    };
    if paths.is_empty() { None } else { Some(paths) }
}

#[derive(Debug, PartialEq)]
enum JsonStep {
    Key(String),
    Descend(String),
}

fn parse_key_path(expr: &str) -> Result<Vec<JsonStep>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::Evaluate("empty json path".to_string()));
    }
    let mut rest = expr;
    let mut steps = Vec::new();
    let mut descend = !expr.starts_with('/') || expr.starts_with("//");
    rest = rest.trim_start_matches('/');
    while !rest.is_empty() {
        let (key, remainder) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if key.is_empty() {
            return Err(Error::Evaluate(format!("empty step in json path {:?}", expr)));
        }
        steps.push(if descend {
            JsonStep::Descend(key.to_string())
        } else {
            JsonStep::Key(key.to_string())
        });
        descend = remainder.starts_with("//");
        rest = remainder.trim_start_matches('/');
    }
    Ok(steps)
}

fn walk_json(value: &Value, steps: &[JsonStep], out: &mut Vec<Value>) {
    let Some(step) = steps.first() else {
        out.push(value.clone());
        return;
    };
    match step {
        JsonStep::Key(key) => match value {
            Value::Object(map) => {
                if let Some(next) = map.get(key) {
                    walk_json(next, &steps[1..], out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    walk_json(item, steps, out);
                }
            }
            _ => {}
        },
        JsonStep::Descend(key) => match value {
            Value::Object(map) => {
                for (k, next) in map {
                    if k == key {
                        walk_json(next, &steps[1..], out);
                    } else {
                        walk_json(next, steps, out);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    walk_json(item, steps, out);
                }
            }
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DEFAULT_EXCLUDED_DIRS;
    use serde_json::json;

    fn world() -> (tempfile::TempDir, FileSearcher) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/App.java"),
            "import javax.ejb.Stateless;\nclass App {}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/pom.xml"),
            "<project>\n  <dependency>\n    <groupId>javax</groupId>\n  </dependency>\n</project>\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/package.json"),
            r#"{"dependencies": {"left-pad": "1.0.0"}}"#,
        )
        .unwrap();
        let searcher = FileSearcher::new(
            vec![dir.path().to_path_buf()],
            DEFAULT_EXCLUDED_DIRS.clone(),
        );
        (dir, searcher)
    }

    #[test]
    fn file_matches_publish_filepaths_template() {
        let (_dir, searcher) = world();
        let ctx = CancelToken::new();
        let response =
            eval_file(&ctx, &searcher, &json!({"pattern": "App.java"})).unwrap();
        assert!(response.matched);
        assert_eq!(response.incidents.len(), 1);
        let paths = response.template_context.get("filepaths").unwrap();
        assert_eq!(paths.as_array().unwrap().len(), 1);
    }

    #[test]
    fn filecontent_reports_line_numbers_and_matching_text() {
        let (_dir, searcher) = world();
        let ctx = CancelToken::new();
        let response = eval_filecontent(
            &ctx,
            &searcher,
            &json!({"pattern": "javax\\.ejb", "filePattern": "\\.java$"}),
        )
        .unwrap();
        assert!(response.matched);
        assert_eq!(response.incidents.len(), 1);
        assert_eq!(response.incidents[0].line_number, Some(1));
        assert_eq!(
            response.incidents[0].variables.get("matchingText"),
            Some(&json!("javax.ejb"))
        );
    }

    #[test]
    fn xml_xpath_finds_nodes_in_candidate_files() {
        let (_dir, searcher) = world();
        let ctx = CancelToken::new();
        let response = eval_xml(&ctx, &searcher, &json!({"xpath": "//groupId"})).unwrap();
        assert!(response.matched);
        assert_eq!(response.incidents.len(), 1);
        assert_eq!(
            response.incidents[0].variables.get("data"),
            Some(&json!("javax"))
        );
        assert_eq!(response.incidents[0].line_number, Some(3));
    }

    #[test]
    fn xml_explicit_filepaths_constrain_the_search() {
        let (dir, searcher) = world();
        let ctx = CancelToken::new();
        let other = dir.path().join("src/App.java").display().to_string();
        let response = eval_xml(
            &ctx,
            &searcher,
            &json!({"xpath": "//groupId", "filepaths": [other]}),
        )
        .unwrap();
        assert!(!response.matched);
    }

    #[test]
    fn json_key_paths_descend() {
        let (_dir, searcher) = world();
        let ctx = CancelToken::new();
        let response =
            eval_json(&ctx, &searcher, &json!({"xpath": "//dependencies"})).unwrap();
        assert!(response.matched);
        assert_eq!(
            response.incidents[0].variables.get("data"),
            Some(&json!({"left-pad": "1.0.0"}))
        );
    }

    #[test]
    fn has_tags_requires_every_tag() {
        let run_tags = vec!["javaee".to_string(), "web".to_string()];
        assert!(eval_has_tags(&json!(["javaee"]), &run_tags).unwrap().matched);
        assert!(
            eval_has_tags(&json!(["javaee", "web"]), &run_tags)
                .unwrap()
                .matched
        );
        assert!(
            !eval_has_tags(&json!(["javaee", "jms"]), &run_tags)
                .unwrap()
                .matched
        );
        assert!(eval_has_tags(&json!(42), &run_tags).is_err());
    }

    #[test]
    fn invalid_patterns_surface_as_evaluate_errors() {
        let (_dir, searcher) = world();
        let ctx = CancelToken::new();
        assert!(eval_filecontent(&ctx, &searcher, &json!({"pattern": "("})).is_err());
        assert!(eval_xml(&ctx, &searcher, &json!({"xpath": ""})).is_err());
    }
}
