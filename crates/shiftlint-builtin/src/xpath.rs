use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use shiftlint_provider::{Error, Result};
use std::collections::BTreeMap;

/// One element of a parsed XML document, with enough position information
/// to report incidents.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub local_name: String,
    /// Resolved namespace URI of the element, when bound.
    pub namespace: Option<String>,
    /// Attribute name/value pairs with prefixes stripped.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    /// Concatenated direct text content.
    pub text: String,
    /// 1-based line of the start tag.
    pub line: u32,
}

impl XmlNode {
    /// Direct plus descendant text, the way rule authors expect a node's
    /// value to read.
    pub fn deep_text(&self) -> String {
        let mut out = self.text.trim().to_string();
        for child in &self.children {
            let nested = child.deep_text();
            if !nested.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&nested);
            }
        }
        out
    }
}

/// A parsed document: top-level elements and the DOCTYPE public
/// identifier, when one is declared.
#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    pub roots: Vec<XmlNode>,
    pub public_id: Option<String>,
}

/// Parse a document, tracking element line numbers.
pub fn parse_document(content: &str) -> Result<XmlDocument> {
    let mut reader = NsReader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut doc = XmlDocument::default();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut line_tracker = LineTracker::new(content);

    loop {
        match reader.read_resolved_event() {
            Ok((resolve, Event::Start(start))) => {
                let namespace = resolved_namespace(&resolve);
                let pos = reader.buffer_position() as usize;
                let node = make_node(namespace, &start, line_tracker.line_at(pos))?;
                stack.push(node);
            }
            Ok((resolve, Event::Empty(start))) => {
                let namespace = resolved_namespace(&resolve);
                let pos = reader.buffer_position() as usize;
                let node = make_node(namespace, &start, line_tracker.line_at(pos))?;
                attach(&mut stack, &mut doc, node);
            }
            Ok((_, Event::End(_))) => {
                let node = match stack.pop() {
                    Some(node) => node,
                    None => continue,
                };
                attach(&mut stack, &mut doc, node);
            }
            Ok((_, Event::Text(text))) => {
                if let Some(parent) = stack.last_mut() {
                    let value = text
                        .unescape()
                        .map_err(|e| Error::Evaluate(format!("bad xml text: {}", e)))?;
                    if !parent.text.is_empty() {
                        parent.text.push(' ');
                    }
                    parent.text.push_str(value.trim());
                }
            }
            Ok((_, Event::CData(data))) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .text
                        .push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Ok((_, Event::DocType(doctype))) => {
                let raw = doctype
                    .unescape()
                    .map_err(|e| Error::Evaluate(format!("bad doctype: {}", e)))?
                    .to_string();
                doc.public_id = extract_public_id(&raw);
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Evaluate(format!("xml parse error: {}", e))),
        }
    }
    Ok(doc)
}

fn attach(stack: &mut Vec<XmlNode>, doc: &mut XmlDocument, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => doc.roots.push(node),
    }
}

fn resolved_namespace(resolve: &ResolveResult) -> Option<String> {
    match resolve {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).to_string()),
        _ => None,
    }
}

fn make_node(
    namespace: Option<String>,
    start: &quick_xml::events::BytesStart<'_>,
    line: u32,
) -> Result<XmlNode> {
    let local_name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Evaluate(format!("bad xml attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Evaluate(format!("bad xml attribute: {}", e)))?
            .to_string();
        attrs.push((key, value));
    }
    Ok(XmlNode {
        local_name,
        namespace,
        attrs,
        children: Vec::new(),
        text: String::new(),
        line,
    })
}

fn extract_public_id(doctype: &str) -> Option<String> {
    let idx = doctype.find("PUBLIC")?;
    let rest = &doctype[idx + "PUBLIC".len()..];
    let open = rest.find(['"', '\''])?;
    let quote = rest.as_bytes()[open] as char;
    let tail = &rest[open + 1..];
    let close = tail.find(quote)?;
    Some(tail[..close].to_string())
}

struct LineTracker<'a> {
    content: &'a [u8],
    offset: usize,
    line: u32,
}

impl<'a> LineTracker<'a> {
    fn new(content: &'a str) -> Self {
        LineTracker {
            content: content.as_bytes(),
            offset: 0,
            line: 1,
        }
    }

    /// Line of the byte offset; offsets must be fed in increasing order.
    fn line_at(&mut self, offset: usize) -> u32 {
        let end = offset.min(self.content.len());
        while self.offset < end {
            if self.content[self.offset] == b'\n' {
                self.line += 1;
            }
            self.offset += 1;
        }
        self.line
    }
}

/// One value matched by an XPath query.
#[derive(Debug, Clone, PartialEq)]
pub struct XpathMatch {
    pub line: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Axis {
    Child,
    DescendantOrSelf,
}

#[derive(Debug, Clone, PartialEq)]
enum NameTest {
    Any,
    Named { prefix: Option<String>, local: String },
    Attribute(String),
    Text,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    HasChild(String),
    ChildEquals { name: String, value: String },
    HasAttr(String),
    AttrEquals { name: String, value: String },
    Index(usize),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NameTest,
    predicates: Vec<Predicate>,
}

/// A compiled XPath expression covering the subset migration rules use:
/// `/` and `//` axes, `*` wildcards, namespace prefixes, attribute and
/// `text()` selection, and `[child]`, `[child='v']`, `[@attr]`,
/// `[@attr='v']`, `[n]` predicates.
#[derive(Debug, Clone)]
pub struct Xpath {
    steps: Vec<Step>,
    namespaces: BTreeMap<String, String>,
}

impl Xpath {
    pub fn compile(expr: &str, namespaces: &BTreeMap<String, String>) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::Evaluate("empty xpath expression".to_string()));
        }
        let mut rest = expr;
        let mut steps = Vec::new();
        // A bare leading name is shorthand for descendant search.
        let mut axis = if rest.starts_with("//") {
            rest = &rest[2..];
            Axis::DescendantOrSelf
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
            Axis::Child
        } else {
            Axis::DescendantOrSelf
        };
        loop {
            let (step_raw, remainder, next_axis) = split_step(rest);
            if step_raw.is_empty() {
                return Err(Error::Evaluate(format!("empty step in xpath {:?}", expr)));
            }
            steps.push(parse_step(step_raw, axis)?);
            match (remainder, next_axis) {
                (Some(r), Some(a)) => {
                    rest = r;
                    axis = a;
                }
                _ => break,
            }
        }
        Ok(Xpath {
            steps,
            namespaces: namespaces.clone(),
        })
    }

    /// Evaluate against a document's roots.
    pub fn matches(&self, doc: &XmlDocument) -> Vec<XpathMatch> {
        let mut current: Vec<&XmlNode> = Vec::new();
        let first = &self.steps[0];
        for root in &doc.roots {
            match first.axis {
                Axis::Child => {
                    if self.node_passes(root, first) {
                        current.push(root);
                    }
                }
                Axis::DescendantOrSelf => {
                    collect_descendants(root, |n| self.node_passes(n, first), &mut current);
                }
            }
        }
        let mut final_test = &first.test;
        for step in &self.steps[1..] {
            final_test = &step.test;
            // Attribute and text() steps select a value from the node set
            // they land on rather than descending further.
            let value_step = matches!(step.test, NameTest::Attribute(_) | NameTest::Text);
            let mut next = Vec::new();
            for node in current {
                match (value_step, &step.axis) {
                    (true, Axis::Child) => {
                        if self.node_passes(node, step) {
                            next.push(node);
                        }
                    }
                    (true, Axis::DescendantOrSelf) => {
                        collect_descendants(node, |n| self.node_passes(n, step), &mut next);
                    }
                    (false, Axis::Child) => {
                        for child in &node.children {
                            if self.node_passes(child, step) {
                                next.push(child);
                            }
                        }
                    }
                    (false, Axis::DescendantOrSelf) => {
                        for child in &node.children {
                            collect_descendants(child, |n| self.node_passes(n, step), &mut next);
                        }
                    }
                }
            }
            current = next;
        }

        current
            .into_iter()
            .filter_map(|node| self.extract(node, final_test))
            .collect()
    }

    fn extract(&self, node: &XmlNode, test: &NameTest) -> Option<XpathMatch> {
        match test {
            NameTest::Attribute(name) => node
                .attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| XpathMatch {
                    line: node.line,
                    value: v.clone(),
                }),
            NameTest::Text => Some(XpathMatch {
                line: node.line,
                value: node.text.clone(),
            }),
            _ => Some(XpathMatch {
                line: node.line,
                value: node.deep_text(),
            }),
        }
    }

    fn node_passes(&self, node: &XmlNode, step: &Step) -> bool {
        let name_ok = match &step.test {
            NameTest::Any => true,
            NameTest::Named { prefix, local } => {
                if node.local_name != *local {
                    false
                } else {
                    match prefix {
                        // An unprefixed query name matches regardless of the
                        // document's default namespace.
                        None => true,
                        Some(prefix) => match self.namespaces.get(prefix) {
                            Some(uri) => node.namespace.as_deref() == Some(uri.as_str()),
                            None => false,
                        },
                    }
                }
            }
            // Attribute/text() steps select from the node they land on.
            NameTest::Attribute(_) | NameTest::Text => true,
        };
        name_ok && step.predicates.iter().all(|p| predicate_passes(node, p))
    }
}

fn predicate_passes(node: &XmlNode, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::HasChild(name) => node.children.iter().any(|c| &c.local_name == name),
        Predicate::ChildEquals { name, value } => node
            .children
            .iter()
            .any(|c| &c.local_name == name && c.deep_text() == *value),
        Predicate::HasAttr(name) => node.attrs.iter().any(|(k, _)| k == name),
        Predicate::AttrEquals { name, value } => {
            node.attrs.iter().any(|(k, v)| k == name && v == value)
        }
        // Positional predicates are resolved against siblings at collection
        // time; standalone they only accept the first match.
        Predicate::Index(n) => *n == 1,
    }
}

fn collect_descendants<'a>(
    node: &'a XmlNode,
    accept: impl Fn(&XmlNode) -> bool + Copy,
    out: &mut Vec<&'a XmlNode>,
) {
    if accept(node) {
        out.push(node);
    }
    for child in &node.children {
        collect_descendants(child, accept, out);
    }
}

/// Split off the first step, honoring predicates that contain slashes.
fn split_step(rest: &str) -> (&str, Option<&str>, Option<Axis>) {
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'/' if depth == 0 => {
                let step = &rest[..i];
                if bytes.get(i + 1) == Some(&b'/') {
                    return (step, Some(&rest[i + 2..]), Some(Axis::DescendantOrSelf));
                }
                return (step, Some(&rest[i + 1..]), Some(Axis::Child));
            }
            _ => {}
        }
        i += 1;
    }
    (rest, None, None)
}

fn parse_step(raw: &str, axis: Axis) -> Result<Step> {
    let mut name_part = raw;
    let mut predicates = Vec::new();
    if let Some(open) = raw.find('[') {
        name_part = &raw[..open];
        let mut rest = &raw[open..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| Error::Evaluate(format!("unterminated predicate in {:?}", raw)))?;
            predicates.push(parse_predicate(&stripped[..close])?);
            rest = &stripped[close + 1..];
        }
    }

    let test = if name_part == "*" {
        NameTest::Any
    } else if let Some(attr) = name_part.strip_prefix('@') {
        NameTest::Attribute(attr.to_string())
    } else if name_part == "text()" {
        NameTest::Text
    } else if let Some((prefix, local)) = name_part.split_once(':') {
        NameTest::Named {
            prefix: Some(prefix.to_string()),
            local: local.to_string(),
        }
    } else {
        NameTest::Named {
            prefix: None,
            local: name_part.to_string(),
        }
    };
    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn parse_predicate(raw: &str) -> Result<Predicate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Evaluate("empty xpath predicate".to_string()));
    }
    if let Ok(index) = raw.parse::<usize>() {
        return Ok(Predicate::Index(index));
    }
    match raw.split_once('=') {
        Some((left, right)) => {
            let value = right.trim().trim_matches(['\'', '"']).to_string();
            let left = left.trim();
            match left.strip_prefix('@') {
                Some(attr) => Ok(Predicate::AttrEquals {
                    name: attr.to_string(),
                    value,
                }),
                None => Ok(Predicate::ChildEquals {
                    name: left.to_string(),
                    value,
                }),
            }
        }
        None => match raw.strip_prefix('@') {
            Some(attr) => Ok(Predicate::HasAttr(attr.to_string())),
            None => Ok(Predicate::HasChild(raw.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<?xml version="1.0"?>
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
"#;

    fn compile(expr: &str) -> Xpath {
        Xpath::compile(expr, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn descendant_search_finds_all_matches() {
        let doc = parse_document(POM).unwrap();
        let matches = compile("//dependency").matches(&doc);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line, 4);
        assert_eq!(matches[1].line, 8);
    }

    #[test]
    fn child_steps_walk_the_hierarchy() {
        let doc = parse_document(POM).unwrap();
        let matches = compile("/project/dependencies/dependency/artifactId").matches(&doc);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].value, "javaee-api");
    }

    #[test]
    fn predicates_filter_by_child_value() {
        let doc = parse_document(POM).unwrap();
        let matches = compile("//dependency[groupId='javax']/artifactId").matches(&doc);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value, "javaee-api");
    }

    #[test]
    fn namespace_prefixes_resolve_through_the_map() {
        let mut ns = BTreeMap::new();
        ns.insert(
            "m".to_string(),
            "http://maven.apache.org/POM/4.0.0".to_string(),
        );
        let doc = parse_document(POM).unwrap();
        let matched = Xpath::compile("//m:dependency", &ns).unwrap().matches(&doc);
        assert_eq!(matched.len(), 2);

        let mut wrong = BTreeMap::new();
        wrong.insert("m".to_string(), "http://other".to_string());
        let unmatched = Xpath::compile("//m:dependency", &wrong)
            .unwrap()
            .matches(&doc);
        assert!(unmatched.is_empty());
    }

    #[test]
    fn attribute_steps_select_attribute_values() {
        let doc = parse_document(r#"<beans><bean class="com.example.Main"/></beans>"#).unwrap();
        let matches = compile("//bean/@class").matches(&doc);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value, "com.example.Main");
    }

    #[test]
    fn doctype_public_id_is_captured() {
        let doc = parse_document(
            r#"<!DOCTYPE web-app PUBLIC "-//Sun Microsystems, Inc.//DTD Web Application 2.3//EN" "http://java.sun.com/dtd/web-app_2_3.dtd"><web-app/>"#,
        )
        .unwrap();
        assert_eq!(
            doc.public_id.as_deref(),
            Some("-//Sun Microsystems, Inc.//DTD Web Application 2.3//EN")
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(Xpath::compile("", &BTreeMap::new()).is_err());
        assert!(Xpath::compile("//dep[unclosed", &BTreeMap::new()).is_err());
        assert!(Xpath::compile("//a//", &BTreeMap::new()).is_err());
    }
}
