use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A single label attached to a rule, rule set, or dependency.
///
/// Labels are written as `key` or `key=value`. Keys may be namespaced with
/// `/` and `.` (e.g. `shiftlint.io/source=java`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: Option<String>,
}

impl Label {
    /// Parse a `key` or `key=value` label string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidLabel(raw.to_string()));
        }
        match raw.split_once('=') {
            None => {
                if !is_valid_key(raw) {
                    return Err(Error::InvalidLabel(raw.to_string()));
                }
                Ok(Label {
                    key: raw.to_string(),
                    value: None,
                })
            }
            Some((key, value)) => {
                if key.is_empty() || !is_valid_key(key) {
                    return Err(Error::InvalidLabel(raw.to_string()));
                }
                Ok(Label {
                    key: key.to_string(),
                    value: Some(value.to_string()),
                })
            }
        }
    }

    /// Parse a set of label strings, skipping entries that do not parse.
    ///
    /// Rule authors routinely mix free-form tags into label lists; matching
    /// is total, so unparseable entries simply never match a selector.
    pub fn parse_set(raw: &[String]) -> Vec<Label> {
        raw.iter().filter_map(|s| Label::parse(s).ok()).collect()
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => write!(f, "{}", self.key),
        }
    }
}

fn is_valid_key(key: &str) -> bool {
    key.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':'))
}

/// A parsed boolean selector expression over labels.
///
/// Supports `&&`, `||`, `!`, parentheses, and `key=value` comparators. A
/// comparator matches when any label on the entity shares the key and the
/// value matches literally, or the selector value is the wildcard `*`.
/// Unknown keys evaluate to false; matching never fails.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelSelector {
    And(Vec<LabelSelector>),
    Or(Vec<LabelSelector>),
    Not(Box<LabelSelector>),
    /// Bare `key` comparator: any label with the key matches.
    HasKey(String),
    /// `key=value` comparator.
    Eq { key: String, value: String },
}

impl LabelSelector {
    /// Parse a selector expression, failing with the byte offset of the
    /// first offending token.
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens = lex(expr)?;
        let mut parser = Parser { tokens, at: 0 };
        let selector = parser.or_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::Selector {
                pos: tok.pos,
                message: format!("unexpected {:?}", tok.kind),
            });
        }
        Ok(selector)
    }

    /// Evaluate against a label set. Total: never panics, never errors.
    pub fn matches(&self, labels: &[Label]) -> bool {
        match self {
            LabelSelector::And(children) => children.iter().all(|c| c.matches(labels)),
            LabelSelector::Or(children) => children.iter().any(|c| c.matches(labels)),
            LabelSelector::Not(child) => !child.matches(labels),
            LabelSelector::HasKey(key) => labels.iter().any(|l| &l.key == key),
            LabelSelector::Eq { key, value } => labels.iter().any(|l| {
                &l.key == key
                    && (value == "*" || l.value.as_deref() == Some(value.as_str()))
            }),
        }
    }

    /// Evaluate against unparsed label strings.
    pub fn matches_strs(&self, labels: &[String]) -> bool {
        self.matches(&Label::parse_set(labels))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Comparator(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn lex(expr: &str) -> Result<Vec<Token>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    pos: i,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    kind: TokenKind::RParen,
                    pos: i,
                });
                i += 1;
            }
            '!' => {
                tokens.push(Token {
                    kind: TokenKind::Not,
                    pos: i,
                });
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) != Some(&b'&') {
                    return Err(Error::Selector {
                        pos: i,
                        message: "expected '&&'".to_string(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::And,
                    pos: i,
                });
                i += 2;
            }
            '|' => {
                if bytes.get(i + 1) != Some(&b'|') {
                    return Err(Error::Selector {
                        pos: i,
                        message: "expected '||'".to_string(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Or,
                    pos: i,
                });
                i += 2;
            }
            _ => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_whitespace() || matches!(c, '(' | ')' | '!' | '&' | '|') {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Comparator(expr[start..i].to_string()),
                    pos: start,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.at).cloned();
        if tok.is_some() {
            self.at += 1;
        }
        tok
    }

    fn or_expr(&mut self) -> Result<LabelSelector> {
        let mut children = vec![self.and_expr()?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.bump();
            children.push(self.and_expr()?);
        }
        Ok(fold(children, LabelSelector::Or))
    }

    fn and_expr(&mut self) -> Result<LabelSelector> {
        let mut children = vec![self.unary()?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::And)) {
            self.bump();
            children.push(self.unary()?);
        }
        Ok(fold(children, LabelSelector::And))
    }

    fn unary(&mut self) -> Result<LabelSelector> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Not) => {
                self.bump();
                Ok(LabelSelector::Not(Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<LabelSelector> {
        let end = self.tokens.last().map(|t| t.pos).unwrap_or(0);
        let tok = self.bump().ok_or(Error::Selector {
            pos: end,
            message: "unexpected end of expression".to_string(),
        })?;
        match tok.kind {
            TokenKind::LParen => {
                let inner = self.or_expr()?;
                match self.bump() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    other => Err(Error::Selector {
                        pos: other.map(|t| t.pos).unwrap_or(end),
                        message: "expected ')'".to_string(),
                    }),
                }
            }
            TokenKind::Comparator(raw) => parse_comparator(&raw, tok.pos),
            other => Err(Error::Selector {
                pos: tok.pos,
                message: format!("unexpected {:?}", other),
            }),
        }
    }
}

/// A single-child junction collapses to the child itself.
fn fold(mut children: Vec<LabelSelector>, wrap: fn(Vec<LabelSelector>) -> LabelSelector) -> LabelSelector {
    if children.len() == 1 {
        children.swap_remove(0)
    } else {
        wrap(children)
    }
}

fn parse_comparator(raw: &str, pos: usize) -> Result<LabelSelector> {
    match raw.split_once('=') {
        None => {
            if raw.is_empty() || !is_valid_key(raw) {
                return Err(Error::Selector {
                    pos,
                    message: format!("invalid comparator {:?}", raw),
                });
            }
            Ok(LabelSelector::HasKey(raw.to_string()))
        }
        Some((key, value)) => {
            if key.is_empty() || !is_valid_key(key) {
                return Err(Error::Selector {
                    pos,
                    message: format!("invalid comparator key in {:?}", raw),
                });
            }
            if value.is_empty() {
                return Err(Error::Selector {
                    pos,
                    message: format!("missing value after '=' in {:?}", raw),
                });
            }
            Ok(LabelSelector::Eq {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(raw: &[&str]) -> Vec<Label> {
        raw.iter().map(|s| Label::parse(s).unwrap()).collect()
    }

    #[test]
    fn parses_key_value_and_bare_labels() {
        let label = Label::parse("shiftlint.io/source=java").unwrap();
        assert_eq!(label.key, "shiftlint.io/source");
        assert_eq!(label.value.as_deref(), Some("java"));

        let bare = Label::parse("deprecated").unwrap();
        assert_eq!(bare.key, "deprecated");
        assert_eq!(bare.value, None);
    }

    #[test]
    fn rejects_empty_and_malformed_labels() {
        assert!(Label::parse("").is_err());
        assert!(Label::parse("=java").is_err());
        assert!(Label::parse("bad key=x").is_err());
    }

    #[test]
    fn equality_matches_literal_and_wildcard() {
        let sel = LabelSelector::parse("a=b").unwrap();
        assert!(sel.matches(&labels(&["a=b"])));
        assert!(!sel.matches(&labels(&["a=c"])));
        assert!(!sel.matches(&labels(&["b=b"])));

        let any = LabelSelector::parse("a=*").unwrap();
        assert!(any.matches(&labels(&["a=b"])));
        assert!(any.matches(&labels(&["a"])));
        assert!(!any.matches(&labels(&["b=b"])));
    }

    #[test]
    fn negation_and_conjunction_laws_hold() {
        let contradiction = LabelSelector::parse("!(a=b) && a=b").unwrap();
        let tautology = LabelSelector::parse("!(a=b) || a=b").unwrap();
        let idempotent = LabelSelector::parse("(a=b) && (a=b)").unwrap();
        let plain = LabelSelector::parse("a=b").unwrap();

        for set in [&labels(&["a=b"])[..], &labels(&["a=c"])[..], &[]] {
            assert!(!contradiction.matches(set));
            assert!(tautology.matches(set));
            assert_eq!(idempotent.matches(set), plain.matches(set));
        }
    }

    #[test]
    fn unknown_keys_are_false_under_equality_true_negated() {
        let eq = LabelSelector::parse("missing=x").unwrap();
        let neg = LabelSelector::parse("!missing=x").unwrap();
        let set = labels(&["present=x"]);
        assert!(!eq.matches(&set));
        assert!(neg.matches(&set));
    }

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let sel = LabelSelector::parse("a=1 || b=1 && c=1").unwrap();
        assert!(sel.matches(&labels(&["a=1"])));
        assert!(!sel.matches(&labels(&["b=1"])));
        assert!(sel.matches(&labels(&["b=1", "c=1"])));
    }

    #[test]
    fn parse_errors_cite_position() {
        match LabelSelector::parse("a=b &! c=d") {
            Err(Error::Selector { pos, .. }) => assert_eq!(pos, 4),
            other => panic!("expected selector error, got {:?}", other),
        }
        assert!(LabelSelector::parse("(a=b").is_err());
        assert!(LabelSelector::parse("a=b )").is_err());
        assert!(LabelSelector::parse("a=").is_err());
    }
}
