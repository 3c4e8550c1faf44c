//! Small Lucene-style query string parser.
//!
//! Supports `field:term`, `field:"a phrase"`, `AND`/`OR`/`NOT` (and `&&`,
//! `||`, `!`), `+`/`-` prefixes, parentheses and trailing-`*` prefix terms.
//! Adjacent clauses without an operator are AND-ed.

use crate::error::{Result, SuggestError};
use crate::query::{BoolQuery, QueryExpr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Clause { field: Option<String>, value: String },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    root: Option<Node>,
}

impl ParsedQuery {
    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// Literal words of every non-negated clause on `field`, in query order.
    /// Clauses without a field count toward `default_field`. Phrases are
    /// split into their words.
    pub fn terms_for(&self, field: &str, default_field: Option<&str>) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            collect_terms(root, field, default_field, &mut out);
        }
        out
    }

    pub fn to_query_expr(&self, default_field: &str) -> QueryExpr {
        match &self.root {
            None => QueryExpr::All,
            Some(Node::Not(inner)) => BoolQuery::new()
                .must(QueryExpr::All)
                .must_not(node_expr(inner, default_field))
                .build(),
            Some(node) => node_expr(node, default_field),
        }
    }
}

fn collect_terms(node: &Node, field: &str, default_field: Option<&str>, out: &mut Vec<String>) {
    match node {
        Node::Clause { field: f, value } => {
            let matches = match f {
                Some(f) => f == field,
                None => default_field == Some(field),
            };
            if matches {
                out.extend(value.split_whitespace().map(str::to_string));
            }
        }
        Node::And(nodes) | Node::Or(nodes) => {
            for n in nodes {
                collect_terms(n, field, default_field, out);
            }
        }
        Node::Not(_) => {}
    }
}

fn node_expr(node: &Node, default_field: &str) -> QueryExpr {
    match node {
        Node::Clause { field, value } => {
            let field = field.as_deref().unwrap_or(default_field);
            match value.strip_suffix('*') {
                Some(prefix) if !prefix.is_empty() => QueryExpr::prefix(field, prefix),
                _ if value == "*" => QueryExpr::exists(field),
                _ => QueryExpr::term(field, value.clone()),
            }
        }
        Node::And(nodes) => {
            let mut b = BoolQuery::new();
            for n in nodes {
                b = match n {
                    Node::Not(inner) => b.must_not(node_expr(inner, default_field)),
                    other => b.must(node_expr(other, default_field)),
                };
            }
            if b.must.is_empty() {
                b = b.must(QueryExpr::All);
            }
            b.build()
        }
        Node::Or(nodes) => {
            let mut b = BoolQuery::new().minimum_should_match(1);
            for n in nodes {
                let expr = match n {
                    Node::Not(inner) => BoolQuery::new()
                        .must(QueryExpr::All)
                        .must_not(node_expr(inner, default_field))
                        .build(),
                    other => node_expr(other, default_field),
                };
                b = b.should(expr);
            }
            b.build()
        }
        Node::Not(inner) => BoolQuery::new()
            .must(QueryExpr::All)
            .must_not(node_expr(inner, default_field))
            .build(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    Open,
    Close,
    And,
    Or,
    Not,
    Required,
    Prohibited,
    /// `field:` directly followed by a phrase.
    Field(String),
    Word(String),
    Phrase(String),
}

fn lex(input: &str) -> Result<Vec<Lexeme>> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                out.push(Lexeme::Open);
            }
            ')' => {
                chars.next();
                out.push(Lexeme::Close);
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                phrase.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => phrase.push(other),
                    }
                }
                if !closed {
                    return Err(SuggestError::Parse(format!("unterminated phrase in '{input}'")));
                }
                out.push(Lexeme::Phrase(phrase));
            }
            '+' => {
                chars.next();
                out.push(Lexeme::Required);
            }
            '-' => {
                chars.next();
                out.push(Lexeme::Prohibited);
            }
            '!' => {
                chars.next();
                out.push(Lexeme::Not);
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    chars.next();
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    } else {
                        word.push(c);
                    }
                }
                let before_phrase = word.ends_with(':') && chars.peek() == Some(&'"');
                out.push(match word.as_str() {
                    "AND" | "&&" => Lexeme::And,
                    "OR" | "||" => Lexeme::Or,
                    "NOT" => Lexeme::Not,
                    w if before_phrase => Lexeme::Field(w[..w.len() - 1].to_string()),
                    w => Lexeme::Word(w.to_string()),
                });
            }
        }
    }
    Ok(out)
}

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn next(&mut self) -> Option<Lexeme> {
        let l = self.lexemes.get(self.pos).cloned();
        self.pos += 1;
        l
    }

    fn or_expr(&mut self) -> Result<Node> {
        let mut nodes = vec![self.and_expr()?];
        while self.peek() == Some(&Lexeme::Or) {
            self.next();
            nodes.push(self.and_expr()?);
        }
        Ok(if nodes.len() == 1 { nodes.remove(0) } else { Node::Or(nodes) })
    }

    fn and_expr(&mut self) -> Result<Node> {
        let mut nodes = vec![self.unary()?];
        loop {
            match self.peek() {
                Some(Lexeme::And) => {
                    self.next();
                    nodes.push(self.unary()?);
                }
                Some(Lexeme::Or) | Some(Lexeme::Close) | None => break,
                Some(_) => nodes.push(self.unary()?),
            }
        }
        Ok(if nodes.len() == 1 { nodes.remove(0) } else { Node::And(nodes) })
    }

    fn unary(&mut self) -> Result<Node> {
        match self.peek() {
            Some(Lexeme::Not) | Some(Lexeme::Prohibited) => {
                self.next();
                Ok(Node::Not(Box::new(self.primary()?)))
            }
            Some(Lexeme::Required) => {
                self.next();
                self.primary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node> {
        match self.next() {
            Some(Lexeme::Open) => {
                let node = self.or_expr()?;
                match self.next() {
                    Some(Lexeme::Close) => Ok(node),
                    _ => Err(SuggestError::Parse("missing ')'".into())),
                }
            }
            Some(Lexeme::Field(field)) => match self.next() {
                Some(Lexeme::Phrase(value)) => Ok(Node::Clause { field: Some(field), value }),
                _ => Err(SuggestError::Parse(format!("expected phrase after '{field}:'"))),
            },
            Some(Lexeme::Phrase(value)) => Ok(Node::Clause { field: None, value }),
            Some(Lexeme::Word(word)) => Ok(word_clause(word)),
            other => Err(SuggestError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

fn word_clause(word: String) -> Node {
    match word.split_once(':') {
        Some((field, value)) if !field.is_empty() && !value.is_empty() => {
            Node::Clause { field: Some(field.to_string()), value: value.to_string() }
        }
        _ => Node::Clause { field: None, value: word },
    }
}

/// Parse a query string. Blank input parses to an empty query.
pub fn parse(input: &str) -> Result<ParsedQuery> {
    let lexemes = lex(input)?;
    if lexemes.is_empty() {
        return Ok(ParsedQuery { root: None });
    }
    let mut parser = Parser { lexemes, pos: 0 };
    let root = parser.or_expr()?;
    if parser.pos < parser.lexemes.len() {
        return Err(SuggestError::Parse(format!("trailing input in '{input}'")));
    }
    Ok(ParsedQuery { root: Some(root) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_field_terms_and_skips_negations() {
        let q = parse("content:全文 AND content:検索 -content:広告 label:news").unwrap();
        assert_eq!(q.terms_for("content", None), vec!["全文", "検索"]);
        assert_eq!(q.terms_for("label", None), vec!["news"]);
        assert!(q.terms_for("title", None).is_empty());
    }

    #[test]
    fn phrases_and_default_field() {
        let q = parse(r#"title:"search engine" fulltext"#).unwrap();
        assert_eq!(q.terms_for("title", None), vec!["search", "engine"]);
        assert_eq!(q.terms_for("content", Some("content")), vec!["fulltext"]);
    }

    #[test]
    fn groups_and_or() {
        let q = parse("(a:x OR a:y) AND NOT b:z").unwrap();
        assert_eq!(
            q.root(),
            Some(&Node::And(vec![
                Node::Or(vec![
                    Node::Clause { field: Some("a".into()), value: "x".into() },
                    Node::Clause { field: Some("a".into()), value: "y".into() },
                ]),
                Node::Not(Box::new(Node::Clause { field: Some("b".into()), value: "z".into() })),
            ]))
        );
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(parse("(a:x").is_err());
        assert!(parse("a:\"open").is_err());
        assert!(parse("").unwrap().root().is_none());
    }
}
