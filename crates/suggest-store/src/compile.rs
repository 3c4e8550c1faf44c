//! Lowers `QueryExpr` onto the packed `terms` field.
//!
//! The compiled query selects a superset of the matching records; callers
//! post-filter with `QueryExpr::matches`. Clauses tantivy cannot express
//! over the packed field (numeric ranges) widen to "field exists", and a
//! widened clause is never used under `must_not`.

use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, RegexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::Term;

use suggest_core::error::{Result, SuggestError};
use suggest_core::query::QueryExpr;

use crate::schema::packed_term;

pub struct Compiled {
    pub query: Box<dyn Query>,
    /// True when the query selects exactly the matching records.
    pub exact: bool,
}

impl Compiled {
    fn exact(query: Box<dyn Query>) -> Self {
        Self { query, exact: true }
    }
}

pub fn compile(expr: &QueryExpr, terms: Field) -> Result<Compiled> {
    Ok(match expr {
        QueryExpr::All => Compiled::exact(Box::new(AllQuery)),
        QueryExpr::Term { field, value } => Compiled::exact(term_query(terms, field, value)),
        QueryExpr::Terms { field, values } => {
            if values.is_empty() {
                Compiled::exact(Box::new(EmptyQuery))
            } else {
                let clauses = values
                    .iter()
                    .map(|v| (Occur::Should, term_query(terms, field, v)))
                    .collect();
                Compiled::exact(Box::new(BooleanQuery::new(clauses)))
            }
        }
        QueryExpr::Prefix { field, value } => {
            let pattern = format!("{}.*", escape(&packed_term(field, value)));
            Compiled::exact(regex_query(&pattern, terms)?)
        }
        QueryExpr::Contains { field, value } => {
            let pattern = format!("{}.*{}.*", escape(&packed_term(field, "")), escape(value));
            Compiled::exact(regex_query(&pattern, terms)?)
        }
        QueryExpr::Exists { field } => {
            let pattern = format!("{}.*", escape(&packed_term(field, "")));
            Compiled::exact(regex_query(&pattern, terms)?)
        }
        QueryExpr::Range { field, .. } => {
            let pattern = format!("{}.*", escape(&packed_term(field, "")));
            Compiled { query: regex_query(&pattern, terms)?, exact: false }
        }
        QueryExpr::Bool(b) => {
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            let mut exact = true;
            for q in &b.must {
                let c = compile(q, terms)?;
                exact &= c.exact;
                clauses.push((Occur::Must, c.query));
            }
            let required = b
                .minimum_should_match
                .unwrap_or(if b.must.is_empty() { 1 } else { 0 });
            if required > 0 {
                if b.should.is_empty() {
                    return Ok(Compiled::exact(Box::new(EmptyQuery)));
                }
                let mut any = Vec::with_capacity(b.should.len());
                for q in &b.should {
                    let c = compile(q, terms)?;
                    exact &= c.exact;
                    any.push((Occur::Should, c.query));
                }
                exact &= required == 1;
                clauses.push((Occur::Must, Box::new(BooleanQuery::new(any))));
            }
            let positive = !clauses.is_empty();
            for q in &b.must_not {
                let c = compile(q, terms)?;
                if c.exact {
                    clauses.push((Occur::MustNot, c.query));
                } else {
                    exact = false;
                }
            }
            if !positive {
                clauses.push((Occur::Must, Box::new(AllQuery)));
            }
            Compiled { query: Box::new(BooleanQuery::new(clauses)), exact }
        }
    })
}

fn term_query(terms: Field, field: &str, value: &str) -> Box<dyn Query> {
    let term = Term::from_field_text(terms, &packed_term(field, value));
    Box::new(TermQuery::new(term, IndexRecordOption::Basic))
}

fn regex_query(pattern: &str, terms: Field) -> Result<Box<dyn Query>> {
    let query = RegexQuery::from_pattern(pattern, terms)
        .map_err(|e| SuggestError::Backend(format!("invalid pattern '{pattern}': {e}")))?;
    Ok(Box::new(query))
}

/// Escape regex metacharacters so `text` matches literally.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggest_core::query::BoolQuery;

    fn terms_field() -> Field {
        crate::schema::fields_of(&crate::schema::build_schema()).unwrap().terms
    }

    #[test]
    fn escapes_metacharacters() {
        assert_eq!(escape("a.b*c"), r"a\.b\*c");
        assert_eq!(escape("検索"), "検索");
    }

    #[test]
    fn widened_clauses_stay_out_of_must_not() {
        let q = BoolQuery::new().must_not(QueryExpr::lt("timestamp", 5.0)).build();
        let compiled = compile(&q, terms_field()).unwrap();
        assert!(!compiled.exact);
        let q = BoolQuery::new().must(QueryExpr::term("kinds", "query")).build();
        assert!(compile(&q, terms_field()).unwrap().exact);
    }
}
