//! Backend-neutral query AST, function scoring, and the reference evaluator
//! both storage backends share.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{string_list, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryExpr {
    All,
    Term { field: String, value: String },
    Terms { field: String, values: Vec<String> },
    Prefix { field: String, value: String },
    /// Substring match, the `*value*` wildcard.
    Contains { field: String, value: String },
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
    },
    Exists { field: String },
    Bool(BoolQuery),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoolQuery {
    pub must: Vec<QueryExpr>,
    pub should: Vec<QueryExpr>,
    pub must_not: Vec<QueryExpr>,
    /// Defaults to 1 when the query has no `must` clause, 0 otherwise.
    pub minimum_should_match: Option<usize>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, q: QueryExpr) -> Self {
        self.must.push(q);
        self
    }

    pub fn should(mut self, q: QueryExpr) -> Self {
        self.should.push(q);
        self
    }

    pub fn must_not(mut self, q: QueryExpr) -> Self {
        self.must_not.push(q);
        self
    }

    pub fn minimum_should_match(mut self, n: usize) -> Self {
        self.minimum_should_match = Some(n);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    pub fn build(self) -> QueryExpr {
        QueryExpr::Bool(self)
    }

    fn required_should(&self) -> usize {
        self.minimum_should_match
            .unwrap_or(if self.must.is_empty() { 1 } else { 0 })
    }
}

impl QueryExpr {
    pub fn term(field: &str, value: impl Into<String>) -> Self {
        QueryExpr::Term { field: field.to_string(), value: value.into() }
    }

    pub fn terms<I: IntoIterator<Item = S>, S: Into<String>>(field: &str, values: I) -> Self {
        QueryExpr::Terms {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefix(field: &str, value: impl Into<String>) -> Self {
        QueryExpr::Prefix { field: field.to_string(), value: value.into() }
    }

    pub fn contains(field: &str, value: impl Into<String>) -> Self {
        QueryExpr::Contains { field: field.to_string(), value: value.into() }
    }

    pub fn exists(field: &str) -> Self {
        QueryExpr::Exists { field: field.to_string() }
    }

    pub fn lt(field: &str, bound: f64) -> Self {
        QueryExpr::Range { field: field.to_string(), gte: None, gt: None, lte: None, lt: Some(bound) }
    }

    pub fn gte(field: &str, bound: f64) -> Self {
        QueryExpr::Range { field: field.to_string(), gte: Some(bound), gt: None, lte: None, lt: None }
    }

    /// Evaluate this query against a stored record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            QueryExpr::All => true,
            QueryExpr::Term { field, value } => strings(record, field).any(|s| &s == value),
            QueryExpr::Terms { field, values } => strings(record, field).any(|s| values.contains(&s)),
            QueryExpr::Prefix { field, value } => strings(record, field).any(|s| s.starts_with(value.as_str())),
            QueryExpr::Contains { field, value } => strings(record, field).any(|s| s.contains(value.as_str())),
            QueryExpr::Range { field, gte, gt, lte, lt } => numbers(record, field).any(|n| {
                gte.map_or(true, |b| n >= b)
                    && gt.map_or(true, |b| n > b)
                    && lte.map_or(true, |b| n <= b)
                    && lt.map_or(true, |b| n < b)
            }),
            QueryExpr::Exists { field } => strings(record, field).next().is_some(),
            QueryExpr::Bool(b) => {
                b.must.iter().all(|q| q.matches(record))
                    && !b.must_not.iter().any(|q| q.matches(record))
                    && b.should.iter().filter(|q| q.matches(record)).count() >= b.required_should()
            }
        }
    }
}

fn strings(record: &Record, field: &str) -> impl Iterator<Item = String> {
    record.get(field).map(string_list).unwrap_or_default().into_iter()
}

fn numbers(record: &Record, field: &str) -> impl Iterator<Item = f64> {
    let values: Vec<f64> = match record.get(field) {
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_f64).collect(),
        Some(value) => value.as_f64().into_iter().collect(),
        None => Vec::new(),
    };
    values.into_iter()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    None,
    /// `log10(1 + v)`
    Log1p,
    /// `log10(2 + v)`
    Log2p,
    /// `ln(2 + v)`
    Ln2p,
}

impl Modifier {
    fn apply(self, v: f64) -> f64 {
        match self {
            Modifier::None => v,
            Modifier::Log1p => (1.0 + v).log10(),
            Modifier::Log2p => (2.0 + v).log10(),
            Modifier::Ln2p => (2.0 + v).ln(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreFunction {
    FieldValueFactor { field: String, factor: f64, modifier: Modifier, missing: f64 },
    /// Constant weight applied only to records matching `filter`.
    Weight { filter: Option<QueryExpr>, weight: f64 },
}

impl ScoreFunction {
    pub fn field_value_factor(field: &str, modifier: Modifier, missing: f64) -> Self {
        ScoreFunction::FieldValueFactor { field: field.to_string(), factor: 1.0, modifier, missing }
    }

    /// `None` when the function does not apply to this record.
    fn evaluate(&self, record: &Record) -> Option<f64> {
        match self {
            ScoreFunction::FieldValueFactor { field, factor, modifier, missing } => {
                let raw = numbers(record, field).next().unwrap_or(*missing);
                Some(modifier.apply(raw * factor))
            }
            ScoreFunction::Weight { filter, weight } => match filter {
                Some(f) if !f.matches(record) => None,
                _ => Some(*weight),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    Multiply,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostMode {
    /// Discard the base relevance, keep the function score.
    Replace,
    Multiply,
    Sum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionScore {
    pub functions: Vec<ScoreFunction>,
    pub score_mode: ScoreMode,
    pub boost_mode: BoostMode,
}

impl FunctionScore {
    pub fn apply(&self, record: &Record, base: f64) -> f64 {
        let applied: Vec<f64> = self.functions.iter().filter_map(|f| f.evaluate(record)).collect();
        let combined = if applied.is_empty() {
            1.0
        } else {
            match self.score_mode {
                ScoreMode::Multiply => applied.iter().product(),
                ScoreMode::Sum => applied.iter().sum(),
            }
        };
        match self.boost_mode {
            BoostMode::Replace => combined,
            BoostMode::Multiply => base * combined,
            BoostMode::Sum => base + combined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    Score,
    /// Numeric field, highest first.
    FieldDesc(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: QueryExpr,
    pub function_score: Option<FunctionScore>,
    pub sort: Sort,
    pub from: usize,
    pub size: usize,
}

impl SearchRequest {
    pub fn new(query: QueryExpr) -> Self {
        Self { query, function_score: None, sort: Sort::Score, from: 0, size: 10 }
    }

    pub fn with_function_score(mut self, fs: FunctionScore) -> Self {
        self.function_score = Some(fs);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub score: f64,
    pub source: Record,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    /// Matches before paging.
    pub total: u64,
    pub hits: Vec<Hit>,
}

/// Filter, score, sort, and page candidate records. Base relevance of a
/// filter match is a constant 1.0.
pub fn execute<I>(candidates: I, request: &SearchRequest) -> SearchHits
where
    I: IntoIterator<Item = (String, Record)>,
{
    let mut hits: Vec<Hit> = candidates
        .into_iter()
        .filter(|(_, record)| request.query.matches(record))
        .map(|(id, source)| {
            let score = match &request.function_score {
                Some(fs) => fs.apply(&source, 1.0),
                None => 1.0,
            };
            Hit { id, score, source }
        })
        .collect();

    match &request.sort {
        Sort::Score => hits.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        }),
        Sort::FieldDesc(field) => hits.sort_by(|a, b| {
            let fa = numbers(&a.source, field).next().unwrap_or(0.0);
            let fb = numbers(&b.source, field).next().unwrap_or(0.0);
            fb.partial_cmp(&fa).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        }),
    }

    let total = hits.len() as u64;
    let hits = hits.into_iter().skip(request.from).take(request.size).collect();
    SearchHits { total, hits }
}
