//! Builds ranked search requests for suggest and popular-words queries.

use serde::{Deserialize, Serialize};

use suggest_core::analysis::Analyzer;
use suggest_core::config::RankingConfig;
use suggest_core::error::Result;
use suggest_core::query::{
    BoolQuery, BoostMode, FunctionScore, Modifier, QueryExpr, ScoreFunction, ScoreMode, SearchRequest,
};
use suggest_core::types::{keys, Kind, DEFAULT_ROLE};

const IDEOGRAPHIC_SPACE: char = '\u{3000}';
/// Score used for frequency fields absent from a record.
const MISSING_FREQ: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestRequest {
    pub query: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<Kind>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub size: usize,
    pub suggest_detail: bool,
    pub match_word_first: bool,
    pub skip_duplicate_words: bool,
    pub prefix_match_weight: f64,
}

impl SuggestRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self::from_config(query, &RankingConfig::default())
    }

    pub fn from_config(query: impl Into<String>, ranking: &RankingConfig) -> Self {
        Self {
            query: query.into(),
            tags: Vec::new(),
            roles: Vec::new(),
            fields: Vec::new(),
            kinds: Vec::new(),
            languages: Vec::new(),
            size: 10,
            suggest_detail: true,
            match_word_first: ranking.match_word_first,
            skip_duplicate_words: ranking.skip_duplicate_words,
            prefix_match_weight: ranking.prefix_match_weight,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, roles: I) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_languages<I: IntoIterator<Item = S>, S: Into<String>>(mut self, langs: I) -> Self {
        self.languages = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_detail(mut self, detail: bool) -> Self {
        self.suggest_detail = detail;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularWordsRequest {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    /// Texts never returned.
    #[serde(default)]
    pub excludes: Vec<String>,
    pub size: usize,
    pub suggest_detail: bool,
}

impl Default for PopularWordsRequest {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            roles: Vec::new(),
            fields: Vec::new(),
            languages: Vec::new(),
            excludes: Vec::new(),
            size: 10,
            suggest_detail: true,
        }
    }
}

/// Split on runs of ASCII or ideographic spaces. The flag reports whether
/// the input ended in a separator, which closes the last word.
pub fn split_query(query: &str) -> (Vec<String>, bool) {
    let is_sep = |c: char| c.is_ascii_whitespace() || c == IDEOGRAPHIC_SPACE;
    let words = query.split(is_sep).filter(|w| !w.is_empty()).map(str::to_string).collect();
    let trailing = query.ends_with(is_sep);
    (words, trailing)
}

/// True when every character is Hiragana (or the prolonged sound mark).
/// Such prefixes match too much to deserve the prefix boost.
pub fn is_hiragana_only(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| ('\u{3041}'..='\u{309F}').contains(&c) || c == 'ー')
}

/// Normalized query words and whether the last one is still being typed.
pub struct AnalyzedQuery {
    pub words: Vec<String>,
    pub readings: Vec<Vec<String>>,
    pub last_is_prefix: bool,
}

impl AnalyzedQuery {
    pub fn analyze(query: &str, analyzer: &Analyzer, field: &str, langs: &[String]) -> Result<Self> {
        let (raw, trailing) = split_query(query);
        let mut words = Vec::with_capacity(raw.len());
        let mut readings = Vec::with_capacity(raw.len());
        for word in raw {
            let word = analyzer.normalize(&word, field, langs);
            if word.trim().is_empty() {
                continue;
            }
            let mut list = analyzer.readings(&word, field, langs)?;
            if list.is_empty() {
                list.push(word.clone());
            }
            readings.push(list);
            words.push(word);
        }
        Ok(Self { words, readings, last_is_prefix: !trailing })
    }

    /// The words joined as stored items join them.
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// Analyze `request.query` the way suggest items were analyzed at ingestion.
pub fn analyze_request(request: &SuggestRequest, analyzer: &Analyzer) -> Result<AnalyzedQuery> {
    let field = request.fields.first().map(String::as_str).unwrap_or_default();
    AnalyzedQuery::analyze(&request.query, analyzer, field, &request.languages)
}

/// Every word must match one of its readings in the same position; only
/// the last word, while still being typed, matches as a prefix.
pub fn suggest_query(request: &SuggestRequest, analyzed: &AnalyzedQuery, bad_words: &[String]) -> SearchRequest {
    let mut query = BoolQuery::new();
    let last = analyzed.readings.len().saturating_sub(1);
    for (i, readings) in analyzed.readings.iter().enumerate() {
        let reading_field = keys::reading(i);
        let live_prefix = i == last && analyzed.last_is_prefix;
        let mut per_word = BoolQuery::new().minimum_should_match(1);
        for reading in readings {
            per_word = per_word.should(if live_prefix {
                QueryExpr::prefix(&reading_field, reading.clone())
            } else {
                QueryExpr::term(&reading_field, reading.clone())
            });
        }
        query = query.must(per_word.build());
    }
    if query.must.is_empty() {
        query = query.must(QueryExpr::All);
    }
    if !request.kinds.is_empty() {
        query = query.must(QueryExpr::terms(keys::KINDS, request.kinds.iter().map(Kind::as_str)));
    }
    query = restrict(query, &request.tags, &request.roles, &request.fields, &request.languages);
    query = exclude_bad_words(query, bad_words);

    let mut functions = frequency_functions();
    if let [word] = analyzed.words.as_slice() {
        if !is_hiragana_only(word) {
            let filter = if request.match_word_first {
                QueryExpr::prefix(keys::TEXT, word.clone())
            } else {
                QueryExpr::contains(keys::TEXT, word.clone())
            };
            functions.push(ScoreFunction::Weight { filter: Some(filter), weight: request.prefix_match_weight });
        }
    }

    let size = if request.skip_duplicate_words { request.size.saturating_mul(2) } else { request.size };
    SearchRequest::new(query.build())
        .with_function_score(FunctionScore {
            functions,
            score_mode: ScoreMode::Multiply,
            boost_mode: BoostMode::Replace,
        })
        .with_page(0, size)
}

/// QUERY items seen at least `threshold` times, ranked by query frequency
/// and boost.
pub fn popular_words_query(request: &PopularWordsRequest, threshold: u64, bad_words: &[String]) -> SearchRequest {
    let mut query = BoolQuery::new()
        .must(QueryExpr::term(keys::KINDS, Kind::Query.as_str()))
        .must(QueryExpr::gte(keys::QUERY_FREQ, threshold as f64));
    for word in &request.excludes {
        query = query.must_not(QueryExpr::term(keys::TEXT, word.clone()));
    }
    query = restrict(query, &request.tags, &request.roles, &request.fields, &request.languages);
    query = exclude_bad_words(query, bad_words);

    SearchRequest::new(query.build())
        .with_function_score(FunctionScore {
            functions: vec![
                ScoreFunction::field_value_factor(keys::QUERY_FREQ, Modifier::Log2p, MISSING_FREQ),
                ScoreFunction::field_value_factor(keys::USER_BOOST, Modifier::None, 1.0),
            ],
            score_mode: ScoreMode::Multiply,
            boost_mode: BoostMode::Replace,
        })
        .with_page(0, request.size)
}

fn frequency_functions() -> Vec<ScoreFunction> {
    vec![
        ScoreFunction::field_value_factor(keys::DOC_FREQ, Modifier::Log2p, MISSING_FREQ),
        ScoreFunction::field_value_factor(keys::QUERY_FREQ, Modifier::Log2p, MISSING_FREQ),
        ScoreFunction::field_value_factor(keys::USER_BOOST, Modifier::None, 1.0),
    ]
}

/// Tag, role, field and language restrictions. The default role is always
/// allowed so role-less items stay visible.
fn restrict(
    mut query: BoolQuery,
    tags: &[String],
    roles: &[String],
    fields: &[String],
    languages: &[String],
) -> BoolQuery {
    if !tags.is_empty() {
        query = query.must(QueryExpr::terms(keys::TAGS, tags.iter().cloned()));
    }
    let mut allowed: Vec<String> = roles.to_vec();
    if !allowed.iter().any(|r| r == DEFAULT_ROLE) {
        allowed.push(DEFAULT_ROLE.to_string());
    }
    query = query.must(QueryExpr::terms(keys::ROLES, allowed));
    if !fields.is_empty() {
        query = query.must(QueryExpr::terms(keys::FIELDS, fields.iter().cloned()));
    }
    if !languages.is_empty() {
        let untagged = BoolQuery::new().must(QueryExpr::All).must_not(QueryExpr::exists(keys::LANGUAGES)).build();
        query = query.must(
            BoolQuery::new()
                .should(QueryExpr::terms(keys::LANGUAGES, languages.iter().cloned()))
                .should(untagged)
                .minimum_should_match(1)
                .build(),
        );
    }
    query
}

fn exclude_bad_words(mut query: BoolQuery, bad_words: &[String]) -> BoolQuery {
    for word in bad_words.iter().filter(|w| !w.is_empty()) {
        query = query.must_not(QueryExpr::contains(keys::TEXT, word.clone()));
    }
    query
}
