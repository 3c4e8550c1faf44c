//! Turns documents, logged queries and literal phrases into suggest items.
//!
//! Absent or blank input is never an error: it yields no items.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use suggest_core::analysis::Analyzer;
use suggest_core::config::{DocumentFields, QueryLogFields};
use suggest_core::error::Result;
use suggest_core::query_string;
use suggest_core::types::{string_list, Kind, Record, SuggestItem};

/// One logged search: the query string and an optional filter query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryLog {
    pub q: String,
    #[serde(default)]
    pub fq: Option<String>,
}

impl QueryLog {
    pub fn new(q: impl Into<String>) -> Self {
        Self { q: q.into(), fq: None }
    }

    pub fn with_filter(mut self, fq: impl Into<String>) -> Self {
        self.fq = Some(fq.into());
        self
    }
}

#[derive(Clone)]
pub struct ContentsParser {
    analyzer: Arc<Analyzer>,
}

struct WordEntry {
    readings: Vec<String>,
    fields: Vec<String>,
}

impl ContentsParser {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// One single-word DOCUMENT item per distinct word in the supported
    /// fields. A word seen in several fields of the same document counts
    /// once toward `docFreq` and records every field.
    pub fn parse_document(&self, doc: &Record, family: &DocumentFields) -> Result<Vec<SuggestItem>> {
        let tags = harvest(doc, &family.tag_fields);
        let roles = family.role_field.as_ref().map(|f| harvest(doc, std::slice::from_ref(f))).unwrap_or_default();
        let langs = family.lang_field.as_ref().map(|f| harvest(doc, std::slice::from_ref(f))).unwrap_or_default();

        let mut words: BTreeMap<String, WordEntry> = BTreeMap::new();
        for field in &family.fields {
            let Some(text) = doc.get(field).map(field_text).filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            for token in self.analyzer.tokenize(&text, field, langs.first().map(String::as_str))? {
                let word = self.analyzer.normalize(&token.term, field, &langs);
                if word.trim().is_empty() || word.contains(char::is_whitespace) {
                    continue;
                }
                let mut readings = Vec::new();
                if let Some(reading) = token.reading {
                    readings.push(self.analyzer.normalize(&reading, field, &langs));
                }
                readings.extend(self.analyzer.readings(&word, field, &langs)?);
                let entry = words.entry(word).or_insert_with(|| WordEntry { readings: Vec::new(), fields: Vec::new() });
                for reading in readings {
                    if !entry.readings.contains(&reading) {
                        entry.readings.push(reading);
                    }
                }
                if !entry.fields.contains(field) {
                    entry.fields.push(field.clone());
                }
            }
        }

        Ok(words
            .into_iter()
            .map(|(word, entry)| {
                SuggestItem::new(&[word], vec![entry.readings], Kind::Document)
                    .with_fields(entry.fields)
                    .with_doc_freq(1)
                    .with_tags(tags.clone())
                    .with_roles(roles.clone())
                    .with_languages(langs.clone())
            })
            .collect())
    }

    /// One multi-word QUERY item per supported field the query names.
    /// Tags and roles come from both the query and its filter.
    pub fn parse_query_log(&self, entry: &QueryLog, family: &QueryLogFields) -> Result<Vec<SuggestItem>> {
        if entry.q.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = query_string::parse(&entry.q)?;
        let filter = match entry.fq.as_deref().filter(|f| !f.trim().is_empty()) {
            Some(fq) => Some(query_string::parse(fq)?),
            None => None,
        };
        let from_both = |field: &str| {
            let mut values = query.terms_for(field, None);
            if let Some(filter) = &filter {
                values.extend(filter.terms_for(field, None));
            }
            values
        };
        let tags: Vec<String> = family.tag_fields.iter().flat_map(|f| from_both(f)).collect();
        let roles: Vec<String> = family.role_field.as_deref().map(from_both).unwrap_or_default();

        let mut items = Vec::new();
        for field in &family.fields {
            let terms = query.terms_for(field, None);
            if terms.is_empty() {
                continue;
            }
            let mut words = Vec::with_capacity(terms.len());
            let mut readings = Vec::with_capacity(terms.len());
            for term in terms {
                let word = self.analyzer.normalize(&term, field, &[]);
                if word.trim().is_empty() {
                    continue;
                }
                readings.push(self.analyzer.readings(&word, field, &[])?);
                words.push(word);
            }
            if words.is_empty() {
                continue;
            }
            items.push(
                SuggestItem::new(&words, readings, Kind::Query)
                    .with_fields([field.clone()])
                    .with_query_freq(1)
                    .with_tags(tags.clone())
                    .with_roles(roles.clone()),
            );
        }
        Ok(items)
    }

    /// A USER item built from already split words. Supplied readings win
    /// over converted ones position by position. `None` when every word is
    /// blank.
    #[allow(clippy::too_many_arguments)]
    pub fn parse_search_words(
        &self,
        words: &[String],
        readings: Option<&[Vec<String>]>,
        fields: &[String],
        tags: &[String],
        roles: &[String],
        weight: f32,
        langs: &[String],
    ) -> Result<Option<SuggestItem>> {
        let field = fields.first().map(String::as_str).unwrap_or_default();
        let mut kept_words = Vec::new();
        let mut kept_readings = Vec::new();
        for (i, raw) in words.iter().enumerate() {
            let word = self.analyzer.normalize(raw, field, langs);
            if word.trim().is_empty() {
                continue;
            }
            let supplied = readings.and_then(|r| r.get(i)).filter(|r| !r.is_empty());
            let word_readings = match supplied {
                Some(list) => {
                    let mut list: Vec<String> = list.iter().map(|r| self.analyzer.normalize(r, field, langs)).collect();
                    if !list.contains(&word) {
                        list.insert(0, word.clone());
                    }
                    list
                }
                None => self.analyzer.readings(&word, field, langs)?,
            };
            kept_readings.push(word_readings);
            kept_words.push(word);
        }
        if kept_words.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            SuggestItem::new(&kept_words, kept_readings, Kind::User)
                .with_fields(fields.iter().cloned())
                .with_query_freq(1)
                .with_user_boost(weight)
                .with_tags(tags.iter().cloned())
                .with_roles(roles.iter().cloned())
                .with_languages(langs.iter().cloned()),
        ))
    }
}

fn field_text(value: &serde_json::Value) -> String {
    string_list(value).join(" ")
}

fn harvest(doc: &Record, fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .filter_map(|f| doc.get(f))
        .flat_map(string_list)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
