//! Suggest item model: identity, merge rules, and the flat record form stored
//! by backends.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SuggestError};

/// Flat key-value representation handed to storage backends.
pub type Record = serde_json::Map<String, Value>;

/// Role attached to items registered without any role, and implicitly added
/// to every role filter at query time.
pub const DEFAULT_ROLE: &str = "_default";

/// Record keys.
pub mod keys {
    pub const ID: &str = "id";
    pub const TEXT: &str = "text";
    pub const READING_PREFIX: &str = "reading_";
    pub const FIELDS: &str = "fields";
    pub const DOC_FREQ: &str = "docFreq";
    pub const QUERY_FREQ: &str = "queryFreq";
    pub const USER_BOOST: &str = "userBoost";
    pub const KINDS: &str = "kinds";
    pub const TAGS: &str = "tags";
    pub const ROLES: &str = "roles";
    pub const LANGUAGES: &str = "lang";
    pub const SCORE: &str = "score";
    pub const TIMESTAMP: &str = "timestamp";

    pub fn reading(index: usize) -> String {
        format!("{READING_PREFIX}{index}")
    }
}

/// Provenance of a suggest item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Document,
    Query,
    User,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Document => "document",
            Kind::Query => "query",
            Kind::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Kind> {
        match s.to_ascii_lowercase().as_str() {
            "document" => Some(Kind::Document),
            "query" => Some(Kind::Query),
            "user" => Some(Kind::User),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic digest of a suggestion text. Word order is part of the text,
/// so "a b" and "b a" never collide.
pub fn item_id(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Clamp a user boost so it never drops below 1.0 and stays finite.
pub fn clamp_boost(boost: f32) -> f32 {
    if boost.is_nan() || boost < 1.0 {
        1.0
    } else if boost.is_infinite() {
        f32::MAX
    } else {
        boost
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A scored, de-duplicated autocomplete candidate.
///
/// `id` is always derived from `text`; the constructors and `parse_record`
/// recompute it so the two cannot drift apart. `readings` holds one list of
/// variants per constituent word.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestItem {
    id: String,
    text: String,
    readings: Vec<Vec<String>>,
    fields: BTreeSet<String>,
    doc_freq: u64,
    query_freq: u64,
    user_boost: f32,
    tags: BTreeSet<String>,
    roles: BTreeSet<String>,
    languages: BTreeSet<String>,
    kinds: BTreeSet<Kind>,
    timestamp: i64,
}

impl SuggestItem {
    /// Build an item from its constituent words. `readings` is padded or
    /// truncated to the number of words.
    pub fn new<S: AsRef<str>>(words: &[S], mut readings: Vec<Vec<String>>, kind: Kind) -> Self {
        let text = words.iter().map(|w| w.as_ref()).collect::<Vec<_>>().join(" ");
        readings.resize(words.len(), Vec::new());
        for list in &mut readings {
            dedup_in_order(list);
        }
        Self {
            id: item_id(&text),
            text,
            readings,
            fields: BTreeSet::new(),
            doc_freq: 0,
            query_freq: 0,
            user_boost: 1.0,
            tags: BTreeSet::new(),
            roles: BTreeSet::from([DEFAULT_ROLE.to_string()]),
            languages: BTreeSet::new(),
            kinds: BTreeSet::from([kind]),
            timestamp: now_millis(),
        }
    }

    pub fn with_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.fields = collect_set(fields);
        self
    }

    pub fn with_doc_freq(mut self, freq: u64) -> Self {
        self.doc_freq = freq;
        self
    }

    pub fn with_query_freq(mut self, freq: u64) -> Self {
        self.query_freq = freq;
        self
    }

    pub fn with_user_boost(mut self, boost: f32) -> Self {
        self.user_boost = clamp_boost(boost);
        self
    }

    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = collect_set(tags);
        self
    }

    /// Replace the roles. An empty role list keeps the default role so the
    /// item stays visible to everyone.
    pub fn with_roles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, roles: I) -> Self {
        let roles = collect_set(roles);
        if !roles.is_empty() {
            self.roles = roles;
        }
        self
    }

    pub fn with_languages<I: IntoIterator<Item = S>, S: Into<String>>(mut self, langs: I) -> Self {
        self.languages = collect_set(langs);
        self
    }

    pub fn with_kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn words(&self) -> Vec<&str> {
        self.text.split(' ').collect()
    }

    pub fn readings(&self) -> &[Vec<String>] {
        &self.readings
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn doc_freq(&self) -> u64 {
        self.doc_freq
    }

    pub fn query_freq(&self) -> u64 {
        self.query_freq
    }

    pub fn user_boost(&self) -> f32 {
        self.user_boost
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.iter().map(String::as_str)
    }

    pub fn kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn has_kind(&self, kind: Kind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// `(docFreq + queryFreq) * userBoost`
    pub fn score(&self) -> f64 {
        (self.doc_freq.saturating_add(self.query_freq)) as f64 * f64::from(self.user_boost)
    }

    /// Drop one provenance kind, zeroing the counter that belongs to it.
    /// Returns false when nothing would remain, in which case the caller
    /// should delete the item instead.
    pub fn demote(&mut self, kind: Kind) -> bool {
        self.kinds.remove(&kind);
        match kind {
            Kind::Document => self.doc_freq = 0,
            Kind::Query => self.query_freq = 0,
            Kind::User => self.user_boost = 1.0,
        }
        !self.kinds.is_empty()
    }

    /// True when `text` contains any of the candidates as a substring.
    pub fn is_bad_word<S: AsRef<str>>(&self, bad_words: &[S]) -> bool {
        bad_words
            .iter()
            .map(AsRef::as_ref)
            .any(|w| !w.is_empty() && self.text.contains(w))
    }

    /// Fold `other` into `self`. Frequencies add up, the boost and timestamp
    /// take `other`'s value, and every set-valued field is unioned.
    pub fn merge_from(&mut self, other: &SuggestItem) -> Result<()> {
        if self.id != other.id {
            return Err(SuggestError::IdentityMismatch {
                left: self.id.clone(),
                right: other.id.clone(),
            });
        }
        self.doc_freq = self.doc_freq.saturating_add(other.doc_freq);
        self.query_freq = self.query_freq.saturating_add(other.query_freq);
        self.user_boost = other.user_boost;
        self.timestamp = other.timestamp;
        if self.readings.len() < other.readings.len() {
            self.readings.resize(other.readings.len(), Vec::new());
        }
        for (mine, theirs) in self.readings.iter_mut().zip(&other.readings) {
            for reading in theirs {
                if !mine.contains(reading) {
                    mine.push(reading.clone());
                }
            }
        }
        self.fields.extend(other.fields.iter().cloned());
        self.tags.extend(other.tags.iter().cloned());
        self.roles.extend(other.roles.iter().cloned());
        self.languages.extend(other.languages.iter().cloned());
        self.kinds.extend(other.kinds.iter().copied());
        Ok(())
    }

    /// Record to store for this item given what is stored under its id now.
    /// An unreadable stored record is overwritten.
    pub fn merged_onto(&self, stored: Option<&Record>) -> Result<Record> {
        let Some(stored) = stored else {
            return Ok(self.to_record());
        };
        match Self::parse_record(stored) {
            Ok(mut existing) => {
                existing.merge_from(self)?;
                Ok(existing.to_record())
            }
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "stored item unreadable, overwriting");
                Ok(self.to_record())
            }
        }
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(keys::ID.into(), Value::from(self.id.clone()));
        record.insert(keys::TEXT.into(), Value::from(self.text.clone()));
        for (i, readings) in self.readings.iter().enumerate() {
            record.insert(keys::reading(i), Value::from(readings.clone()));
        }
        record.insert(keys::FIELDS.into(), set_value(&self.fields));
        record.insert(keys::DOC_FREQ.into(), Value::from(self.doc_freq));
        record.insert(keys::QUERY_FREQ.into(), Value::from(self.query_freq));
        record.insert(keys::USER_BOOST.into(), Value::from(f64::from(self.user_boost)));
        record.insert(keys::SCORE.into(), Value::from(self.score()));
        record.insert(keys::TAGS.into(), set_value(&self.tags));
        record.insert(keys::ROLES.into(), set_value(&self.roles));
        record.insert(keys::LANGUAGES.into(), set_value(&self.languages));
        record.insert(
            keys::KINDS.into(),
            Value::from(self.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>()),
        );
        record.insert(keys::TIMESTAMP.into(), Value::from(self.timestamp));
        record
    }

    pub fn parse_record(record: &Record) -> Result<Self> {
        let text = record
            .get(keys::TEXT)
            .and_then(Value::as_str)
            .ok_or_else(|| SuggestError::Parse(format!("record without '{}'", keys::TEXT)))?
            .to_string();

        let mut positions: Vec<(usize, Vec<String>)> = Vec::new();
        for (key, value) in record {
            if let Some(pos) = key.strip_prefix(keys::READING_PREFIX) {
                let pos: usize = pos
                    .parse()
                    .map_err(|_| SuggestError::Parse(format!("bad reading key '{key}'")))?;
                positions.push((pos, string_list(value)));
            }
        }
        let width = positions.iter().map(|(p, _)| p + 1).max().unwrap_or(0);
        let mut readings = vec![Vec::new(); width];
        for (pos, list) in positions {
            readings[pos] = list;
        }

        let mut kinds = BTreeSet::new();
        for kind in record.get(keys::KINDS).map(string_list).unwrap_or_default() {
            let parsed = Kind::parse(&kind)
                .ok_or_else(|| SuggestError::Parse(format!("unknown kind '{kind}'")))?;
            kinds.insert(parsed);
        }

        let roles: BTreeSet<String> = collect_set(record.get(keys::ROLES).map(string_list).unwrap_or_default());
        Ok(Self {
            id: item_id(&text),
            text,
            readings,
            fields: collect_set(record.get(keys::FIELDS).map(string_list).unwrap_or_default()),
            doc_freq: record.get(keys::DOC_FREQ).map(as_u64).unwrap_or(0),
            query_freq: record.get(keys::QUERY_FREQ).map(as_u64).unwrap_or(0),
            user_boost: clamp_boost(
                record.get(keys::USER_BOOST).and_then(Value::as_f64).unwrap_or(1.0) as f32,
            ),
            tags: collect_set(record.get(keys::TAGS).map(string_list).unwrap_or_default()),
            roles: if roles.is_empty() { BTreeSet::from([DEFAULT_ROLE.to_string()]) } else { roles },
            languages: collect_set(record.get(keys::LANGUAGES).map(string_list).unwrap_or_default()),
            kinds,
            timestamp: record.get(keys::TIMESTAMP).and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

/// Merge two items sharing one id into a new item.
pub fn merge(a: &SuggestItem, b: &SuggestItem) -> Result<SuggestItem> {
    let mut merged = a.clone();
    merged.merge_from(b)?;
    Ok(merged)
}

/// Accepts a string, an array of strings, or anything else stringified.
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(values) => values.iter().flat_map(string_list).collect(),
        other => vec![other.to_string()],
    }
}

fn as_u64(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
        .unwrap_or(0)
}

fn set_value(set: &BTreeSet<String>) -> Value {
    Value::from(set.iter().cloned().collect::<Vec<_>>())
}

fn collect_set<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> BTreeSet<String> {
    values
        .into_iter()
        .map(Into::into)
        .filter(|s| !s.trim().is_empty())
        .collect()
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    list.retain(|r| !r.is_empty() && seen.insert(r.clone()));
}
