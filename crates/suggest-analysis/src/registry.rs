//! String-tag registry for analysis strategies.
//!
//! Configuration names strategies by tag (`{ kind = "romaji" }`); the
//! registry maps each tag to a factory. Built-ins are registered by
//! `with_defaults`, callers may add their own before building.

use std::collections::HashMap;
use std::sync::Arc;

use suggest_core::analysis::{Analyzer, NormalizerChain, ReadingConverterChain};
use suggest_core::config::{expand_path, AnalysisConfig, StrategySpec};
use suggest_core::error::{Result, SuggestError};
use suggest_core::traits::{Normalizer, ReadingConverter, Tokenizer};

use crate::normalize::{LowerCaseNormalizer, NfkcNormalizer, TrimNormalizer};
use crate::reading::{
    DictionaryReadingConverter, HiraganaReadingConverter, KatakanaReadingConverter,
    RomajiReadingConverter,
};
use crate::tokenize::{FieldTokenizer, HfWordTokenizer, ScriptTokenizer, WhitespaceTokenizer};

pub type TokenizerFactory = Arc<dyn Fn(&StrategySpec) -> Result<Arc<dyn Tokenizer>> + Send + Sync>;
pub type NormalizerFactory = Arc<dyn Fn(&StrategySpec) -> Result<Arc<dyn Normalizer>> + Send + Sync>;
pub type ReadingFactory = Arc<dyn Fn(&StrategySpec) -> Result<Arc<dyn ReadingConverter>> + Send + Sync>;

/// Prefix of `field_tokenizers` keys that route by language instead of field.
pub const LANG_ROUTE_PREFIX: &str = "lang:";

#[derive(Default, Clone)]
pub struct StrategyRegistry {
    tokenizers: HashMap<String, TokenizerFactory>,
    normalizers: HashMap<String, NormalizerFactory>,
    readings: HashMap<String, ReadingFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_tokenizer("whitespace", |_| Ok(Arc::new(WhitespaceTokenizer)));
        registry.register_tokenizer("script", |_| Ok(Arc::new(ScriptTokenizer)));
        registry.register_tokenizer("huggingface", |spec| {
            let path = required_path(spec)?;
            Ok(Arc::new(HfWordTokenizer::from_file(&expand_path(path))?))
        });

        registry.register_normalizer("nfkc", |_| Ok(Arc::new(NfkcNormalizer)));
        registry.register_normalizer("lowercase", |_| Ok(Arc::new(LowerCaseNormalizer)));
        registry.register_normalizer("trim", |_| Ok(Arc::new(TrimNormalizer)));

        registry.register_reading("katakana", |_| Ok(Arc::new(KatakanaReadingConverter)));
        registry.register_reading("hiragana", |_| Ok(Arc::new(HiraganaReadingConverter)));
        registry.register_reading("romaji", |_| Ok(Arc::new(RomajiReadingConverter)));
        registry.register_reading("dictionary", |spec| {
            let path = required_path(spec)?;
            Ok(Arc::new(DictionaryReadingConverter::from_path(&expand_path(path))?))
        });
        registry
    }

    pub fn register_tokenizer<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&StrategySpec) -> Result<Arc<dyn Tokenizer>> + Send + Sync + 'static,
    {
        self.tokenizers.insert(tag.to_string(), Arc::new(factory));
    }

    pub fn register_normalizer<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&StrategySpec) -> Result<Arc<dyn Normalizer>> + Send + Sync + 'static,
    {
        self.normalizers.insert(tag.to_string(), Arc::new(factory));
    }

    pub fn register_reading<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&StrategySpec) -> Result<Arc<dyn ReadingConverter>> + Send + Sync + 'static,
    {
        self.readings.insert(tag.to_string(), Arc::new(factory));
    }

    pub fn tokenizer(&self, spec: &StrategySpec) -> Result<Arc<dyn Tokenizer>> {
        let factory = self.tokenizers.get(&spec.kind).ok_or_else(|| unknown("tokenizer", spec))?;
        factory(spec)
    }

    pub fn normalizer(&self, spec: &StrategySpec) -> Result<Arc<dyn Normalizer>> {
        let factory = self.normalizers.get(&spec.kind).ok_or_else(|| unknown("normalizer", spec))?;
        factory(spec)
    }

    pub fn reading_converter(&self, spec: &StrategySpec) -> Result<Arc<dyn ReadingConverter>> {
        let factory = self.readings.get(&spec.kind).ok_or_else(|| unknown("reading converter", spec))?;
        factory(spec)
    }

    pub fn build_analyzer(&self, config: &AnalysisConfig) -> Result<Analyzer> {
        let mut tokenizer = FieldTokenizer::new(self.tokenizer(&config.tokenizer)?);
        for (key, spec) in &config.field_tokenizers {
            let built = self.tokenizer(spec)?;
            tokenizer = match key.strip_prefix(LANG_ROUTE_PREFIX) {
                Some(lang) => tokenizer.with_lang(lang, built),
                None => tokenizer.with_field(key.clone(), built),
            };
        }
        let normalizers = config
            .normalizers
            .iter()
            .map(|spec| self.normalizer(spec))
            .collect::<Result<Vec<_>>>()?;
        let readings = config
            .reading_converters
            .iter()
            .map(|spec| self.reading_converter(spec))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            tokenizer = %config.tokenizer.kind,
            normalizers = normalizers.len(),
            reading_converters = readings.len(),
            "built analyzer"
        );
        Ok(Analyzer::new(
            Arc::new(tokenizer),
            NormalizerChain::new(normalizers),
            ReadingConverterChain::new(readings, config.max_readings),
        ))
    }
}

fn required_path(spec: &StrategySpec) -> Result<&str> {
    spec.path
        .as_deref()
        .ok_or_else(|| SuggestError::InvalidConfig(format!("strategy '{}' requires a path", spec.kind)))
}

fn unknown(what: &str, spec: &StrategySpec) -> SuggestError {
    SuggestError::InvalidConfig(format!("unknown {what} '{}'", spec.kind))
}
