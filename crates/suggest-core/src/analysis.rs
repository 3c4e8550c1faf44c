//! Ordered compositions of the pluggable text strategies and the bundle the
//! parser and ranking code consume.

use std::sync::Arc;

use crate::error::Result;
use crate::traits::{Normalizer, ReadingConverter, Token, Tokenizer};

/// Applies each normalizer to the output of the previous one.
#[derive(Clone, Default)]
pub struct NormalizerChain {
    normalizers: Vec<Arc<dyn Normalizer>>,
}

impl NormalizerChain {
    pub fn new(normalizers: Vec<Arc<dyn Normalizer>>) -> Self {
        Self { normalizers }
    }

    pub fn is_empty(&self) -> bool {
        self.normalizers.is_empty()
    }
}

impl Normalizer for NormalizerChain {
    fn normalize(&self, text: &str, field: &str, langs: &[String]) -> String {
        self.normalizers
            .iter()
            .fold(text.to_string(), |acc, n| n.normalize(&acc, field, langs))
    }
}

/// Feeds each converter every reading accumulated so far. The input itself
/// is always the first reading; duplicates are dropped and the result is
/// capped at `max_readings`.
#[derive(Clone)]
pub struct ReadingConverterChain {
    converters: Vec<Arc<dyn ReadingConverter>>,
    max_readings: usize,
}

impl ReadingConverterChain {
    pub fn new(converters: Vec<Arc<dyn ReadingConverter>>, max_readings: usize) -> Self {
        Self { converters, max_readings: max_readings.max(1) }
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl Default for ReadingConverterChain {
    fn default() -> Self {
        Self::new(Vec::new(), 10)
    }
}

impl ReadingConverter for ReadingConverterChain {
    fn convert(&self, text: &str, field: &str, langs: &[String]) -> Result<Vec<String>> {
        let mut readings = vec![text.to_string()];
        for converter in &self.converters {
            let mut produced = Vec::new();
            for reading in &readings {
                produced.extend(converter.convert(reading, field, langs)?);
            }
            for reading in produced {
                if readings.len() >= self.max_readings {
                    break;
                }
                if !reading.is_empty() && !readings.contains(&reading) {
                    readings.push(reading);
                }
            }
        }
        Ok(readings)
    }
}

/// The tokenizer, normalizer chain and reading chain of one engine.
#[derive(Clone)]
pub struct Analyzer {
    tokenizer: Arc<dyn Tokenizer>,
    normalizer: NormalizerChain,
    readings: ReadingConverterChain,
}

impl Analyzer {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        normalizer: NormalizerChain,
        readings: ReadingConverterChain,
    ) -> Self {
        Self { tokenizer, normalizer, readings }
    }

    pub fn tokenize(&self, text: &str, field: &str, lang: Option<&str>) -> Result<Vec<Token>> {
        self.tokenizer.tokenize(text, field, lang)
    }

    pub fn normalize(&self, text: &str, field: &str, langs: &[String]) -> String {
        self.normalizer.normalize(text, field, langs)
    }

    /// Readings for one already-normalized word. With no converters this is
    /// just the word itself.
    pub fn readings(&self, word: &str, field: &str, langs: &[String]) -> Result<Vec<String>> {
        self.readings.convert(word, field, langs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;
    impl Normalizer for Upper {
        fn normalize(&self, text: &str, _: &str, _: &[String]) -> String {
            text.to_uppercase()
        }
    }

    struct Suffix(&'static str);
    impl Normalizer for Suffix {
        fn normalize(&self, text: &str, _: &str, _: &[String]) -> String {
            format!("{text}{}", self.0)
        }
    }

    struct Double;
    impl ReadingConverter for Double {
        fn convert(&self, text: &str, _: &str, _: &[String]) -> Result<Vec<String>> {
            Ok(vec![format!("{text}{text}")])
        }
    }

    #[test]
    fn normalizers_apply_in_order() {
        let chain = NormalizerChain::new(vec![Arc::new(Suffix("x")), Arc::new(Upper)]);
        assert_eq!(chain.normalize("a", "", &[]), "AX");
    }

    #[test]
    fn reading_chain_keeps_input_and_caps() {
        let chain = ReadingConverterChain::new(vec![Arc::new(Double), Arc::new(Double)], 3);
        assert_eq!(chain.convert("ab", "", &[]).unwrap(), vec!["ab", "abab", "abababab"]);
        let empty = ReadingConverterChain::default();
        assert_eq!(empty.convert("ab", "", &[]).unwrap(), vec!["ab"]);
    }
}
