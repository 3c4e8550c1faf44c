use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use suggest_core::error::{Result, SuggestError};
use suggest_core::traits::{Token, Tokenizer};

use crate::reading::{is_hiragana, is_katakana};

#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str, _field: &str, _lang: Option<&str>) -> Result<Vec<Token>> {
        Ok(text.split_whitespace().map(Token::new).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Separator,
    Han,
    Hiragana,
    Katakana,
    Alnum,
    Other,
}

fn script_of(c: char) -> Script {
    let cp = c as u32;
    if c.is_whitespace() || c.is_ascii_punctuation() || matches!(cp, 0x3000..=0x303F | 0xFF01..=0xFF0F) {
        // 々 is an iteration mark that belongs to the preceding kanji.
        if c == '々' {
            return Script::Han;
        }
        return Script::Separator;
    }
    if is_hiragana(c) {
        Script::Hiragana
    } else if is_katakana(c) || matches!(cp, 0x30FC | 0x30FD | 0x30FE | 0xFF66..=0xFF9F) {
        Script::Katakana
    } else if matches!(cp, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF) {
        Script::Han
    } else if c.is_alphanumeric() {
        Script::Alnum
    } else {
        Script::Other
    }
}

/// Splits on whitespace and punctuation, and wherever the script changes:
/// `検索エンジンrust` becomes `検索`, `エンジン`, `rust`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptTokenizer;

impl Tokenizer for ScriptTokenizer {
    fn tokenize(&self, text: &str, _field: &str, _lang: Option<&str>) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut current_script = Script::Separator;
        for c in text.chars() {
            let script = script_of(c);
            if script != current_script && !current.is_empty() {
                tokens.push(Token::new(std::mem::take(&mut current)));
            }
            if script != Script::Separator && script != Script::Other {
                current.push(c);
            }
            current_script = script;
        }
        if !current.is_empty() {
            tokens.push(Token::new(current));
        }
        Ok(tokens)
    }
}

/// Word segmentation from a Hugging Face `tokenizer.json`. Sub-word pieces
/// are regrouped by word id and sliced back out of the input, so terms keep
/// their original spelling.
pub struct HfWordTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfWordTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            SuggestError::InvalidConfig(format!("failed to load tokenizer from {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loaded word tokenizer");
        Ok(Self { inner })
    }

    pub fn new(inner: tokenizers::Tokenizer) -> Self {
        Self { inner }
    }
}

impl Tokenizer for HfWordTokenizer {
    fn tokenize(&self, text: &str, _field: &str, _lang: Option<&str>) -> Result<Vec<Token>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| SuggestError::Parse(format!("tokenization failed: {e}")))?;
        let mut spans: Vec<(u32, usize, usize)> = Vec::new();
        for (word, &(start, end)) in encoding.get_word_ids().iter().zip(encoding.get_offsets()) {
            let Some(word) = word else { continue };
            match spans.last_mut() {
                Some((w, _, e)) if w == word => *e = (*e).max(end),
                _ => spans.push((*word, start, end)),
            }
        }
        Ok(spans
            .into_iter()
            .filter_map(|(_, start, end)| text.get(start..end))
            .map(str::trim)
            .filter(|w| w.chars().any(char::is_alphanumeric))
            .map(Token::new)
            .collect())
    }
}

/// Routes each call to a tokenizer chosen by field name, then by language,
/// falling back to a default.
#[derive(Clone)]
pub struct FieldTokenizer {
    default: Arc<dyn Tokenizer>,
    by_field: HashMap<String, Arc<dyn Tokenizer>>,
    by_lang: HashMap<String, Arc<dyn Tokenizer>>,
}

impl FieldTokenizer {
    pub fn new(default: Arc<dyn Tokenizer>) -> Self {
        Self { default, by_field: HashMap::new(), by_lang: HashMap::new() }
    }

    pub fn with_field(mut self, field: impl Into<String>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.by_field.insert(field.into(), tokenizer);
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.by_lang.insert(lang.into(), tokenizer);
        self
    }

    fn route(&self, field: &str, lang: Option<&str>) -> &Arc<dyn Tokenizer> {
        self.by_field
            .get(field)
            .or_else(|| lang.and_then(|l| self.by_lang.get(l)))
            .unwrap_or(&self.default)
    }
}

impl Tokenizer for FieldTokenizer {
    fn tokenize(&self, text: &str, field: &str, lang: Option<&str>) -> Result<Vec<Token>> {
        self.route(field, lang).tokenize(text, field, lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(tokens: Vec<Token>) -> Vec<String> {
        tokens.into_iter().map(|t| t.term).collect()
    }

    #[test]
    fn script_tokenizer_splits_on_script_changes() {
        let t = ScriptTokenizer.tokenize("検索エンジンrust、全文検索 v2!", "", None).unwrap();
        assert_eq!(terms(t), vec!["検索", "エンジン", "rust", "全文検索", "v2"]);
    }

    #[test]
    fn script_tokenizer_keeps_prolonged_mark_with_katakana() {
        let t = ScriptTokenizer.tokenize("サーバーの設定", "", None).unwrap();
        assert_eq!(terms(t), vec!["サーバー", "の", "設定"]);
    }

    #[test]
    fn field_tokenizer_routes_by_field_then_lang() {
        let router = FieldTokenizer::new(Arc::new(WhitespaceTokenizer))
            .with_field("title", Arc::new(ScriptTokenizer))
            .with_lang("ja", Arc::new(ScriptTokenizer));
        assert_eq!(terms(router.tokenize("全文検索 rust", "body", None).unwrap()), vec!["全文検索", "rust"]);
        assert_eq!(terms(router.tokenize("検索エンジン", "title", None).unwrap()), vec!["検索", "エンジン"]);
        assert_eq!(terms(router.tokenize("検索エンジン", "body", Some("ja")).unwrap()), vec!["検索", "エンジン"]);
    }
}
