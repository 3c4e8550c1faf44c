//! Reading converters: kana script folding, Hepburn romanization, and a
//! user-supplied dictionary for words whose reading cannot be derived from
//! their spelling (kanji).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use suggest_core::error::{Result, SuggestError};
use suggest_core::traits::ReadingConverter;

const HIRAGANA_START: u32 = 0x3041;
const HIRAGANA_END: u32 = 0x3096;
const KATAKANA_START: u32 = 0x30A1;
const KATAKANA_END: u32 = 0x30F6;
const KANA_OFFSET: u32 = KATAKANA_START - HIRAGANA_START;

pub fn is_hiragana(c: char) -> bool {
    (HIRAGANA_START..=HIRAGANA_END).contains(&(c as u32))
}

pub fn is_katakana(c: char) -> bool {
    (KATAKANA_START..=KATAKANA_END).contains(&(c as u32))
}

pub fn to_katakana(text: &str) -> String {
    text.chars()
        .map(|c| if is_hiragana(c) { shift(c, KANA_OFFSET as i64) } else { c })
        .collect()
}

pub fn to_hiragana(text: &str) -> String {
    text.chars()
        .map(|c| if is_katakana(c) { shift(c, -(KANA_OFFSET as i64)) } else { c })
        .collect()
}

fn shift(c: char, by: i64) -> char {
    u32::try_from(c as i64 + by).ok().and_then(char::from_u32).unwrap_or(c)
}

/// Hiragana to katakana.
#[derive(Debug, Default, Clone, Copy)]
pub struct KatakanaReadingConverter;

impl ReadingConverter for KatakanaReadingConverter {
    fn convert(&self, text: &str, _field: &str, _langs: &[String]) -> Result<Vec<String>> {
        if !text.chars().any(is_hiragana) {
            return Ok(Vec::new());
        }
        Ok(vec![to_katakana(text)])
    }
}

/// Katakana to hiragana.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiraganaReadingConverter;

impl ReadingConverter for HiraganaReadingConverter {
    fn convert(&self, text: &str, _field: &str, _langs: &[String]) -> Result<Vec<String>> {
        if !text.chars().any(is_katakana) {
            return Ok(Vec::new());
        }
        Ok(vec![to_hiragana(text)])
    }
}

/// Kana to Hepburn romaji. Words containing anything other than kana, the
/// prolonged sound mark, and ASCII alphanumerics produce no reading.
#[derive(Debug, Default, Clone, Copy)]
pub struct RomajiReadingConverter;

impl ReadingConverter for RomajiReadingConverter {
    fn convert(&self, text: &str, _field: &str, _langs: &[String]) -> Result<Vec<String>> {
        Ok(romanize(text).into_iter().collect())
    }
}

pub fn romanize(text: &str) -> Option<String> {
    let chars: Vec<char> = to_hiragana(text).chars().collect();
    if !chars.iter().any(|c| is_hiragana(*c)) {
        return None;
    }
    let mut out = String::with_capacity(chars.len() * 2);
    let mut geminate = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == 'っ' {
            geminate = true;
            i += 1;
            continue;
        }
        let (syllable, used) = if let Some(s) = chars.get(i + 1).and_then(|n| digraph(c, *n)) {
            (s, 2)
        } else if let Some(s) = mono(c) {
            (s.to_string(), 1)
        } else if c == 'ー' {
            ("-".to_string(), 1)
        } else if c.is_ascii_alphanumeric() {
            (c.to_ascii_lowercase().to_string(), 1)
        } else {
            return None;
        };
        if geminate {
            match syllable.as_bytes().first() {
                Some(b'c') => out.push('t'),
                Some(b) if !b"aiueon-".contains(b) => out.push(char::from(*b)),
                _ => {}
            }
            geminate = false;
        }
        out.push_str(&syllable);
        i += used;
    }
    Some(out)
}

fn mono(c: char) -> Option<&'static str> {
    Some(match c {
        'あ' | 'ぁ' => "a",
        'い' | 'ぃ' | 'ゐ' => "i",
        'う' | 'ぅ' => "u",
        'え' | 'ぇ' | 'ゑ' => "e",
        'お' | 'ぉ' | 'を' => "o",
        'か' | 'ゕ' => "ka",
        'き' => "ki",
        'く' => "ku",
        'け' | 'ゖ' => "ke",
        'こ' => "ko",
        'が' => "ga",
        'ぎ' => "gi",
        'ぐ' => "gu",
        'げ' => "ge",
        'ご' => "go",
        'さ' => "sa",
        'し' => "shi",
        'す' => "su",
        'せ' => "se",
        'そ' => "so",
        'ざ' => "za",
        'じ' | 'ぢ' => "ji",
        'ず' | 'づ' => "zu",
        'ぜ' => "ze",
        'ぞ' => "zo",
        'た' => "ta",
        'ち' => "chi",
        'つ' => "tsu",
        'て' => "te",
        'と' => "to",
        'だ' => "da",
        'で' => "de",
        'ど' => "do",
        'な' => "na",
        'に' => "ni",
        'ぬ' => "nu",
        'ね' => "ne",
        'の' => "no",
        'は' => "ha",
        'ひ' => "hi",
        'ふ' => "fu",
        'へ' => "he",
        'ほ' => "ho",
        'ば' => "ba",
        'び' => "bi",
        'ぶ' => "bu",
        'べ' => "be",
        'ぼ' => "bo",
        'ぱ' => "pa",
        'ぴ' => "pi",
        'ぷ' => "pu",
        'ぺ' => "pe",
        'ぽ' => "po",
        'ま' => "ma",
        'み' => "mi",
        'む' => "mu",
        'め' => "me",
        'も' => "mo",
        'や' | 'ゃ' => "ya",
        'ゆ' | 'ゅ' => "yu",
        'よ' | 'ょ' => "yo",
        'ら' => "ra",
        'り' => "ri",
        'る' => "ru",
        'れ' => "re",
        'ろ' => "ro",
        'わ' | 'ゎ' => "wa",
        'ん' => "n",
        'ゔ' => "vu",
        _ => return None,
    })
}

/// Two-kana syllables: palatalized `ki + ya` forms and the small-vowel
/// extensions used in loanwords.
fn digraph(first: char, second: char) -> Option<String> {
    let palatal_vowel = match second {
        'ゃ' => Some('a'),
        'ゅ' => Some('u'),
        'ょ' => Some('o'),
        _ => None,
    };
    if let Some(vowel) = palatal_vowel {
        let stem = match first {
            'き' => "ky",
            'ぎ' => "gy",
            'し' => "sh",
            'じ' | 'ぢ' => "j",
            'ち' => "ch",
            'に' => "ny",
            'ひ' => "hy",
            'び' => "by",
            'ぴ' => "py",
            'み' => "my",
            'り' => "ry",
            _ => return None,
        };
        return Some(format!("{stem}{vowel}"));
    }
    let small_vowel = match second {
        'ぁ' => 'a',
        'ぃ' => 'i',
        'ぇ' => 'e',
        'ぉ' => 'o',
        _ => return None,
    };
    let stem = match (first, small_vowel) {
        ('ふ', _) => "f",
        ('ゔ', _) => "v",
        ('う', 'i' | 'e' | 'o') => "w",
        ('て', 'i') => "t",
        ('で', 'i') => "d",
        ('し', 'e') => "sh",
        ('じ', 'e') => "j",
        ('ち', 'e') => "ch",
        _ => return None,
    };
    Some(format!("{stem}{small_vowel}"))
}

/// Exact-match word to reading lookup.
#[derive(Debug, Default, Clone)]
pub struct DictionaryReadingConverter {
    entries: HashMap<String, Vec<String>>,
}

impl DictionaryReadingConverter {
    pub fn from_entries<I, W, R>(entries: I) -> Self
    where
        I: IntoIterator<Item = (W, R)>,
        W: Into<String>,
        R: Into<String>,
    {
        let mut dict = Self::default();
        for (word, reading) in entries {
            dict.insert(word, reading);
        }
        dict
    }

    pub fn insert(&mut self, word: impl Into<String>, reading: impl Into<String>) {
        let list = self.entries.entry(word.into()).or_default();
        let reading = reading.into();
        if !reading.is_empty() && !list.contains(&reading) {
            list.push(reading);
        }
    }

    /// Parse `word<TAB>reading[,reading...]` lines. Blank lines and lines
    /// starting with `#` are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut dict = Self::default();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (word, readings) = line.split_once('\t').ok_or_else(|| {
                SuggestError::Parse(format!("dictionary line {}: expected word<TAB>reading", n + 1))
            })?;
            for reading in readings.split([',', '\t']) {
                dict.insert(word.trim(), reading.trim());
            }
        }
        Ok(dict)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let dict = Self::parse(&fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), entries = dict.len(), "loaded reading dictionary");
        Ok(dict)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReadingConverter for DictionaryReadingConverter {
    fn convert(&self, text: &str, _field: &str, _langs: &[String]) -> Result<Vec<String>> {
        Ok(self.entries.get(text).cloned().unwrap_or_default())
    }
}
