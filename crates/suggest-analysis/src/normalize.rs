use unicode_normalization::UnicodeNormalization;

use suggest_core::traits::Normalizer;

/// Unicode NFKC: folds half-width kana and full-width ASCII to their
/// canonical forms, so `ｴﾝｼﾞﾝ` and `エンジン` normalize alike.
#[derive(Debug, Default, Clone, Copy)]
pub struct NfkcNormalizer;

impl Normalizer for NfkcNormalizer {
    fn normalize(&self, text: &str, _field: &str, _langs: &[String]) -> String {
        text.nfkc().collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LowerCaseNormalizer;

impl Normalizer for LowerCaseNormalizer {
    fn normalize(&self, text: &str, _field: &str, _langs: &[String]) -> String {
        text.to_lowercase()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrimNormalizer;

impl Normalizer for TrimNormalizer {
    fn normalize(&self, text: &str, _field: &str, _langs: &[String]) -> String {
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfkc_folds_width() {
        assert_eq!(NfkcNormalizer.normalize("ｴﾝｼﾞﾝ", "", &[]), "エンジン");
        assert_eq!(NfkcNormalizer.normalize("ＡＢＣ１", "", &[]), "ABC1");
    }

    #[test]
    fn lowercase_and_trim() {
        assert_eq!(LowerCaseNormalizer.normalize("Rust", "", &[]), "rust");
        assert_eq!(TrimNormalizer.normalize("  a b ", "", &[]), "a b");
    }
}
