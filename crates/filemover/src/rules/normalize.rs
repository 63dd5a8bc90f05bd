use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizationOptions {
    pub normalize_unicode: bool,
    pub normalize_width: bool,
    pub strip_diacritics: bool,
    pub normalize_case: bool,
}

impl Default for NormalizationOptions {
    fn default() -> Self {
        Self {
            normalize_unicode: true,
            normalize_width: true,
            strip_diacritics: false,
            normalize_case: true,
        }
    }
}

/// Canonicalizes folder names for comparison. The output is used only for
/// matching; display paths and stored paths keep the original text.
#[derive(Debug, Clone)]
pub struct Normalizer {
    options: NormalizationOptions,
}

impl Normalizer {
    pub fn new(options: NormalizationOptions) -> Self {
        Self { options }
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut result: String = if self.options.normalize_unicode {
            text.nfkc().collect()
        } else {
            text.to_string()
        };

        if self.options.normalize_width {
            result = fold_width(&result);
        }

        if self.options.strip_diacritics {
            result = strip_diacritics(&result);
        }

        if self.options.normalize_case {
            result = result.to_lowercase();
        }

        result
    }
}

/// Full-width ASCII-range characters fold to half-width; NFKC already covers
/// this, but width folding must also work when unicode normalization is off.
fn fold_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            'Ａ'..='Ｚ' => char::from_u32(c as u32 - 'Ａ' as u32 + 'A' as u32).unwrap_or(c),
            'ａ'..='ｚ' => char::from_u32(c as u32 - 'ａ' as u32 + 'a' as u32).unwrap_or(c),
            '　' => ' ',
            _ => c,
        })
        .collect()
}

fn strip_diacritics(text: &str) -> String {
    text.nfd()
        .filter(|&c| !unicode_normalization::char::is_combining_mark(c))
        .collect::<String>()
        .nfc()
        .collect()
}
