//! Word splitting for mixed-script text
//!
//! The default strategy walks the text once, classifying every character and
//! accumulating maximal runs of one class. Han runs of four or more characters
//! are cut into two-character chunks, a cheap stand-in for CJK word
//! boundaries. This is a heuristic chunker, not a dictionary segmenter:
//! Western words and numbers come out whole and a chunk may straddle a real
//! word boundary.
//!
//! Classification:
//! - `Han`: CJK unified ideographs (all extension blocks) and compatibility ideographs
//! - `Digit`: anything `char::is_numeric`
//! - `Letter`: anything else `char::is_alphabetic`, which includes Hiragana,
//!   Katakana, Hangul, Cyrillic and so on (kana are not chunked)
//! - `Other`: whitespace, punctuation, symbols
//!
//! `Other` runs are emitted like any other run after trimming, so whitespace
//! vanishes but punctuation such as "," or "->" survives as its own token.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Han runs at least this long are split into chunks
const HAN_CHUNK_THRESHOLD: usize = 4;
const HAN_CHUNK_LEN: usize = 2;

/// Script-class regex used by the fallback strategy
static SCRIPT_RUN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z]+|[0-9]+|\p{Han}+|\p{Hiragana}+|\p{Katakana}+")
        .expect("script run pattern is valid")
});

/// Which splitting algorithm to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TokenizerStrategy {
    /// Character-run classifier with Han chunking
    #[default]
    Chunked,
    /// Regex over script classes; ASCII letters, ASCII digits, Han, kana. Everything else is dropped.
    ScriptRuns,
}

impl TokenizerStrategy {
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        match self {
            TokenizerStrategy::Chunked => tokenize(text),
            TokenizerStrategy::ScriptRuns => tokenize_script_runs(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Han,
    Letter,
    Digit,
    Other,
}

fn classify(c: char) -> CharClass {
    if is_han(c) {
        CharClass::Han
    } else if c.is_numeric() {
        CharClass::Digit
    } else if c.is_alphabetic() {
        CharClass::Letter
    } else {
        CharClass::Other
    }
}

/// CJK ideograph blocks
pub fn is_han(c: char) -> bool {
    matches!(c as u32,
        0x3007              // 〇
        | 0x3400..=0x4DBF   // Extension A
        | 0x4E00..=0x9FFF   // Unified Ideographs
        | 0xF900..=0xFAFF   // Compatibility Ideographs
        | 0x20000..=0x2A6DF // Extension B
        | 0x2A700..=0x2EBEF // Extensions C-F
        | 0x2F800..=0x2FA1F // Compatibility Supplement
        | 0x30000..=0x3134F // Extension G
    )
}

/// Split text into tokens with the character-run classifier
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut segment = String::new();
    let mut current: Option<CharClass> = None;

    for c in text.chars() {
        let class = classify(c);
        if current.is_some_and(|cur| cur != class) {
            flush(&mut tokens, &segment, current);
            segment.clear();
        }
        current = Some(class);
        segment.push(c);
    }
    flush(&mut tokens, &segment, current);

    tokens
}

fn flush(tokens: &mut Vec<String>, segment: &str, class: Option<CharClass>) {
    if class == Some(CharClass::Han) {
        let chars: Vec<char> = segment.chars().collect();
        if chars.len() >= HAN_CHUNK_THRESHOLD {
            tokens.extend(chars.chunks(HAN_CHUNK_LEN).map(|chunk| chunk.iter().collect::<String>()));
            return;
        }
    }
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        tokens.push(trimmed.to_string());
    }
}

/// Split text with the script-class regex (simpler fallback)
pub fn tokenize_script_runs(text: &str) -> Vec<String> {
    SCRIPT_RUN_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens(tokens: &[String]) -> Vec<usize> {
        tokens.iter().map(|t| t.chars().count()).collect()
    }

    #[test]
    fn test_mixed_script_example() {
        assert_eq!(tokenize("hello123世界你好"), vec!["hello", "123", "世界", "你好"]);
    }

    #[test]
    fn test_five_han_chunks() {
        let tokens = tokenize("中华人民共");
        assert_eq!(lens(&tokens), vec![2, 2, 1]);
        assert_eq!(tokens, vec!["中华", "人民", "共"]);
    }

    #[test]
    fn test_short_han_runs_stay_whole() {
        assert_eq!(tokenize("世界人"), vec!["世界人"]);
        assert_eq!(tokenize("世界"), vec!["世界"]);
        assert_eq!(tokenize("世"), vec!["世"]);
    }

    #[test]
    fn test_exact_four_han_chunks() {
        assert_eq!(tokenize("你好世界"), vec!["你好", "世界"]);
    }

    #[test]
    fn test_whitespace_dropped() {
        assert_eq!(tokenize("  hello   world  "), vec!["hello", "world"]);
        assert!(tokenize("   \n\t ").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_punctuation_kept_as_token() {
        assert_eq!(tokenize("a, b"), vec!["a", ",", "b"]);
    }

    #[test]
    fn test_han_run_split_by_latin() {
        assert_eq!(tokenize("我爱Rust编程语言"), vec!["我爱", "Rust", "编程", "语言"]);
    }

    #[test]
    fn test_kana_is_letter_class() {
        // Hiragana is bucketed with letters, so it is neither chunked nor split from Latin
        assert_eq!(tokenize("ひらがなカタカナ"), vec!["ひらがなカタカナ"]);
        assert_eq!(tokenize("東京タワー"), vec!["東京", "タワー"]);
    }

    #[test]
    fn test_script_runs_fallback() {
        assert_eq!(
            tokenize_script_runs("hello123世界你好, ひらがな!"),
            vec!["hello", "123", "世界你好", "ひらがな"]
        );
        assert!(tokenize_script_runs("...").is_empty());
    }

    #[test]
    fn test_strategy_dispatch() {
        let text = "世界你好";
        assert_eq!(TokenizerStrategy::Chunked.tokenize(text), vec!["世界", "你好"]);
        assert_eq!(TokenizerStrategy::ScriptRuns.tokenize(text), vec!["世界你好"]);
    }
}
