//! Text processing helpers shared by the store, retrieval and snapshot code

use std::borrow::Cow;
use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref WORD_REGEX: Regex = Regex::new(r"[\p{L}\p{N}_]+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Cut `text` to at most `max_bytes` bytes without splitting a UTF-8 sequence.
    pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> Cow<'_, str> {
        if text.len() <= max_bytes {
            return Cow::Borrowed(text);
        }
        let mut end = max_bytes;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        Cow::Owned(text[..end].to_string())
    }

    /// First `n` characters of `text`.
    pub fn first_chars(text: &str, n: usize) -> &str {
        match text.char_indices().nth(n) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// Turn free text into an FTS5 MATCH expression: every token is quoted
    /// and the tokens are OR-joined. Returns `None` when nothing searchable
    /// is left.
    pub fn fts_match_expression(query: &str) -> Option<String> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|token| token.replace('"', ""))
            .filter(|token| WORD_REGEX.is_match(token))
            .map(|token| format!("\"{}\"", token))
            .collect();

        // OR instead of FTS5's implicit AND: a row matching any term is
        // recalled and bm25 still ranks rows matching more terms first.
        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" OR "))
        }
    }

    /// Lowercased set of word tokens.
    pub fn word_set(text: &str) -> HashSet<String> {
        WORD_REGEX
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    /// Lowercased significant words in first-seen order, without duplicates.
    pub fn keywords(text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        WORD_REGEX
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|word| Self::is_significant_word(word, 3))
            .filter(|word| seen.insert(word.clone()))
            .collect()
    }

    /// Keyword density score in `[0, 1]`.
    pub fn keyword_relevance(content: &str, keywords: &[String]) -> f32 {
        if content.is_empty() {
            return 0.0;
        }
        let content_lower = content.to_lowercase();
        let mut score = 0.0;

        for keyword in keywords {
            let matches = content_lower.matches(keyword.as_str()).count();
            if matches > 0 {
                score += matches as f32 * (keyword.len() as f32 / content.len() as f32);
            }
        }

        score.min(1.0)
    }

    pub fn is_significant_word(word: &str, min_len: usize) -> bool {
        if word.chars().count() < min_len {
            return false;
        }

        !matches!(word.to_lowercase().as_str(), "the" | "a" | "an" | "and" | "or" | "but" | "in" | "on" | "at" | "to" | "for" |
            "of" | "with" | "by" | "is" | "am" | "are" | "was" | "were" | "be" | "been" |
            "being" | "have" | "has" | "had" | "do" | "does" | "did" | "this" | "that")
    }
}
