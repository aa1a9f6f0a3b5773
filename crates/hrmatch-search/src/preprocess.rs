//! Text preprocessing applied before embedding.
//!
//! Resumes and job descriptions arrive from PDF/DOC extraction with odd
//! unicode spacing, hard-wrapped lines and repeated boilerplate (page headers,
//! footers). Each cleanup step can be toggled through [`PreprocessConfig`];
//! the steps always run in the order listed there.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use hrmatch_core::{defaults, SourceType};

static SPECIAL_SPACES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\u{00A0}\u{1680}\u{180E}\u{2000}-\u{200B}\u{202F}\u{205F}\u{3000}\u{FEFF}]")
        .unwrap()
});
static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{2013}\u{2014}\u{2015}]").unwrap());
static DOUBLE_QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{201C}\u{201D}\u{201E}\u{201F}]").unwrap());
static SINGLE_QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{2018}\u{2019}\u{201A}\u{201B}]").unwrap());
static INLINE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+|\n+").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r" +([,.!?;:])").unwrap());
static REPEATED_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[!?,;:]{2,}").unwrap());

/// Toggles and limits for [`TextPreprocessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// NFC plus special space, dash and quote normalisation
    pub normalize_unicode: bool,
    /// Collapse spaces and tabs, trim every line
    pub remove_extra_whitespace: bool,
    pub normalize_line_breaks: bool,
    /// Only join wrapped lines between two lowercase letters
    pub preserve_structure: bool,
    pub remove_empty_lines: bool,
    pub max_consecutive_newlines: usize,
    /// Case-insensitive duplicate sentence removal
    pub remove_duplicates: bool,
    /// Sentences shorter than this (in characters) are dropped by deduplication
    pub min_sentence_length: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::job_description()
    }
}

impl PreprocessConfig {
    /// Resumes: shorter sentences survive (bullet points, skills).
    pub fn resume() -> Self {
        Self {
            min_sentence_length: defaults::RESUME_MIN_SENTENCE_LENGTH,
            ..Self::job_description()
        }
    }

    pub fn job_description() -> Self {
        Self {
            normalize_unicode: true,
            remove_extra_whitespace: true,
            normalize_line_breaks: true,
            preserve_structure: true,
            remove_empty_lines: true,
            max_consecutive_newlines: defaults::MAX_CONSECUTIVE_NEWLINES,
            remove_duplicates: true,
            min_sentence_length: defaults::JOB_MIN_SENTENCE_LENGTH,
        }
    }

    /// Heavily noisy text: structure is not preserved.
    pub fn aggressive() -> Self {
        Self {
            preserve_structure: false,
            max_consecutive_newlines: 1,
            min_sentence_length: defaults::AGGRESSIVE_MIN_SENTENCE_LENGTH,
            ..Self::job_description()
        }
    }

    pub fn for_source(source_type: SourceType) -> Self {
        match source_type {
            SourceType::Resume => Self::resume(),
            SourceType::JobDescription => Self::job_description(),
        }
    }
}

/// Before/after measurements of one preprocessing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessStats {
    pub original_length: usize,
    pub processed_length: usize,
    /// `processed_length / original_length`, 0 for empty input
    pub compression_ratio: f64,
    pub original_lines: usize,
    pub processed_lines: usize,
    pub removed_characters: i64,
}

impl PreprocessStats {
    pub fn measure(original: &str, processed: &str) -> Self {
        let original_length = original.chars().count();
        let processed_length = processed.chars().count();
        Self {
            original_length,
            processed_length,
            compression_ratio: if original_length == 0 {
                0.0
            } else {
                processed_length as f64 / original_length as f64
            },
            original_lines: line_count(original),
            processed_lines: line_count(processed),
            removed_characters: original_length as i64 - processed_length as i64,
        }
    }
}

fn line_count(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.matches('\n').count() + 1
    }
}

/// Cleans document text before it is embedded.
#[derive(Debug, Clone, Default)]
pub struct TextPreprocessor {
    config: PreprocessConfig,
}

impl TextPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn resume() -> Self {
        Self::new(PreprocessConfig::resume())
    }

    pub fn job_description() -> Self {
        Self::new(PreprocessConfig::job_description())
    }

    pub fn for_source(source_type: SourceType) -> Self {
        Self::new(PreprocessConfig::for_source(source_type))
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn preprocess(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }
        let cfg = &self.config;
        let mut text = text.to_string();

        if cfg.normalize_unicode {
            text = normalize_unicode(&text);
        }
        if cfg.remove_extra_whitespace {
            text = collapse_whitespace(&text);
        }
        if cfg.normalize_line_breaks {
            text = normalize_line_breaks(&text, cfg.preserve_structure);
        }
        if cfg.remove_empty_lines {
            text = text
                .split('\n')
                .filter(|line| !line.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n");
        }
        text = limit_newlines(&text, cfg.max_consecutive_newlines);
        if cfg.remove_duplicates {
            text = remove_duplicate_sentences(&text, cfg.min_sentence_length);
        }
        final_cleanup(&text)
    }

    pub fn preprocess_with_stats(&self, text: &str) -> (String, PreprocessStats) {
        let processed = self.preprocess(text);
        let stats = PreprocessStats::measure(text, &processed);
        (processed, stats)
    }
}

fn normalize_unicode(text: &str) -> String {
    let text: String = text.nfc().collect();
    let text = SPECIAL_SPACES.replace_all(&text, " ");
    let text = DASHES.replace_all(&text, "-");
    let text = DOUBLE_QUOTES.replace_all(&text, "\"");
    SINGLE_QUOTES.replace_all(&text, "'").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    INLINE_WHITESPACE
        .replace_all(text, " ")
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// CRLF/CR to LF, then join hard-wrapped lines.
///
/// With `preserve_structure`, a break is joined only between two lowercase
/// letters. Otherwise any break not ending a sentence and not starting a
/// list item or blank line is joined.
fn normalize_line_breaks(text: &str, preserve_structure: bool) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        if c != '\n' || i == 0 || i + 1 == chars.len() {
            out.push(c);
            continue;
        }
        let prev = chars[i - 1];
        let next = chars[i + 1];
        let join = if preserve_structure {
            prev.is_lowercase() && next.is_lowercase()
        } else {
            !matches!(prev, '.' | '!' | '?' | ':' | ';' | '\n')
                && !matches!(next, '\n' | '-' | '*')
                && !next.is_ascii_digit()
                && !next.is_whitespace()
        };
        out.push(if join { ' ' } else { '\n' });
    }
    out
}

fn limit_newlines(text: &str, max: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            run += 1;
            if run > max {
                continue;
            }
        } else {
            run = 0;
        }
        out.push(c);
    }
    out
}

fn is_list_item(sentence: &str) -> bool {
    sentence.starts_with(['•', '-', '*'])
        || sentence.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Drop repeated and too-short sentences, keeping first occurrences.
///
/// Returns the input unchanged when no sentence survives.
fn remove_duplicate_sentences(text: &str, min_len: usize) -> String {
    let mut seen = HashSet::new();
    let mut unique: Vec<&str> = Vec::new();

    for sentence in SENTENCE_SPLIT.split(text) {
        let trimmed = sentence.trim();
        let key = trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if key.chars().count() < min_len {
            continue;
        }
        if seen.insert(key) {
            unique.push(trimmed);
        }
    }

    if unique.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for sentence in unique {
        let list = is_list_item(sentence);
        if !out.is_empty() {
            out.push(if list { '\n' } else { ' ' });
        }
        out.push_str(sentence);
        if !sentence.starts_with(['•', '-', '*']) {
            out.push('.');
        }
    }
    out
}

fn final_cleanup(text: &str) -> String {
    let text = MULTI_SPACE.replace_all(text, " ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = REPEATED_PUNCT.replace_all(&text, |caps: &regex::Captures| {
        caps[0].chars().next().map(String::from).unwrap_or_default()
    });
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structural_only() -> PreprocessConfig {
        PreprocessConfig {
            remove_duplicates: false,
            ..PreprocessConfig::resume()
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(TextPreprocessor::resume().preprocess(""), "");
        assert_eq!(TextPreprocessor::resume().preprocess("  \n\t "), "");
    }

    #[test]
    fn test_unicode_spaces_dashes_and_quotes() {
        let out = normalize_unicode("Senior\u{00A0}Engineer \u{2014} \u{201C}Rust\u{201D} team\u{2019}s lead");
        assert_eq!(out, "Senior Engineer - \"Rust\" team's lead");
    }

    #[test]
    fn test_nfc_composition() {
        // "e" + combining acute composes to a single code point
        let out = normalize_unicode("Jose\u{0301}");
        assert_eq!(out, "Jos\u{00E9}");
    }

    #[test]
    fn test_collapse_whitespace_keeps_newlines() {
        assert_eq!(collapse_whitespace("  a \t b  \n   c  "), "a b\nc");
    }

    #[test]
    fn test_preserve_structure_joins_only_lowercase_wraps() {
        let out = normalize_line_breaks("built distributed\nsystems\nExperience", true);
        assert_eq!(out, "built distributed systems\nExperience");
    }

    #[test]
    fn test_aggressive_joins_unterminated_lines() {
        let out = normalize_line_breaks("Led a team of\nEngineers.\n- Rust\n2019", false);
        assert_eq!(out, "Led a team of Engineers.\n- Rust\n2019");
    }

    #[test]
    fn test_crlf_normalized() {
        assert_eq!(normalize_line_breaks("a.\r\nB.\rC", true), "a.\nB.\nC");
    }

    #[test]
    fn test_limit_newlines() {
        assert_eq!(limit_newlines("a\n\n\n\nb", 2), "a\n\nb");
        assert_eq!(limit_newlines("a\n\n\nb", 1), "a\nb");
    }

    #[test]
    fn test_duplicate_sentences_removed_case_insensitively() {
        let text = "Built payment systems in Rust. built PAYMENT systems in rust! Led hiring.";
        let out = remove_duplicate_sentences(text, 8);
        assert_eq!(out, "Built payment systems in Rust. Led hiring.");
    }

    #[test]
    fn test_short_sentences_dropped() {
        let out = remove_duplicate_sentences("Skills. Kubernetes operators in production.", 10);
        assert_eq!(out, "Kubernetes operators in production.");
    }

    #[test]
    fn test_list_items_start_new_lines() {
        let out = remove_duplicate_sentences("Summary of experience\n- Rust services\n- Go services", 8);
        assert_eq!(out, "Summary of experience.\n- Rust services\n- Go services");
    }

    #[test]
    fn test_all_sentences_too_short_returns_input() {
        assert_eq!(remove_duplicate_sentences("Hi. Yo.", 8), "Hi. Yo.");
    }

    #[test]
    fn test_final_cleanup() {
        assert_eq!(final_cleanup("Rust ,  Go !!  Wow?!"), "Rust, Go! Wow?");
    }

    #[test]
    fn test_structural_pipeline_without_dedup() {
        let p = TextPreprocessor::new(structural_only());
        let out = p.preprocess("  Jane   Doe\r\n\r\n\r\n\r\nsoftware\nengineer  \n\n");
        assert_eq!(out, "Jane Doe\nsoftware engineer");
    }

    #[test]
    fn test_repeated_page_footer_removed() {
        let footer = "Confidential resume of Jane Doe";
        let text = format!(
            "{footer}\nTen years building search infrastructure\n{footer}\nMentored six engineers\n{footer}"
        );
        let out = TextPreprocessor::resume().preprocess(&text);
        assert_eq!(out.matches("Confidential").count(), 1);
        assert!(out.contains("search infrastructure"));
        assert!(out.contains("Mentored six engineers"));
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(PreprocessConfig::resume().min_sentence_length, 8);
        assert_eq!(PreprocessConfig::job_description().min_sentence_length, 10);
        let aggressive = PreprocessConfig::aggressive();
        assert_eq!(aggressive.min_sentence_length, 15);
        assert_eq!(aggressive.max_consecutive_newlines, 1);
        assert!(!aggressive.preserve_structure);
        assert_eq!(
            PreprocessConfig::for_source(SourceType::Resume),
            PreprocessConfig::resume()
        );
    }

    #[test]
    fn test_stats() {
        let p = TextPreprocessor::resume();
        let (processed, stats) = p.preprocess_with_stats("Rust   engineer with ten years\n\n\n\nRust   engineer with ten years");
        assert_eq!(processed, "Rust engineer with ten years.");
        assert_eq!(stats.original_lines, 5);
        assert_eq!(stats.processed_lines, 1);
        assert_eq!(stats.processed_length, processed.chars().count());
        assert!(stats.compression_ratio < 1.0);
        assert!(stats.removed_characters > 0);
    }

    #[test]
    fn test_stats_empty() {
        let stats = PreprocessStats::measure("", "");
        assert_eq!(stats.compression_ratio, 0.0);
        assert_eq!(stats.original_lines, 0);
    }
}
