//! Normalisation of raw extracted document text.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use hrmatch_core::defaults::{DUPLICATE_LINE_KEEP_LENGTH, MIN_EXTRACTED_TEXT_LENGTH};

static LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n|\r").unwrap());
static HORIZONTAL_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Clean text produced by an extractor.
///
/// Line breaks are normalised to `\n`, runs of spaces and tabs collapse to a
/// single space, at most one blank line is kept between paragraphs, lines are
/// trimmed and adjacent duplicate lines are dropped unless they are long.
/// Results shorter than [`MIN_EXTRACTED_TEXT_LENGTH`] are returned empty.
pub fn clean_extracted_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let text = LINE_BREAKS.replace_all(raw, "\n");
    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");

    let mut lines: Vec<&str> = Vec::new();
    let mut previous: Option<&str> = None;
    for line in text.split('\n').map(str::trim) {
        if previous != Some(line) || line.chars().count() > DUPLICATE_LINE_KEEP_LENGTH {
            lines.push(line);
        }
        previous = Some(line);
    }

    let cleaned = lines.join("\n").trim().to_string();
    if cleaned.chars().count() < MIN_EXTRACTED_TEXT_LENGTH {
        warn!(
            subsystem = "extract",
            raw_len = raw.len(),
            "Extracted text too short, discarding"
        );
        return String::new();
    }

    debug!(
        subsystem = "extract",
        raw_len = raw.len(),
        cleaned_len = cleaned.len(),
        "Cleaned extracted text"
    );
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalises_line_breaks_and_spaces() {
        let cleaned = clean_extracted_text("Senior\tRust   Engineer\r\nBerlin,\rGermany");
        assert_eq!(cleaned, "Senior Rust Engineer\nBerlin,\nGermany");
    }

    #[test]
    fn test_caps_blank_lines() {
        let cleaned = clean_extracted_text("Experience section\n\n\n\n\nEducation section");
        assert_eq!(cleaned, "Experience section\n\nEducation section");
    }

    #[test]
    fn test_whitespace_only_lines_collapse() {
        let cleaned = clean_extracted_text("Summary paragraph\n  \n \t \nSkills paragraph");
        assert_eq!(cleaned, "Summary paragraph\n\nSkills paragraph");
    }

    #[test]
    fn test_drops_adjacent_duplicate_short_lines() {
        let cleaned = clean_extracted_text("Page header\nPage header\nBody text here");
        assert_eq!(cleaned, "Page header\nBody text here");
    }

    #[test]
    fn test_keeps_long_duplicate_lines() {
        let long = "Designed and operated a multi-region payments platform at scale";
        let cleaned = clean_extracted_text(&format!("{long}\n{long}"));
        assert_eq!(cleaned.lines().count(), 2);
    }

    #[test]
    fn test_short_text_is_discarded() {
        assert_eq!(clean_extracted_text("  hi \n"), "");
        assert_eq!(clean_extracted_text(""), "");
    }
}
