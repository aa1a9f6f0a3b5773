//! Last-resort extractor that scans raw document bytes for readable runs.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use hrmatch_core::defaults::{BINARY_SCAN_MIN_CHARS, BINARY_SCAN_MIN_RUN, BINARY_SCAN_MIN_WORDS};

use super::TextExtractor;

static READABLE_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"[A-Za-z0-9\s\.,;:!?\-()]{{{},}}",
        BINARY_SCAN_MIN_RUN
    ))
    .unwrap()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Text decodings tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    Utf8,
    Utf16Le,
    Latin1,
}

impl Decoding {
    const ALL: [Decoding; 3] = [Decoding::Utf8, Decoding::Utf16Le, Decoding::Latin1];

    fn decode(self, data: &[u8]) -> String {
        match self {
            Decoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Decoding::Utf16Le => {
                let units = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
                char::decode_utf16(units)
                    .filter_map(|c| c.ok())
                    .collect()
            }
            Decoding::Latin1 => data.iter().map(|&b| b as char).collect(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Decoding::Utf8 => "utf-8",
            Decoding::Utf16Le => "utf-16le",
            Decoding::Latin1 => "latin-1",
        }
    }
}

/// Collects runs of ASCII letters, digits and punctuation from each decoding
/// and accepts the first that looks like prose.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryScanExtractor;

impl BinaryScanExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scan, shared with tests.
    pub fn scan(data: &[u8]) -> Option<String> {
        for decoding in Decoding::ALL {
            let decoded = decoding.decode(data);
            let runs: Vec<&str> = READABLE_RUN
                .find_iter(&decoded)
                .map(|m| m.as_str())
                .collect();
            if runs.is_empty() {
                continue;
            }
            let joined = runs.join(" ");
            let text = WHITESPACE.replace_all(&joined, " ").trim().to_string();
            let words = text.split_whitespace().count();
            if text.len() > BINARY_SCAN_MIN_CHARS && words > BINARY_SCAN_MIN_WORDS {
                debug!(
                    subsystem = "extract",
                    component = "binary_scan",
                    encoding = decoding.name(),
                    chars = text.len(),
                    words,
                    "Recovered text from binary scan"
                );
                return Some(text);
            }
        }
        None
    }
}

#[async_trait]
impl TextExtractor for BinaryScanExtractor {
    fn name(&self) -> &str {
        "binary_scan"
    }

    async fn extract(&self, data: &[u8]) -> Option<String> {
        Self::scan(data)
    }
}
