//! Document text extraction.
//!
//! Linked resumes and job descriptions are downloaded by [`DocumentFetcher`],
//! classified with [`detect_document_kind`] and handed to the ordered
//! extractor chain registered for that kind. The first extractor whose
//! cleaned output is non-empty wins.

mod binary_scan;
mod clean;
mod command;
mod fetch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use hrmatch_core::Result;

pub use binary_scan::BinaryScanExtractor;
pub use clean::clean_extracted_text;
pub use command::{CommandExtractor, INPUT_PLACEHOLDER};
pub use fetch::{DocumentFetcher, FetchedDocument};

/// Document formats with dedicated extractor chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Doc,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::Doc => "doc",
        }
    }
}

/// Classify a document by its URL extension, then by content type.
///
/// Unknown documents are treated as PDF.
pub fn detect_document_kind(url: &str, content_type: &str) -> DocumentKind {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_lowercase();
    if path.ends_with(".pdf") {
        return DocumentKind::Pdf;
    }
    if path.ends_with(".doc") || path.ends_with(".docx") {
        return DocumentKind::Docx;
    }

    let content_type = content_type.to_lowercase();
    if content_type.contains("pdf") {
        DocumentKind::Pdf
    } else if content_type.contains("msword") {
        DocumentKind::Doc
    } else if content_type.contains("word") || content_type.contains("officedocument") {
        DocumentKind::Docx
    } else {
        DocumentKind::Pdf
    }
}

/// A strategy for turning document bytes into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Raw text, or `None` when this strategy cannot read the document.
    async fn extract(&self, data: &[u8]) -> Option<String>;
}

/// Text produced by an extractor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub kind: DocumentKind,
    pub extractor: String,
}

/// Ordered extractor chains per document kind.
pub struct ExtractionRegistry {
    chains: HashMap<DocumentKind, Vec<Arc<dyn TextExtractor>>>,
}

impl ExtractionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    /// The standard chains: a conversion tool first, then the binary scan.
    pub fn standard() -> Self {
        let scan: Arc<dyn TextExtractor> = Arc::new(BinaryScanExtractor::new());
        let mut registry = Self::new();
        registry.register(DocumentKind::Pdf, Arc::new(CommandExtractor::pdftotext()));
        registry.register(DocumentKind::Pdf, scan.clone());
        registry.register(DocumentKind::Docx, Arc::new(CommandExtractor::pandoc()));
        // Extension-based detection cannot tell .doc from .docx
        registry.register(DocumentKind::Docx, Arc::new(CommandExtractor::antiword()));
        registry.register(DocumentKind::Docx, scan.clone());
        registry.register(DocumentKind::Doc, Arc::new(CommandExtractor::antiword()));
        registry.register(DocumentKind::Doc, scan);
        registry
    }

    /// Append an extractor to the chain for `kind`.
    pub fn register(&mut self, kind: DocumentKind, extractor: Arc<dyn TextExtractor>) {
        self.chains.entry(kind).or_default().push(extractor);
    }

    /// Names of the extractors tried for `kind`, in order.
    pub fn chain(&self, kind: DocumentKind) -> Vec<&str> {
        self.chains
            .get(&kind)
            .map(|c| c.iter().map(|e| e.name()).collect())
            .unwrap_or_default()
    }

    /// Run the chain for `kind` until one extractor yields usable text.
    pub async fn extract(&self, kind: DocumentKind, data: &[u8]) -> Option<ExtractedText> {
        let chain = self.chains.get(&kind)?;
        for extractor in chain {
            let Some(raw) = extractor.extract(data).await else {
                continue;
            };
            let text = clean_extracted_text(&raw);
            if text.is_empty() {
                debug!(
                    subsystem = "extract",
                    extractor = extractor.name(),
                    "Extractor output empty after cleaning, trying next"
                );
                continue;
            }
            return Some(ExtractedText {
                text,
                kind,
                extractor: extractor.name().to_string(),
            });
        }
        None
    }
}

impl Default for ExtractionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Downloads a linked document and extracts its text.
#[derive(Clone)]
pub struct DocumentTextService {
    fetcher: DocumentFetcher,
    registry: Arc<ExtractionRegistry>,
}

impl DocumentTextService {
    pub fn new(fetcher: DocumentFetcher, registry: ExtractionRegistry) -> Self {
        Self {
            fetcher,
            registry: Arc::new(registry),
        }
    }

    pub fn fetcher(&self) -> &DocumentFetcher {
        &self.fetcher
    }

    /// Text of the document at `url`.
    ///
    /// Download failures are errors; a document no extractor can read is
    /// `Ok(None)`.
    #[instrument(
        skip(self),
        fields(subsystem = "extract", component = "document_text", op = "extract_url")
    )]
    pub async fn extract_url(&self, url: &str) -> Result<Option<ExtractedText>> {
        let document = self.fetcher.fetch(url).await?;
        let kind = detect_document_kind(url, &document.content_type);
        match self.registry.extract(kind, &document.bytes).await {
            Some(extracted) => {
                info!(
                    kind = kind.as_str(),
                    extractor = extracted.extractor.as_str(),
                    chars = extracted.text.len(),
                    "Extracted document text"
                );
                Ok(Some(extracted))
            }
            None => {
                warn!(
                    kind = kind.as_str(),
                    size = document.bytes.len(),
                    "No extractor produced text"
                );
                Ok(None)
            }
        }
    }
}

impl Default for DocumentTextService {
    fn default() -> Self {
        Self::new(DocumentFetcher::new(), ExtractionRegistry::standard())
    }
}
