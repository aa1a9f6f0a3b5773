//! Keeps the vector collections in step with relational text.
//!
//! Every embedded source has one vector document, id
//! `{resume|job}_{source_id}_{hash8}`, and one provenance row recording the
//! raw-text hash it was built from. A changed hash makes the source stale;
//! re-indexing writes the new document and removes the old one.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use hrmatch_core::{
    defaults, EmbeddingBackend, EmbeddingMetadataRepository, Error, JobPostingRepository,
    NewEmbeddingMetadata, Result, SourceType, SubmissionRepository, SubmissionStatus,
    VectorDocument, VectorStore,
};

use crate::preprocess::TextPreprocessor;

/// What indexing one source did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IndexOutcome {
    Indexed {
        document_id: String,
        /// Previous document removed by this run
        replaced: Option<String>,
    },
    Unchanged { document_id: String },
    SkippedEmptyText,
    SkippedInactive,
    NotFound,
}

/// Totals of an `index_pending` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub stale: usize,
    pub indexed: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Totals of a `cleanup_orphans` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub orphaned: usize,
    pub vectors_removed: u64,
    pub metadata_removed: usize,
}

/// Text and metadata of one source about to be embedded.
struct SourceText {
    raw: String,
    hash: String,
    active: bool,
    metadata: serde_json::Value,
}

/// Embeds sources and records their provenance.
pub struct EmbeddingIndexer {
    embedder: Arc<dyn EmbeddingBackend>,
    vectors: Arc<dyn VectorStore>,
    submissions: Arc<dyn SubmissionRepository>,
    postings: Arc<dyn JobPostingRepository>,
    embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
}

impl EmbeddingIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        vectors: Arc<dyn VectorStore>,
        submissions: Arc<dyn SubmissionRepository>,
        postings: Arc<dyn JobPostingRepository>,
        embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            submissions,
            postings,
            embedding_metadata,
        }
    }

    pub async fn index_resume(&self, submission_id: Uuid) -> Result<IndexOutcome> {
        self.index_source(SourceType::Resume, &submission_id.to_string())
            .await
    }

    pub async fn index_job(&self, job_id: i32) -> Result<IndexOutcome> {
        self.index_source(SourceType::JobDescription, &job_id.to_string())
            .await
    }

    /// Embed one source unless its stored embedding is current.
    #[instrument(
        skip(self),
        fields(
            subsystem = "search",
            component = "indexing",
            op = "index_source",
            source_type = source_type.as_str(),
            model = %self.embedder.model_name(),
        )
    )]
    pub async fn index_source(&self, source_type: SourceType, source_id: &str) -> Result<IndexOutcome> {
        let Some(source) = self.load_source(source_type, source_id).await? else {
            debug!("Source not found");
            return Ok(IndexOutcome::NotFound);
        };
        if !source.active {
            return Ok(IndexOutcome::SkippedInactive);
        }
        if source.raw.trim().is_empty() {
            return Ok(IndexOutcome::SkippedEmptyText);
        }

        let collection = source_type.collection();
        let model = self.embedder.model_name().to_string();
        let existing = self
            .embedding_metadata
            .get_by_source(source_type, source_id)
            .await?;

        if let Some(meta) = &existing {
            let same_text = meta.source_text_hash.as_deref() == Some(source.hash.as_str());
            if same_text
                && meta.model_name == model
                && self
                    .vectors
                    .get_embedding(collection, &meta.document_id)
                    .await?
                    .is_some()
            {
                trace!(document_id = %meta.document_id, "Embedding is current");
                return Ok(IndexOutcome::Unchanged {
                    document_id: meta.document_id.clone(),
                });
            }
        }

        let text = TextPreprocessor::for_source(source_type).preprocess(&source.raw);
        if text.is_empty() {
            return Ok(IndexOutcome::SkippedEmptyText);
        }

        let start = Instant::now();
        let embedding = self
            .embedder
            .embed_texts(std::slice::from_ref(&text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("backend returned no embedding".into()))?;
        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(duration_ms, slow = true, "Slow embedding call");
        }

        let document_id = document_id(source_type, source_id, &source.hash);
        let mut metadata = source.metadata;
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("source_id".into(), json!(source_id));
            obj.insert("source_type".into(), json!(source_type.as_str()));
            obj.insert("model".into(), json!(model));
            obj.insert("text_hash".into(), json!(source.hash));
        }

        self.vectors
            .upsert(
                collection,
                vec![VectorDocument {
                    id: document_id.clone(),
                    document: text.clone(),
                    metadata: metadata.clone(),
                    embedding,
                }],
            )
            .await?;

        let replaced = existing
            .as_ref()
            .map(|m| m.document_id.clone())
            .filter(|old| *old != document_id);
        if let Some(old) = &replaced {
            self.vectors
                .delete(collection, std::slice::from_ref(old))
                .await?;
            debug!(old_document_id = %old, "Removed superseded vector document");
        }

        self.embedding_metadata
            .upsert(&NewEmbeddingMetadata {
                source_type,
                source_id: source_id.to_string(),
                document_id: document_id.clone(),
                collection_name: collection.to_string(),
                text_content: text,
                source_text_hash: Some(source.hash),
                model_name: model,
                additional_metadata: Some(metadata),
            })
            .await?;

        if source_type == SourceType::Resume {
            if let Ok(id) = Uuid::parse_str(source_id) {
                self.submissions
                    .set_status(id, SubmissionStatus::Embedded)
                    .await?;
            }
        }

        info!(document_id = %document_id, duration_ms, "Source embedded");
        Ok(IndexOutcome::Indexed {
            document_id,
            replaced,
        })
    }

    /// Embed every source whose embedding is missing or out of date.
    ///
    /// An unavailable embedding service aborts the run so it can be
    /// retried; other per-source errors are counted and skipped.
    #[instrument(
        skip(self),
        fields(
            subsystem = "search",
            component = "indexing",
            op = "index_pending",
            source_type = source_type.as_str(),
        )
    )]
    pub async fn index_pending(
        &self,
        source_type: SourceType,
        limit: Option<usize>,
    ) -> Result<IndexReport> {
        let mut stale = self.embedding_metadata.stale_sources(source_type).await?;
        if let Some(limit) = limit {
            stale.truncate(limit);
        }

        let mut report = IndexReport {
            stale: stale.len(),
            ..Default::default()
        };
        for source in &stale {
            match self.index_source(source_type, &source.source_id).await {
                Ok(IndexOutcome::Indexed { replaced, .. }) => {
                    report.indexed += 1;
                    if replaced.is_some() {
                        report.replaced += 1;
                    }
                }
                Ok(IndexOutcome::Unchanged { .. }) => report.unchanged += 1,
                Ok(_) => report.skipped += 1,
                Err(e @ Error::Unavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(source_id = %source.source_id, error = %e, "Failed to embed source");
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", source.source_id, e));
                }
            }
        }

        info!(
            stale = report.stale,
            indexed = report.indexed,
            replaced = report.replaced,
            failed = report.failed,
            "Pending embeddings processed"
        );
        Ok(report)
    }

    /// Remove vectors and provenance of sources that are gone or lost their text.
    #[instrument(
        skip(self),
        fields(
            subsystem = "search",
            component = "indexing",
            op = "cleanup_orphans",
            source_type = source_type.as_str(),
        )
    )]
    pub async fn cleanup_orphans(&self, source_type: SourceType) -> Result<CleanupReport> {
        let orphans = self.embedding_metadata.orphaned(source_type).await?;
        let mut report = CleanupReport {
            orphaned: orphans.len(),
            ..Default::default()
        };

        for meta in orphans {
            report.vectors_removed += self
                .vectors
                .delete(&meta.collection_name, std::slice::from_ref(&meta.document_id))
                .await?;
            if self
                .embedding_metadata
                .delete_by_source(source_type, &meta.source_id)
                .await?
            {
                report.metadata_removed += 1;
            }
            trace!(document_id = %meta.document_id, "Orphan removed");
        }

        if report.orphaned > 0 {
            info!(
                orphaned = report.orphaned,
                vectors_removed = report.vectors_removed,
                "Orphaned embeddings removed"
            );
        }
        Ok(report)
    }

    async fn load_source(&self, source_type: SourceType, source_id: &str) -> Result<Option<SourceText>> {
        match source_type {
            SourceType::Resume => {
                let id = Uuid::parse_str(source_id).map_err(|_| {
                    Error::InvalidInput(format!("invalid submission id: {}", source_id))
                })?;
                let Some(row) = self.submissions.get_with_candidate(id).await? else {
                    return Ok(None);
                };
                let raw = row.submission.resume_raw_text.clone().unwrap_or_default();
                let hash = row
                    .submission
                    .resume_text_hash
                    .clone()
                    .unwrap_or_else(|| hrmatch_db::text_hash(&raw));
                Ok(Some(SourceText {
                    metadata: json!({
                        "candidate_id": row.submission.candidate_id.to_string(),
                        "candidate_name": row.candidate.display_name(),
                        "position": row.submission.position,
                    }),
                    raw,
                    hash,
                    active: true,
                }))
            }
            SourceType::JobDescription => {
                let id: i32 = source_id
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid job id: {}", source_id)))?;
                let Some(job) = self.postings.get(id).await? else {
                    return Ok(None);
                };
                let raw = job.description_raw_text.clone().unwrap_or_default();
                let hash = job
                    .description_text_hash
                    .clone()
                    .unwrap_or_else(|| hrmatch_db::text_hash(&raw));
                Ok(Some(SourceText {
                    metadata: json!({
                        "title": job.title,
                        "company_id": job.company_id,
                    }),
                    raw,
                    hash,
                    active: job.is_active,
                }))
            }
        }
    }
}

/// Vector document id for a source at a given text hash.
pub fn document_id(source_type: SourceType, source_id: &str, text_hash: &str) -> String {
    let short: String = text_hash.chars().take(defaults::DOCUMENT_ID_HASH_LEN).collect();
    format!("{}_{}_{}", source_type.document_prefix(), source_id, short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_layout() {
        let hash = hrmatch_db::text_hash("resume text");
        let id = document_id(SourceType::Resume, "abc", &hash);
        assert_eq!(id, format!("resume_abc_{}", &hash[..8]));

        assert_eq!(
            document_id(SourceType::JobDescription, "42", "deadbeefcafe"),
            "job_42_deadbeef"
        );
    }

    #[test]
    fn test_document_id_changes_with_text() {
        let a = document_id(SourceType::Resume, "1", &hrmatch_db::text_hash("v1"));
        let b = document_id(SourceType::Resume, "1", &hrmatch_db::text_hash("v2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_outcome_serialization() {
        let v = serde_json::to_value(IndexOutcome::Unchanged {
            document_id: "job_1_x".into(),
        })
        .unwrap();
        assert_eq!(v["outcome"], "unchanged");
    }
}
