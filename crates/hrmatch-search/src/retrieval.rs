//! First stage of matching: nearest-neighbour retrieval.
//!
//! A target (job posting or submission) is looked up, its stored embedding is
//! reused (or its text embedded), and the opposite collection is queried for
//! `min(2K, 100)` neighbours. Distances become similarities, results under the
//! threshold are dropped and every surviving vector id is resolved back to a
//! relational row. Ids that no longer resolve are skipped.
//!
//! Missing targets, text or embeddings are not errors: they produce an empty
//! [`RetrievalResult`] whose [`RetrievalStatus`] says why.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use hrmatch_core::{
    defaults, distance_to_similarity, EmbeddingBackend, EmbeddingMetadataRepository, Error,
    JobPostingRepository, MatchRequest, Result, SearchType, SourceType, SubmissionRepository,
    SubmissionStatus, Vector, VectorHit, VectorQuery, VectorStore,
};

use crate::preprocess::TextPreprocessor;

/// Snippet length kept on each match.
const SNIPPET_CHARS: usize = 300;

/// Why a retrieval produced the matches it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    Completed,
    /// The target row does not exist (or the job is inactive as a candidate)
    NotFound,
    /// The target has no extracted text yet
    MissingText,
    /// No stored embedding and no embedding backend to make one
    MissingEmbedding,
    /// The collection searched holds no documents
    EmptyCollection,
}

impl RetrievalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStatus::Completed => "completed",
            RetrievalStatus::NotFound => "not_found",
            RetrievalStatus::MissingText => "missing_text",
            RetrievalStatus::MissingEmbedding => "missing_embedding",
            RetrievalStatus::EmptyCollection => "empty_collection",
        }
    }
}

/// Relational identity of a target or a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchedEntity {
    Resume {
        submission_id: Uuid,
        candidate_id: Uuid,
        candidate_name: String,
        candidate_email: Option<String>,
        status: SubmissionStatus,
        resume_url: Option<String>,
    },
    Job {
        job_id: i32,
        title: String,
        company_id: i32,
    },
}

impl MatchedEntity {
    /// Id as stored in vector metadata `source_id`.
    pub fn source_id(&self) -> String {
        match self {
            MatchedEntity::Resume { submission_id, .. } => submission_id.to_string(),
            MatchedEntity::Job { job_id, .. } => job_id.to_string(),
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            MatchedEntity::Resume { .. } => SourceType::Resume,
            MatchedEntity::Job { .. } => SourceType::JobDescription,
        }
    }
}

/// The item matches are searched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTarget {
    pub entity: MatchedEntity,
    pub text_length: usize,
    /// Full extracted text, used as the rerank query.
    #[serde(skip)]
    pub text: String,
}

/// One resolved neighbour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedMatch {
    pub entity: MatchedEntity,
    /// Vector store document id
    pub document_id: String,
    pub similarity: f32,
    pub distance: f32,
    pub metadata: serde_json::Value,
    pub snippet: Option<String>,
    /// Candidate text for reranking: the relational text when present,
    /// otherwise the embedded document.
    #[serde(skip)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub min_similarity: f32,
    pub n_results: usize,
    pub search_type: SearchType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalStatistics {
    /// Neighbours returned by the vector store
    pub vector_results: usize,
    pub above_threshold: usize,
    pub validated_in_db: usize,
}

/// Outcome of one retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub status: RetrievalStatus,
    pub target: Option<RetrievalTarget>,
    pub matches: Vec<RetrievedMatch>,
    /// Resolvable matches only
    pub total_found: usize,
    pub search_params: RetrievalParams,
    pub statistics: RetrievalStatistics,
    pub processed_at: DateTime<Utc>,
    pub message: String,
}

impl RetrievalResult {
    fn empty(
        status: RetrievalStatus,
        target: Option<RetrievalTarget>,
        params: RetrievalParams,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            target,
            matches: Vec::new(),
            total_found: 0,
            search_params: params,
            statistics: RetrievalStatistics::default(),
            processed_at: Utc::now(),
            message: message.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RetrievalStatus::Completed
    }

    /// Ordered vector document ids, for comparing runs.
    pub fn document_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.document_id.as_str()).collect()
    }
}

/// Per-target outcome of a batch retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRetrievalItem {
    pub target_id: String,
    pub result: Option<RetrievalResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRetrievalResult {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub items: Vec<BatchRetrievalItem>,
    pub processed_at: DateTime<Utc>,
}

/// Nearest-neighbour retrieval over the resume and job collections.
pub struct Retriever {
    vectors: Arc<dyn VectorStore>,
    submissions: Arc<dyn SubmissionRepository>,
    postings: Arc<dyn JobPostingRepository>,
    embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
    /// Embeds targets that have text but no stored vector.
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    batch_delay: Duration,
}

impl Retriever {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        submissions: Arc<dyn SubmissionRepository>,
        postings: Arc<dyn JobPostingRepository>,
        embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
    ) -> Self {
        Self {
            vectors,
            submissions,
            postings,
            embedding_metadata,
            embedder: None,
            batch_delay: Duration::from_millis(defaults::BATCH_ITEM_DELAY_MS),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    /// Resumes most similar to a job description.
    pub async fn find_matching_resumes_for_job(
        &self,
        job_id: i32,
        request: MatchRequest,
    ) -> Result<RetrievalResult> {
        self.find(SearchType::JobToResumes, &job_id.to_string(), request)
            .await
    }

    /// Active jobs most similar to a resume.
    pub async fn find_matching_jobs_for_resume(
        &self,
        submission_id: Uuid,
        request: MatchRequest,
    ) -> Result<RetrievalResult> {
        self.find(SearchType::ResumeToJobs, &submission_id.to_string(), request)
            .await
    }

    /// Retrieve for one target; `target_id` is a job id or submission UUID.
    #[instrument(
        skip(self, request),
        fields(
            subsystem = "search",
            component = "retrieval",
            op = "find",
            search_type = search_type.as_str(),
            target_id = %target_id,
            top_k = request.top_k,
            min_similarity = request.min_similarity,
        )
    )]
    pub async fn find(
        &self,
        search_type: SearchType,
        target_id: &str,
        request: MatchRequest,
    ) -> Result<RetrievalResult> {
        let start = Instant::now();
        let params = RetrievalParams {
            top_k: request.top_k,
            min_similarity: request.min_similarity,
            n_results: request.n_results(),
            search_type,
        };

        let Some(target) = self.load_target(search_type, target_id).await? else {
            info!("Retrieval target not found");
            return Ok(RetrievalResult::empty(
                RetrievalStatus::NotFound,
                None,
                params,
                format!("{} {} not found", search_type.target_source(), target_id),
            ));
        };
        if target.text.trim().is_empty() {
            warn!("Retrieval target has no extracted text");
            return Ok(RetrievalResult::empty(
                RetrievalStatus::MissingText,
                Some(target),
                params,
                "Target has no extracted text yet",
            ));
        }

        let collection = search_type.candidate_source().collection();
        if self.vectors.count(collection).await? == 0 {
            warn!(collection, "Candidate collection is empty");
            return Ok(RetrievalResult::empty(
                RetrievalStatus::EmptyCollection,
                Some(target),
                params,
                format!("Collection {} is empty", collection),
            ));
        }

        let Some(embedding) = self.target_embedding(search_type, &target).await? else {
            warn!("No embedding stored for retrieval target");
            return Ok(RetrievalResult::empty(
                RetrievalStatus::MissingEmbedding,
                Some(target),
                params,
                "Target embedding not found; generate embeddings first",
            ));
        };

        let response = self
            .vectors
            .query(VectorQuery::by_embedding(collection, embedding, params.n_results))
            .await?;
        let hits = response.hits(0);
        let vector_results = hits.len();

        let mut scored: Vec<(VectorHit, f32, f32)> = hits
            .into_iter()
            .filter_map(|hit| {
                let distance = hit.distance?;
                let similarity = distance_to_similarity(distance);
                trace!(document_id = %hit.id, similarity, "Neighbour");
                (similarity >= request.min_similarity).then_some((hit, similarity, distance))
            })
            .collect();
        // Stable order for identical inputs: similarity desc, then id.
        scored.sort_by(|(a, sa, _), (b, sb, _)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
        let above_threshold = scored.len();

        let mut matches = Vec::with_capacity(request.top_k.min(above_threshold));
        let mut seen = HashSet::new();
        for (hit, similarity, distance) in scored {
            if matches.len() >= request.top_k {
                break;
            }
            let Some(source_id) = source_id_of(&hit) else {
                warn!(document_id = %hit.id, "Vector document has no resolvable source id");
                continue;
            };
            // Several documents may exist for one source during re-indexing.
            if !seen.insert(source_id.clone()) {
                continue;
            }
            match self
                .resolve_candidate(search_type.candidate_source(), &source_id)
                .await?
            {
                Some((entity, relational_text)) => {
                    let document = hit.document.clone().unwrap_or_default();
                    matches.push(RetrievedMatch {
                        entity,
                        document_id: hit.id.clone(),
                        similarity,
                        distance,
                        metadata: hit.metadata.clone().unwrap_or(serde_json::Value::Null),
                        snippet: hit.document.as_deref().map(snippet),
                        text: relational_text.unwrap_or(document),
                    });
                }
                None => {
                    warn!(
                        document_id = %hit.id,
                        source_id = %source_id,
                        "Stale vector id: no matching row, skipping"
                    );
                }
            }
        }

        let total_found = matches.len();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            vector_results,
            above_threshold,
            result_count = total_found,
            duration_ms,
            "Retrieval complete"
        );

        Ok(RetrievalResult {
            status: RetrievalStatus::Completed,
            target: Some(target),
            matches,
            total_found,
            search_params: params,
            statistics: RetrievalStatistics {
                vector_results,
                above_threshold,
                validated_in_db: total_found,
            },
            processed_at: Utc::now(),
            message: format!("Found {} matching candidates", total_found),
        })
    }

    /// Sequential retrieval over many targets with a fixed pause between
    /// items. A failing item is recorded and the batch continues.
    pub async fn find_batch(
        &self,
        search_type: SearchType,
        target_ids: &[String],
        request: MatchRequest,
    ) -> BatchRetrievalResult {
        let mut items = Vec::with_capacity(target_ids.len());
        let mut successful = 0;
        let mut failed = 0;

        for (i, target_id) in target_ids.iter().enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            match self.find(search_type, target_id, request).await {
                Ok(result) => {
                    successful += 1;
                    items.push(BatchRetrievalItem {
                        target_id: target_id.clone(),
                        result: Some(result),
                        error: None,
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        subsystem = "search",
                        component = "retrieval",
                        target_id = %target_id,
                        error = %e,
                        "Batch retrieval item failed"
                    );
                    items.push(BatchRetrievalItem {
                        target_id: target_id.clone(),
                        result: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            subsystem = "search",
            component = "retrieval",
            op = "find_batch",
            total = target_ids.len(),
            successful,
            failed,
            "Batch retrieval complete"
        );
        BatchRetrievalResult {
            total_processed: target_ids.len(),
            successful,
            failed,
            items,
            processed_at: Utc::now(),
        }
    }

    async fn load_target(
        &self,
        search_type: SearchType,
        target_id: &str,
    ) -> Result<Option<RetrievalTarget>> {
        match search_type.target_source() {
            SourceType::JobDescription => {
                let id: i32 = target_id
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid job id: {}", target_id)))?;
                let Some(job) = self.postings.get(id).await? else {
                    return Ok(None);
                };
                let text = job.description_raw_text.clone().unwrap_or_default();
                Ok(Some(RetrievalTarget {
                    entity: MatchedEntity::Job {
                        job_id: job.job_id,
                        title: job.title.clone(),
                        company_id: job.company_id,
                    },
                    text_length: text.chars().count(),
                    text,
                }))
            }
            SourceType::Resume => {
                let id = Uuid::parse_str(target_id).map_err(|_| {
                    Error::InvalidInput(format!("invalid submission id: {}", target_id))
                })?;
                let Some(row) = self.submissions.get_with_candidate(id).await? else {
                    return Ok(None);
                };
                let text = row.submission.resume_raw_text.clone().unwrap_or_default();
                Ok(Some(RetrievalTarget {
                    entity: resume_entity(&row.submission, &row.candidate),
                    text_length: text.chars().count(),
                    text,
                }))
            }
        }
    }

    /// Stored vector for the target, or a fresh embedding of its text.
    async fn target_embedding(
        &self,
        search_type: SearchType,
        target: &RetrievalTarget,
    ) -> Result<Option<Vector>> {
        let source_type = search_type.target_source();
        let source_id = target.entity.source_id();

        if let Some(meta) = self
            .embedding_metadata
            .get_by_source(source_type, &source_id)
            .await?
        {
            if let Some(v) = self
                .vectors
                .get_embedding(&meta.collection_name, &meta.document_id)
                .await?
            {
                debug!(document_id = %meta.document_id, "Reusing stored target embedding");
                return Ok(Some(v));
            }
            warn!(
                document_id = %meta.document_id,
                "Embedding metadata points at a missing vector document"
            );
        }

        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        let text = TextPreprocessor::for_source(source_type).preprocess(&target.text);
        if text.is_empty() {
            return Ok(None);
        }
        debug!("Embedding target text on the fly");
        Ok(embedder.embed_texts(&[text]).await?.into_iter().next())
    }

    /// Resolve a candidate source id to its row and relational text.
    async fn resolve_candidate(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<(MatchedEntity, Option<String>)>> {
        match source_type {
            SourceType::Resume => {
                let Ok(id) = Uuid::parse_str(source_id) else {
                    return Ok(None);
                };
                Ok(self
                    .submissions
                    .get_with_candidate(id)
                    .await?
                    .map(|row| {
                        let entity = resume_entity(&row.submission, &row.candidate);
                        (entity, non_empty(row.submission.resume_raw_text))
                    }))
            }
            SourceType::JobDescription => {
                let Ok(id) = source_id.parse::<i32>() else {
                    return Ok(None);
                };
                Ok(self
                    .postings
                    .get(id)
                    .await?
                    .filter(|job| job.is_active)
                    .map(|job| {
                        let entity = MatchedEntity::Job {
                            job_id: job.job_id,
                            title: job.title.clone(),
                            company_id: job.company_id,
                        };
                        (entity, non_empty(job.description_raw_text))
                    }))
            }
        }
    }
}

fn resume_entity(
    submission: &hrmatch_core::Submission,
    candidate: &hrmatch_core::Candidate,
) -> MatchedEntity {
    MatchedEntity::Resume {
        submission_id: submission.submission_id,
        candidate_id: submission.candidate_id,
        candidate_name: candidate.display_name(),
        candidate_email: candidate.email.clone(),
        status: submission.status,
        resume_url: submission.resume_url.clone(),
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

/// `source_id` from metadata, falling back to the `{prefix}_{id}_{hash}`
/// document id layout.
fn source_id_of(hit: &VectorHit) -> Option<String> {
    hit.source_id().or_else(|| {
        let mut parts = hit.id.splitn(3, '_');
        let prefix = parts.next()?;
        let id = parts.next()?;
        matches!(prefix, "resume" | "job").then(|| id.to_string())
    })
}

fn snippet(document: &str) -> String {
    if document.chars().count() <= SNIPPET_CHARS {
        document.to_string()
    } else {
        let cut: String = document.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut)
    }
}
