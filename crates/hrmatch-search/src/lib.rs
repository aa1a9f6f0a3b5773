//! # hrmatch-search
//!
//! Two-stage applicant/job matching.
//!
//! This crate provides:
//! - Text preprocessing before embedding
//! - Nearest-neighbour retrieval over the resume and job collections
//! - Cross-encoder reranking with score calibration
//! - The search → rerank → persist pipeline with degraded fallbacks
//! - Embedding indexing and orphan cleanup
//!
//! ## Example
//!
//! ```ignore
//! use hrmatch_search::{MatchingPipeline, MatchRequest, RerankStage, Retriever};
//! use hrmatch_db::{Database, PoolConfig};
//!
//! let db = Database::connect("postgres://...", &PoolConfig::for_workers(2)).await?;
//! let retriever = Retriever::new(
//!     db.vectors.clone(),
//!     db.submissions.clone(),
//!     db.postings.clone(),
//!     db.embedding_metadata.clone(),
//! );
//! let rerank = RerankStage::new(Arc::new(HttpRerankBackend::from_env()));
//! let pipeline = MatchingPipeline::new(retriever, rerank, db.analysis.clone())
//!     .with_task_repository(db.tasks.clone());
//!
//! let outcome = pipeline.run_for_job(42, MatchRequest::for_job()).await?;
//! for m in &outcome.matches {
//!     println!("{} {:?}", m.rank_position, m.score);
//! }
//! ```

pub mod indexing;
pub mod pipeline;
pub mod preprocess;
pub mod rerank;
pub mod retrieval;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export core types
pub use hrmatch_core::*;

pub use indexing::{document_id, CleanupReport, EmbeddingIndexer, IndexOutcome, IndexReport};
pub use pipeline::{
    BatchMatchItem, BatchMatchReport, MatchOutcome, MatchingPipeline, PersistStatus,
    PipelineMatch,
};
pub use preprocess::{PreprocessConfig, PreprocessStats, TextPreprocessor};
pub use rerank::{truncate_chars, RerankOutput, RerankStage, RerankedMatch};
pub use retrieval::{
    BatchRetrievalItem, BatchRetrievalResult, MatchedEntity, RetrievalParams, RetrievalResult,
    RetrievalStatistics, RetrievalStatus, RetrievalTarget, RetrievedMatch, Retriever,
};
