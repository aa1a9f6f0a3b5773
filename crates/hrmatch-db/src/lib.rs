//! # hrmatch-db
//!
//! PostgreSQL database layer for hrmatch.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for candidates, submissions, companies,
//!   job postings, embedding provenance, reranker analysis and the task queue
//! - A pgvector-backed [`VectorStore`](hrmatch_core::VectorStore)
//!
//! ## Example
//!
//! ```rust,ignore
//! use hrmatch_db::{Database, JobPostingRepository, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/hrmatch", &PoolConfig::for_workers(2)).await?;
//!     let jobs = db.postings.list_active_with_text(Some(10)).await?;
//!     println!("{} active jobs", jobs.len());
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod candidates;
pub mod companies;
pub mod embedding_metadata;
pub mod pool;
pub mod postings;
pub mod submissions;
pub mod tasks;
pub mod vector_store;

// Test fixtures for integration tests
pub mod test_fixtures;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use sqlx::Row;

// Re-export core types
pub use hrmatch_core::*;

pub use analysis::PgAnalysisRepository;
pub use candidates::PgCandidateRepository;
pub use companies::PgCompanyRepository;
pub use embedding_metadata::PgEmbeddingMetadataRepository;
pub use pool::{create_pool, log_pool_metrics, PoolConfig};
pub use postings::PgJobPostingRepository;
pub use submissions::PgSubmissionRepository;
pub use tasks::PgTaskRepository;
pub use vector_store::PgVectorStore;

/// SHA-256 hex digest of a source text, stored alongside extracted text.
pub fn text_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Map connectivity failures to `Unavailable`, everything else to `Database`.
pub(crate) fn store_error(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            Error::Unavailable(format!("vector store: {}", e))
        }
        other => Error::Database(other),
    }
}

pub(crate) fn parse_stored_hashes(row: &sqlx::postgres::PgRow) -> StoredHashes {
    StoredHashes {
        record_id: row.get("record_id"),
        hashes: ContentHashes {
            content_hash: row
                .get::<Option<String>, _>("content_hash")
                .unwrap_or_default(),
            file_hash: row.get("file_hash"),
            metadata_hash: row
                .get::<Option<String>, _>("metadata_hash")
                .unwrap_or_default(),
            composite_hash: row
                .get::<Option<String>, _>("composite_hash")
                .unwrap_or_default(),
        },
    }
}

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub candidates: Arc<PgCandidateRepository>,
    pub submissions: Arc<PgSubmissionRepository>,
    pub companies: Arc<PgCompanyRepository>,
    pub postings: Arc<PgJobPostingRepository>,
    /// Embedding provenance records.
    pub embedding_metadata: Arc<PgEmbeddingMetadataRepository>,
    /// Reranker analysis results and sessions.
    pub analysis: Arc<PgAnalysisRepository>,
    /// Task queue for background processing.
    pub tasks: Arc<PgTaskRepository>,
    /// pgvector document store.
    pub vectors: Arc<PgVectorStore>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            candidates: Arc::new(PgCandidateRepository::new(pool.clone())),
            submissions: Arc::new(PgSubmissionRepository::new(pool.clone())),
            companies: Arc::new(PgCompanyRepository::new(pool.clone())),
            postings: Arc::new(PgJobPostingRepository::new(pool.clone())),
            embedding_metadata: Arc::new(PgEmbeddingMetadataRepository::new(pool.clone())),
            analysis: Arc::new(PgAnalysisRepository::new(pool.clone())),
            tasks: Arc::new(PgTaskRepository::new(pool.clone())),
            vectors: Arc::new(PgVectorStore::new(pool.clone())),
            pool,
        }
    }

    /// Replace the vector store, e.g. to attach an embedder for text queries.
    pub fn with_vector_store(mut self, store: PgVectorStore) -> Self {
        self.vectors = Arc::new(store);
        self
    }

    /// Connect with a pool sized by `config`.
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_hash_is_sha256_hex() {
        let h = text_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_text_hash_changes_with_text() {
        assert_ne!(text_hash("resume v1"), text_hash("resume v2"));
    }

    #[test]
    fn test_store_error_maps_connectivity_to_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            Error::Unavailable(_)
        ));
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            Error::Database(_)
        ));
    }
}
