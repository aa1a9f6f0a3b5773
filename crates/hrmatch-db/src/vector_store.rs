//! pgvector-backed vector store.
//!
//! Collections are rows of `vector_document` sharing a `collection` value.
//! Distances are cosine distances (`<=>`), so `1 - distance` is the cosine
//! similarity.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument, warn};

use hrmatch_core::{
    defaults, EmbeddingBackend, Error, Include, QueryInput, Result, VectorDocument, VectorQuery,
    VectorQueryResponse, VectorStore,
};

use crate::store_error;

/// PostgreSQL implementation of VectorStore.
pub struct PgVectorStore {
    pool: Pool<Postgres>,
    dimension: usize,
    /// Embeds text queries.
    embedder: Option<Arc<dyn EmbeddingBackend>>,
}

impl PgVectorStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            dimension: defaults::EMBED_DIMENSION,
            embedder: None,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Enable text queries by attaching an embedding backend.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn check_dimension(&self, id: &str, embedding: &Vector) -> Result<()> {
        let len = embedding.as_slice().len();
        if len != self.dimension {
            return Err(Error::VectorStore(format!(
                "document {} has dimension {}, expected {}",
                id, len, self.dimension
            )));
        }
        Ok(())
    }

    async fn query_embeddings(&self, query: &VectorQuery) -> Result<Vec<Vector>> {
        match &query.input {
            QueryInput::Embeddings(v) => Ok(v.clone()),
            QueryInput::Texts(texts) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    Error::VectorStore("text queries need an embedding backend".into())
                })?;
                embedder.embed_texts(texts).await
            }
        }
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, collection: &str, documents: Vec<VectorDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        for doc in &documents {
            self.check_dimension(&doc.id, &doc.embedding)?;
        }

        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for doc in &documents {
            sqlx::query(
                "INSERT INTO vector_document (id, collection, document, metadata, embedding)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (collection, id) DO UPDATE SET
                     document = EXCLUDED.document,
                     metadata = EXCLUDED.metadata,
                     embedding = EXCLUDED.embedding",
            )
            .bind(&doc.id)
            .bind(collection)
            .bind(&doc.document)
            .bind(&doc.metadata)
            .bind(&doc.embedding)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }
        tx.commit().await.map_err(store_error)?;

        debug!(
            subsystem = "db",
            component = "vector_store",
            op = "upsert",
            collection = %collection,
            input_count = documents.len(),
            "Vector documents upserted"
        );
        Ok(())
    }

    async fn get_embedding(&self, collection: &str, id: &str) -> Result<Option<Vector>> {
        let embedding: Option<Vector> = sqlx::query_scalar(
            "SELECT embedding FROM vector_document WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(embedding)
    }

    #[instrument(
        skip(self, query),
        fields(
            subsystem = "db",
            component = "vector_store",
            op = "query",
            collection = %query.collection,
            n_results = query.n_results,
        )
    )]
    async fn query(&self, query: VectorQuery) -> Result<VectorQueryResponse> {
        let start = Instant::now();
        let embeddings = self.query_embeddings(&query).await?;

        let with_docs = query.includes(Include::Documents);
        let with_metas = query.includes(Include::Metadatas);
        let with_dists = query.includes(Include::Distances);

        let mut response = VectorQueryResponse {
            ids: Vec::with_capacity(embeddings.len()),
            documents: with_docs.then(Vec::new),
            metadatas: with_metas.then(Vec::new),
            distances: with_dists.then(Vec::new),
        };

        for embedding in &embeddings {
            self.check_dimension("<query>", embedding)?;

            let rows = sqlx::query(
                "SELECT id, document, metadata, (embedding <=> $2)::float8 AS distance
                 FROM vector_document
                 WHERE collection = $1
                 ORDER BY embedding <=> $2, id
                 LIMIT $3",
            )
            .bind(&query.collection)
            .bind(embedding)
            .bind(query.n_results as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            response
                .ids
                .push(rows.iter().map(|r| r.get::<String, _>("id")).collect());
            if let Some(docs) = response.documents.as_mut() {
                docs.push(rows.iter().map(|r| r.get("document")).collect());
            }
            if let Some(metas) = response.metadatas.as_mut() {
                metas.push(rows.iter().map(|r| r.get("metadata")).collect());
            }
            if let Some(dists) = response.distances.as_mut() {
                dists.push(
                    rows.iter()
                        .map(|r| r.get::<f64, _>("distance") as f32)
                        .collect(),
                );
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result_count: usize = response.ids.iter().map(Vec::len).sum();
        debug!(result_count, duration_ms, "Vector query complete");
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(duration_ms, slow = true, "Slow vector query");
        }
        Ok(response)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM vector_document WHERE collection = $1 AND id = ANY($2)")
            .bind(collection)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_document WHERE collection = $1")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "vector_store",
                    error = %e,
                    "Vector store health check failed"
                );
                Ok(false)
            }
        }
    }
}
