//! Embedding provenance repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use hrmatch_core::{
    EmbeddingMetadata, EmbeddingMetadataRepository, Error, NewEmbeddingMetadata, Result,
    SourceType, StaleSource,
};

const METADATA_COLUMNS: &str = "em.embedding_id, em.source_type, em.source_id, em.document_id, \
     em.collection_name, em.text_content, em.source_text_hash, em.model_name, \
     em.additional_metadata, em.created_at, em.updated_at";

/// PostgreSQL implementation of EmbeddingMetadataRepository.
pub struct PgEmbeddingMetadataRepository {
    pool: Pool<Postgres>,
}

impl PgEmbeddingMetadataRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<EmbeddingMetadata> {
        let source_type: String = row.get("source_type");
        Ok(EmbeddingMetadata {
            embedding_id: row.get("embedding_id"),
            source_type: source_type.parse()?,
            source_id: row.get("source_id"),
            document_id: row.get("document_id"),
            collection_name: row.get("collection_name"),
            text_content: row.get("text_content"),
            source_text_hash: row.get("source_text_hash"),
            model_name: row.get("model_name"),
            additional_metadata: row.get("additional_metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_rows(rows: &[sqlx::postgres::PgRow]) -> Result<Vec<EmbeddingMetadata>> {
        rows.iter().map(Self::parse_row).collect()
    }

    /// Join clause and text predicate for the relational source of a type.
    fn source_join(source_type: SourceType) -> (&'static str, &'static str) {
        match source_type {
            SourceType::Resume => (
                "LEFT JOIN submission src ON src.submission_id::text = em.source_id",
                "src.submission_id IS NOT NULL AND src.resume_raw_text IS NOT NULL \
                 AND btrim(src.resume_raw_text) <> ''",
            ),
            SourceType::JobDescription => (
                "LEFT JOIN job_posting src ON src.job_id::text = em.source_id",
                "src.job_id IS NOT NULL AND src.description_raw_text IS NOT NULL \
                 AND btrim(src.description_raw_text) <> ''",
            ),
        }
    }
}

#[async_trait]
impl EmbeddingMetadataRepository for PgEmbeddingMetadataRepository {
    async fn upsert(&self, meta: &NewEmbeddingMetadata) -> Result<EmbeddingMetadata> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO embedding_metadata AS em (
                 embedding_id, source_type, source_id, document_id, collection_name,
                 text_content, source_text_hash, model_name, additional_metadata,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
             ON CONFLICT (source_type, source_id) DO UPDATE SET
                 document_id = EXCLUDED.document_id,
                 collection_name = EXCLUDED.collection_name,
                 text_content = EXCLUDED.text_content,
                 source_text_hash = EXCLUDED.source_text_hash,
                 model_name = EXCLUDED.model_name,
                 additional_metadata = EXCLUDED.additional_metadata,
                 updated_at = EXCLUDED.updated_at
             RETURNING em.embedding_id, em.source_type, em.source_id, em.document_id,
                       em.collection_name, em.text_content, em.source_text_hash, em.model_name,
                       em.additional_metadata, em.created_at, em.updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(meta.source_type.as_str())
        .bind(&meta.source_id)
        .bind(&meta.document_id)
        .bind(&meta.collection_name)
        .bind(&meta.text_content)
        .bind(&meta.source_text_hash)
        .bind(&meta.model_name)
        .bind(&meta.additional_metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_row(&row)
    }

    async fn get_by_source(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<EmbeddingMetadata>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM embedding_metadata em WHERE em.source_type = $1 AND em.source_id = $2",
            METADATA_COLUMNS
        ))
        .bind(source_type.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_document_id(&self, document_id: &str) -> Result<Option<EmbeddingMetadata>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM embedding_metadata em WHERE em.document_id = $1",
            METADATA_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_collection(
        &self,
        collection: &str,
        limit: i64,
    ) -> Result<Vec<EmbeddingMetadata>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM embedding_metadata em
             WHERE em.collection_name = $1
             ORDER BY em.created_at DESC
             LIMIT $2",
            METADATA_COLUMNS
        ))
        .bind(collection)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(&rows)
    }

    async fn delete_by_source(&self, source_type: SourceType, source_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM embedding_metadata WHERE source_type = $1 AND source_id = $2")
                .bind(source_type.as_str())
                .bind(source_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn sources_without_embeddings(
        &self,
        source_type: SourceType,
        source_ids: &[String],
    ) -> Result<Vec<String>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let missing: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM unnest($2::text[]) AS id
             WHERE NOT EXISTS (
                 SELECT 1 FROM embedding_metadata
                 WHERE source_type = $1 AND source_id = id
             )",
        )
        .bind(source_type.as_str())
        .bind(source_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(missing)
    }

    async fn stale_sources(&self, source_type: SourceType) -> Result<Vec<StaleSource>> {
        let sql = match source_type {
            SourceType::Resume => {
                "SELECT s.submission_id::text AS source_id, em.document_id AS existing_document_id
                 FROM submission s
                 LEFT JOIN embedding_metadata em
                        ON em.source_type = 'resume' AND em.source_id = s.submission_id::text
                 WHERE s.resume_raw_text IS NOT NULL AND btrim(s.resume_raw_text) <> ''
                   AND (em.embedding_id IS NULL
                        OR em.source_text_hash IS DISTINCT FROM s.resume_text_hash)
                 ORDER BY s.created_at ASC"
            }
            SourceType::JobDescription => {
                "SELECT j.job_id::text AS source_id, em.document_id AS existing_document_id
                 FROM job_posting j
                 LEFT JOIN embedding_metadata em
                        ON em.source_type = 'job_description' AND em.source_id = j.job_id::text
                 WHERE j.is_active
                   AND j.description_raw_text IS NOT NULL AND btrim(j.description_raw_text) <> ''
                   AND (em.embedding_id IS NULL
                        OR em.source_text_hash IS DISTINCT FROM j.description_text_hash)
                 ORDER BY j.created_at ASC"
            }
        };

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| StaleSource {
                source_id: row.get("source_id"),
                existing_document_id: row.get("existing_document_id"),
            })
            .collect())
    }

    async fn orphaned(&self, source_type: SourceType) -> Result<Vec<EmbeddingMetadata>> {
        let (join, has_text) = Self::source_join(source_type);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM embedding_metadata em
             {}
             WHERE em.source_type = $1 AND NOT ({})",
            METADATA_COLUMNS, join, has_text
        ))
        .bind(source_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(&rows)
    }
}
