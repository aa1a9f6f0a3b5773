//! Reranker analysis repository implementation.
//!
//! Each matching run writes its rows under one `processed_at`, so reruns add
//! a new batch instead of overwriting an earlier ranking, and a retried
//! write of the same batch is a no-op.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use hrmatch_core::{
    AnalysisRepository, DailyCount, Error, JobAnalytics, NewAnalysisResult, NewAnalysisSession,
    RerankerAnalysisResult, RerankerAnalysisSession, Result,
};

const RESULT_COLUMNS: &str = "analysis_id, session_id, job_id, submission_id, \
     original_similarity, rerank_score, final_score, score_improvement, rank_position, \
     search_params, reranker_model, workflow_stats, job_title, company_id, candidate_name, \
     candidate_email, total_candidates_found, analysis_type, processed_at, created_at";

const SESSION_COLUMNS: &str = "session_id, session_uuid, job_id, submission_id, company_id, \
     analysis_type, total_results, search_params, reranker_model, session_stats, started_at, \
     completed_at, created_at";

/// PostgreSQL implementation of AnalysisRepository.
pub struct PgAnalysisRepository {
    pool: Pool<Postgres>,
}

impl PgAnalysisRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_result_row(row: &sqlx::postgres::PgRow) -> RerankerAnalysisResult {
        RerankerAnalysisResult {
            analysis_id: row.get("analysis_id"),
            session_id: row.get("session_id"),
            job_id: row.get("job_id"),
            submission_id: row.get("submission_id"),
            original_similarity: row.get("original_similarity"),
            rerank_score: row.get("rerank_score"),
            final_score: row.get("final_score"),
            score_improvement: row.get("score_improvement"),
            rank_position: row.get("rank_position"),
            search_params: row.get("search_params"),
            reranker_model: row.get("reranker_model"),
            workflow_stats: row.get("workflow_stats"),
            job_title: row.get("job_title"),
            company_id: row.get("company_id"),
            candidate_name: row.get("candidate_name"),
            candidate_email: row.get("candidate_email"),
            total_candidates_found: row.get("total_candidates_found"),
            analysis_type: row.get("analysis_type"),
            processed_at: row.get("processed_at"),
            created_at: row.get("created_at"),
        }
    }

    fn parse_session_row(row: &sqlx::postgres::PgRow) -> RerankerAnalysisSession {
        RerankerAnalysisSession {
            session_id: row.get("session_id"),
            session_uuid: row.get("session_uuid"),
            job_id: row.get("job_id"),
            submission_id: row.get("submission_id"),
            company_id: row.get("company_id"),
            analysis_type: row.get("analysis_type"),
            total_results: row.get("total_results"),
            search_params: row.get("search_params"),
            reranker_model: row.get("reranker_model"),
            session_stats: row.get("session_stats"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl AnalysisRepository for PgAnalysisRepository {
    async fn create_session(&self, session: &NewAnalysisSession) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO reranker_analysis_session (
                 session_uuid, job_id, submission_id, company_id, analysis_type,
                 search_params, reranker_model, started_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (session_uuid) DO UPDATE SET session_uuid = EXCLUDED.session_uuid
             RETURNING session_id",
        )
        .bind(session.session_uuid)
        .bind(session.job_id)
        .bind(session.submission_id)
        .bind(session.company_id)
        .bind(&session.analysis_type)
        .bind(&session.search_params)
        .bind(&session.reranker_model)
        .bind(session.started_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "analysis",
            op = "create_session",
            session_id = id,
            analysis_type = %session.analysis_type,
            "Analysis session opened"
        );
        Ok(id)
    }

    async fn complete_session(
        &self,
        session_id: i64,
        total_results: i32,
        stats: JsonValue,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE reranker_analysis_session
             SET total_results = $1, session_stats = $2, completed_at = $3
             WHERE session_id = $4",
        )
        .bind(total_results)
        .bind(&stats)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn insert_results(&self, results: &[NewAnalysisResult]) -> Result<u64> {
        if results.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0u64;

        for r in results {
            let outcome = sqlx::query(
                "INSERT INTO reranker_analysis_result (
                     session_id, job_id, submission_id, original_similarity, rerank_score,
                     final_score, score_improvement, rank_position, search_params,
                     reranker_model, workflow_stats, job_title, company_id, candidate_name,
                     candidate_email, total_candidates_found, analysis_type, processed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                         $17, $18)
                 ON CONFLICT (job_id, submission_id, processed_at) DO NOTHING",
            )
            .bind(r.session_id)
            .bind(r.job_id)
            .bind(r.submission_id)
            .bind(r.original_similarity)
            .bind(r.rerank_score)
            .bind(r.final_score)
            .bind(r.score_improvement)
            .bind(r.rank_position)
            .bind(&r.search_params)
            .bind(&r.reranker_model)
            .bind(&r.workflow_stats)
            .bind(&r.job_title)
            .bind(r.company_id)
            .bind(&r.candidate_name)
            .bind(&r.candidate_email)
            .bind(r.total_candidates_found)
            .bind(&r.analysis_type)
            .bind(r.processed_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            inserted += outcome.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "analysis",
            op = "insert_results",
            result_count = results.len(),
            inserted,
            "Analysis results stored"
        );
        Ok(inserted)
    }

    async fn get_by_job(&self, job_id: i32, limit: i64) -> Result<Vec<RerankerAnalysisResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reranker_analysis_result
             WHERE job_id = $1
             ORDER BY processed_at DESC, rank_position ASC
             LIMIT $2",
            RESULT_COLUMNS
        ))
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_result_row).collect())
    }

    async fn get_by_submission(
        &self,
        submission_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RerankerAnalysisResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reranker_analysis_result
             WHERE submission_id = $1
             ORDER BY processed_at DESC, final_score DESC
             LIMIT $2",
            RESULT_COLUMNS
        ))
        .bind(submission_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_result_row).collect())
    }

    async fn get_latest_by_job(&self, job_id: i32) -> Result<Vec<RerankerAnalysisResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reranker_analysis_result
             WHERE job_id = $1
               AND processed_at = (
                   SELECT MAX(processed_at) FROM reranker_analysis_result WHERE job_id = $1
               )
             ORDER BY rank_position ASC",
            RESULT_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_result_row).collect())
    }

    async fn get_top_candidates_for_job(
        &self,
        job_id: i32,
        limit: i64,
        min_rerank_score: Option<f64>,
    ) -> Result<Vec<RerankerAnalysisResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reranker_analysis_result
             WHERE job_id = $1
               AND processed_at = (
                   SELECT MAX(processed_at) FROM reranker_analysis_result WHERE job_id = $1
               )
               AND ($3::float8 IS NULL OR rerank_score >= $3)
             ORDER BY final_score DESC, rank_position ASC
             LIMIT $2",
            RESULT_COLUMNS
        ))
        .bind(job_id)
        .bind(limit)
        .bind(min_rerank_score)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_result_row).collect())
    }

    async fn get_analytics_by_job(&self, job_id: i32) -> Result<JobAnalytics> {
        let summary = sqlx::query(
            "SELECT COUNT(*) AS total,
                    AVG(rerank_score) AS avg_rerank,
                    AVG(score_improvement) AS avg_improvement,
                    MAX(final_score) AS top_score
             FROM reranker_analysis_result
             WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let by_date = sqlx::query(
            "SELECT (processed_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS count
             FROM reranker_analysis_result
             WHERE job_id = $1
             GROUP BY day
             ORDER BY day ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(JobAnalytics {
            job_id,
            total_analyses: summary.get("total"),
            avg_rerank_score: summary.get("avg_rerank"),
            avg_improvement: summary.get("avg_improvement"),
            top_score: summary.get("top_score"),
            analyses_by_date: by_date
                .iter()
                .map(|row| DailyCount {
                    date: row.get("day"),
                    count: row.get("count"),
                })
                .collect(),
        })
    }

    async fn get_recent_sessions(&self, limit: i64) -> Result<Vec<RerankerAnalysisSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reranker_analysis_session
             ORDER BY started_at DESC
             LIMIT $1",
            SESSION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_session_row).collect())
    }
}
