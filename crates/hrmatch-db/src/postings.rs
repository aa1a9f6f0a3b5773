//! Job posting repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::info;

use hrmatch_core::{
    ContentHashes, Error, JobPosting, JobPostingRepository, NewJobPosting, Result, StoredHashes,
    UpsertOutcome,
};

use crate::text_hash;

const POSTING_COLUMNS: &str = "job_id, company_id, form_submission_id, title, description, \
     description_url, description_raw_text, description_text_hash, requirements, \
     responsibilities, employment_type, experience_level, location, remote_work, salary_min, \
     salary_max, salary_currency, is_active, created_at, updated_at";

/// PostgreSQL implementation of JobPostingRepository.
pub struct PgJobPostingRepository {
    pool: Pool<Postgres>,
}

impl PgJobPostingRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> JobPosting {
        JobPosting {
            job_id: row.get("job_id"),
            company_id: row.get("company_id"),
            form_submission_id: row.get("form_submission_id"),
            title: row.get("title"),
            description: row.get("description"),
            description_url: row.get("description_url"),
            description_raw_text: row.get("description_raw_text"),
            description_text_hash: row.get("description_text_hash"),
            requirements: row.get("requirements"),
            responsibilities: row.get("responsibilities"),
            employment_type: row.get("employment_type"),
            experience_level: row.get("experience_level"),
            location: row.get("location"),
            remote_work: row.get("remote_work"),
            salary_min: row.get("salary_min"),
            salary_max: row.get("salary_max"),
            salary_currency: row.get("salary_currency"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl JobPostingRepository for PgJobPostingRepository {
    async fn upsert_from_form(
        &self,
        company_id: i32,
        p: &NewJobPosting,
        hashes: &ContentHashes,
    ) -> Result<UpsertOutcome<i32>> {
        let title = p
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidInput("job posting has no title".into()))?;
        let slot = p.vacancy_slot.max(1);

        // Postings without a description document use the inline description as text.
        let inline_text = if p.description_url.is_none() {
            p.description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
        } else {
            None
        };
        let inline_hash = inline_text.map(text_hash);

        let row = sqlx::query(
            "INSERT INTO job_posting (
                 company_id, form_submission_id, vacancy_slot, title, description, description_url,
                 description_raw_text, description_text_hash, requirements, responsibilities,
                 employment_type, experience_level, location, remote_work, salary_min, salary_max,
                 salary_currency, content_hash, file_hash, metadata_hash, composite_hash,
                 form_last_updated, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                     $18, $19, $20, $21, $22, $23, $23)
             ON CONFLICT (form_submission_id, vacancy_slot) DO UPDATE SET
                 company_id = EXCLUDED.company_id,
                 title = EXCLUDED.title,
                 description = EXCLUDED.description,
                 description_raw_text = CASE
                     WHEN EXCLUDED.description_raw_text IS NOT NULL THEN EXCLUDED.description_raw_text
                     WHEN job_posting.description_url IS DISTINCT FROM EXCLUDED.description_url THEN NULL
                     ELSE job_posting.description_raw_text END,
                 description_text_hash = CASE
                     WHEN EXCLUDED.description_raw_text IS NOT NULL THEN EXCLUDED.description_text_hash
                     WHEN job_posting.description_url IS DISTINCT FROM EXCLUDED.description_url THEN NULL
                     ELSE job_posting.description_text_hash END,
                 description_url = EXCLUDED.description_url,
                 requirements = EXCLUDED.requirements,
                 responsibilities = EXCLUDED.responsibilities,
                 employment_type = EXCLUDED.employment_type,
                 experience_level = EXCLUDED.experience_level,
                 location = EXCLUDED.location,
                 remote_work = EXCLUDED.remote_work,
                 salary_min = EXCLUDED.salary_min,
                 salary_max = EXCLUDED.salary_max,
                 salary_currency = EXCLUDED.salary_currency,
                 content_hash = EXCLUDED.content_hash,
                 file_hash = COALESCE(EXCLUDED.file_hash, job_posting.file_hash),
                 metadata_hash = EXCLUDED.metadata_hash,
                 composite_hash = EXCLUDED.composite_hash,
                 form_last_updated = EXCLUDED.form_last_updated,
                 is_active = true,
                 updated_at = EXCLUDED.updated_at
             RETURNING job_id, (xmax = 0) AS created",
        )
        .bind(company_id)
        .bind(&p.form_submission_id)
        .bind(slot)
        .bind(title)
        .bind(&p.description)
        .bind(&p.description_url)
        .bind(inline_text)
        .bind(&inline_hash)
        .bind(&p.requirements)
        .bind(&p.responsibilities)
        .bind(&p.employment_type)
        .bind(&p.experience_level)
        .bind(&p.location)
        .bind(p.remote_work.unwrap_or(false))
        .bind(p.salary_min)
        .bind(p.salary_max)
        .bind(&p.salary_currency)
        .bind(&hashes.content_hash)
        .bind(&hashes.file_hash)
        .bind(&hashes.metadata_hash)
        .bind(&hashes.composite_hash)
        .bind(p.form_last_updated)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(UpsertOutcome {
            id: row.get("job_id"),
            created: row.get("created"),
        })
    }

    async fn get(&self, id: i32) -> Result<Option<JobPosting>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job_posting WHERE job_id = $1",
            POSTING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_needing_text(&self, limit: i64) -> Result<Vec<JobPosting>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_posting
             WHERE description_url IS NOT NULL AND btrim(description_url) <> ''
               AND description_raw_text IS NULL
               AND is_active
             ORDER BY created_at ASC
             LIMIT $1",
            POSTING_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn set_description_text(&self, id: i32, text: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_posting
             SET description_raw_text = $1, description_text_hash = $2, updated_at = $3
             WHERE job_id = $4",
        )
        .bind(text)
        .bind(text_hash(text))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    async fn list_active_with_text(&self, limit: Option<i64>) -> Result<Vec<JobPosting>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_posting
             WHERE is_active
               AND description_raw_text IS NOT NULL AND btrim(description_raw_text) <> ''
             ORDER BY created_at ASC
             LIMIT $1",
            POSTING_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn deactivate(&self, id: i32) -> Result<()> {
        sqlx::query("UPDATE job_posting SET is_active = false, updated_at = $1 WHERE job_id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "postings",
            op = "deactivate",
            job_id = id,
            "Job posting deactivated"
        );
        Ok(())
    }

    async fn latest_form_update(&self) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(form_last_updated) FROM job_posting")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(latest)
    }

    async fn existing_hashes(&self) -> Result<Vec<StoredHashes>> {
        let rows = sqlx::query(
            "SELECT job_id::text AS record_id, content_hash, file_hash, metadata_hash,
                    composite_hash
             FROM job_posting
             WHERE composite_hash IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(crate::parse_stored_hashes).collect())
    }
}
