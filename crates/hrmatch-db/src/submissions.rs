//! Submission repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use hrmatch_core::{
    ContentHashes, Error, NewSubmission, Result, StoredHashes, Submission, SubmissionRepository,
    SubmissionStatus, SubmissionWithCandidate, UpsertOutcome,
};

use crate::candidates::{PgCandidateRepository, CANDIDATE_COLUMNS};
use crate::text_hash;

const SUBMISSION_COLUMNS: &str = "submission_id, candidate_id, form_submission_id, status, \
     position, current_company, current_role, years_experience, min_salary, max_salary, \
     salary_currency, education_level, field_of_study, university, graduation_year, \
     core_competency, preferred_role_type, preferred_industry, work_preference, \
     willing_to_relocate, us_work_authorized, visa_sponsorship_required, resume_url, \
     resume_raw_text, resume_text_hash, submitted_at, last_updated, created_at, updated_at";

/// PostgreSQL implementation of SubmissionRepository.
pub struct PgSubmissionRepository {
    pool: Pool<Postgres>,
}

impl PgSubmissionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Submission {
        let status: String = row.get("status");
        Submission {
            submission_id: row.get("submission_id"),
            candidate_id: row.get("candidate_id"),
            form_submission_id: row.get("form_submission_id"),
            status: status.parse().unwrap_or_default(),
            position: row.get("position"),
            current_company: row.get("current_company"),
            current_role: row.get("current_role"),
            years_experience: row.get("years_experience"),
            min_salary: row.get("min_salary"),
            max_salary: row.get("max_salary"),
            salary_currency: row.get("salary_currency"),
            education_level: row.get("education_level"),
            field_of_study: row.get("field_of_study"),
            university: row.get("university"),
            graduation_year: row.get("graduation_year"),
            core_competency: row.get("core_competency"),
            preferred_role_type: row.get("preferred_role_type"),
            preferred_industry: row.get("preferred_industry"),
            work_preference: row.get("work_preference"),
            willing_to_relocate: row.get("willing_to_relocate"),
            us_work_authorized: row.get("us_work_authorized"),
            visa_sponsorship_required: row.get("visa_sponsorship_required"),
            resume_url: row.get("resume_url"),
            resume_raw_text: row.get("resume_raw_text"),
            resume_text_hash: row.get("resume_text_hash"),
            submitted_at: row.get("submitted_at"),
            last_updated: row.get("last_updated"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SubmissionRepository for PgSubmissionRepository {
    async fn upsert_from_form(
        &self,
        candidate_id: Uuid,
        s: &NewSubmission,
        hashes: &ContentHashes,
    ) -> Result<UpsertOutcome<Uuid>> {
        if s.form_submission_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "submission has no form submission id".into(),
            ));
        }
        let now = Utc::now();

        // A new resume link invalidates the extracted text.
        let row = sqlx::query(
            "INSERT INTO submission (
                 submission_id, candidate_id, form_submission_id, status, position,
                 current_company, current_role, years_experience, min_salary, max_salary,
                 salary_currency, education_level, field_of_study, university, graduation_year,
                 core_competency, preferred_role_type, preferred_industry, work_preference,
                 willing_to_relocate, us_work_authorized, visa_sponsorship_required, resume_url,
                 content_hash, file_hash, metadata_hash, composite_hash,
                 submitted_at, last_updated, created_at, updated_at)
             VALUES ($1, $2, $3, 'submitted', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $29)
             ON CONFLICT (form_submission_id) DO UPDATE SET
                 candidate_id = EXCLUDED.candidate_id,
                 position = EXCLUDED.position,
                 current_company = EXCLUDED.current_company,
                 current_role = EXCLUDED.current_role,
                 years_experience = EXCLUDED.years_experience,
                 min_salary = EXCLUDED.min_salary,
                 max_salary = EXCLUDED.max_salary,
                 salary_currency = EXCLUDED.salary_currency,
                 education_level = EXCLUDED.education_level,
                 field_of_study = EXCLUDED.field_of_study,
                 university = EXCLUDED.university,
                 graduation_year = EXCLUDED.graduation_year,
                 core_competency = EXCLUDED.core_competency,
                 preferred_role_type = EXCLUDED.preferred_role_type,
                 preferred_industry = EXCLUDED.preferred_industry,
                 work_preference = EXCLUDED.work_preference,
                 willing_to_relocate = EXCLUDED.willing_to_relocate,
                 us_work_authorized = EXCLUDED.us_work_authorized,
                 visa_sponsorship_required = EXCLUDED.visa_sponsorship_required,
                 resume_raw_text = CASE WHEN submission.resume_url IS DISTINCT FROM EXCLUDED.resume_url
                                        THEN NULL ELSE submission.resume_raw_text END,
                 resume_text_hash = CASE WHEN submission.resume_url IS DISTINCT FROM EXCLUDED.resume_url
                                         THEN NULL ELSE submission.resume_text_hash END,
                 status = CASE WHEN submission.resume_url IS DISTINCT FROM EXCLUDED.resume_url
                               THEN 'submitted' ELSE submission.status END,
                 resume_url = EXCLUDED.resume_url,
                 content_hash = EXCLUDED.content_hash,
                 file_hash = COALESCE(EXCLUDED.file_hash, submission.file_hash),
                 metadata_hash = EXCLUDED.metadata_hash,
                 composite_hash = EXCLUDED.composite_hash,
                 submitted_at = COALESCE(EXCLUDED.submitted_at, submission.submitted_at),
                 last_updated = EXCLUDED.last_updated,
                 updated_at = EXCLUDED.updated_at
             RETURNING submission_id, (xmax = 0) AS created",
        )
        .bind(Uuid::now_v7())
        .bind(candidate_id)
        .bind(s.form_submission_id.trim())
        .bind(&s.position)
        .bind(&s.current_company)
        .bind(&s.current_role)
        .bind(s.years_experience)
        .bind(s.min_salary)
        .bind(s.max_salary)
        .bind(&s.salary_currency)
        .bind(&s.education_level)
        .bind(&s.field_of_study)
        .bind(&s.university)
        .bind(s.graduation_year)
        .bind(&s.core_competency)
        .bind(&s.preferred_role_type)
        .bind(&s.preferred_industry)
        .bind(&s.work_preference)
        .bind(&s.willing_to_relocate)
        .bind(s.us_work_authorized.unwrap_or(false))
        .bind(s.visa_sponsorship_required.unwrap_or(false))
        .bind(&s.resume_url)
        .bind(&hashes.content_hash)
        .bind(&hashes.file_hash)
        .bind(&hashes.metadata_hash)
        .bind(&hashes.composite_hash)
        .bind(s.submitted_at)
        .bind(s.last_updated)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(UpsertOutcome {
            id: row.get("submission_id"),
            created: row.get("created"),
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM submission WHERE submission_id = $1",
            SUBMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn get_with_candidate(&self, id: Uuid) -> Result<Option<SubmissionWithCandidate>> {
        let Some(submission) = self.get(id).await? else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "SELECT {} FROM candidate WHERE id = $1",
            CANDIDATE_COLUMNS
        ))
        .bind(submission.candidate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(|r| SubmissionWithCandidate {
            candidate: PgCandidateRepository::parse_row(r),
            submission,
        }))
    }

    async fn list_needing_text(&self, limit: i64) -> Result<Vec<Submission>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM submission
             WHERE resume_url IS NOT NULL AND btrim(resume_url) <> ''
               AND resume_raw_text IS NULL
               AND status <> 'failed'
             ORDER BY created_at ASC
             LIMIT $1",
            SUBMISSION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn set_resume_text(&self, id: Uuid, text: &str) -> Result<()> {
        let hash = text_hash(text);
        let result = sqlx::query(
            "UPDATE submission
             SET resume_raw_text = $1, resume_text_hash = $2, status = 'parsed', updated_at = $3
             WHERE submission_id = $4",
        )
        .bind(text)
        .bind(&hash)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("submission {}", id)));
        }
        debug!(
            subsystem = "db",
            component = "submissions",
            op = "set_resume_text",
            submission_id = %id,
            text_len = text.len(),
            "Stored resume text"
        );
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SubmissionStatus) -> Result<()> {
        sqlx::query("UPDATE submission SET status = $1, updated_at = $2 WHERE submission_id = $3")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_with_text(&self, limit: Option<i64>) -> Result<Vec<Submission>> {
        // LIMIT NULL means no limit.
        let rows = sqlx::query(&format!(
            "SELECT {} FROM submission
             WHERE resume_raw_text IS NOT NULL AND btrim(resume_raw_text) <> ''
             ORDER BY created_at ASC
             LIMIT $1",
            SUBMISSION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn latest_form_update(&self) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(COALESCE(last_updated, submitted_at)) FROM submission")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(latest)
    }

    async fn existing_hashes(&self) -> Result<Vec<StoredHashes>> {
        let rows = sqlx::query(
            "SELECT submission_id::text AS record_id, content_hash, file_hash, metadata_hash,
                    composite_hash
             FROM submission
             WHERE composite_hash IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(crate::parse_stored_hashes).collect())
    }
}
