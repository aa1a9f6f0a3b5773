//! Candidate repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use hrmatch_core::{
    Candidate, CandidateRepository, Error, NewCandidate, Result, UpsertOutcome,
};

pub(crate) const CANDIDATE_COLUMNS: &str = "id, first_name, last_name, email, phone, linkedin, \
     city, state, country, created_at, updated_at";

/// PostgreSQL implementation of CandidateRepository.
pub struct PgCandidateRepository {
    pool: Pool<Postgres>,
}

impl PgCandidateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub(crate) fn parse_row(row: &sqlx::postgres::PgRow) -> Candidate {
        Candidate {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            phone: row.get("phone"),
            linkedin: row.get("linkedin"),
            city: row.get("city"),
            state: row.get("state"),
            country: row.get("country"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Lowercased, trimmed email, or `None` when blank.
pub fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

#[async_trait]
impl CandidateRepository for PgCandidateRepository {
    async fn upsert_by_email(&self, c: &NewCandidate) -> Result<UpsertOutcome<Uuid>> {
        let now = Utc::now();
        let email = normalize_email(c.email.as_deref());

        // Without an email there is no natural key; every submission makes a new row.
        let sql = if email.is_some() {
            "INSERT INTO candidate (id, first_name, last_name, email, phone, linkedin, address,
                                    city, state, country, zip_code, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
             ON CONFLICT ((lower(email))) WHERE email IS NOT NULL DO UPDATE SET
                 first_name = COALESCE(EXCLUDED.first_name, candidate.first_name),
                 last_name = COALESCE(EXCLUDED.last_name, candidate.last_name),
                 phone = COALESCE(EXCLUDED.phone, candidate.phone),
                 linkedin = COALESCE(EXCLUDED.linkedin, candidate.linkedin),
                 address = COALESCE(EXCLUDED.address, candidate.address),
                 city = COALESCE(EXCLUDED.city, candidate.city),
                 state = COALESCE(EXCLUDED.state, candidate.state),
                 country = COALESCE(EXCLUDED.country, candidate.country),
                 zip_code = COALESCE(EXCLUDED.zip_code, candidate.zip_code),
                 updated_at = EXCLUDED.updated_at
             RETURNING id, (xmax = 0) AS created"
        } else {
            "INSERT INTO candidate (id, first_name, last_name, email, phone, linkedin, address,
                                    city, state, country, zip_code, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
             RETURNING id, true AS created"
        };

        let row = sqlx::query(sql)
            .bind(Uuid::now_v7())
            .bind(&c.first_name)
            .bind(&c.last_name)
            .bind(&email)
            .bind(&c.phone)
            .bind(&c.linkedin)
            .bind(&c.address)
            .bind(&c.city)
            .bind(&c.state)
            .bind(&c.country)
            .bind(&c.zip_code)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(UpsertOutcome {
            id: row.get("id"),
            created: row.get("created"),
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM candidate WHERE id = $1",
            CANDIDATE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Candidate>> {
        let Some(email) = normalize_email(Some(email)) else {
            return Ok(None);
        };
        let row = sqlx::query(&format!(
            "SELECT {} FROM candidate WHERE lower(email) = $1",
            CANDIDATE_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }
}
