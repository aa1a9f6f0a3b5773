//! Company repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};

use hrmatch_core::{Company, CompanyRepository, Error, NewCompany, Result, UpsertOutcome};

/// PostgreSQL implementation of CompanyRepository.
pub struct PgCompanyRepository {
    pool: Pool<Postgres>,
}

impl PgCompanyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Company {
        Company {
            company_id: row.get("company_id"),
            name: row.get("name"),
            industry: row.get("industry"),
            company_size: row.get("company_size"),
            website: row.get("website"),
            description: row.get("description"),
            city: row.get("city"),
            country: row.get("country"),
            contact_name: row.get("contact_name"),
            contact_email: row.get("contact_email"),
            contact_phone: row.get("contact_phone"),
            contact_position: row.get("contact_position"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl CompanyRepository for PgCompanyRepository {
    async fn upsert_by_name(&self, c: &NewCompany) -> Result<UpsertOutcome<i32>> {
        let name = c
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidInput("company has no name".into()))?;

        let row = sqlx::query(
            "INSERT INTO company (name, industry, company_size, website, description, address,
                                  city, country, postal_code, contact_name, contact_email,
                                  contact_phone, contact_position, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
             ON CONFLICT ((lower(name))) DO UPDATE SET
                 industry = COALESCE(EXCLUDED.industry, company.industry),
                 company_size = COALESCE(EXCLUDED.company_size, company.company_size),
                 website = COALESCE(EXCLUDED.website, company.website),
                 description = COALESCE(EXCLUDED.description, company.description),
                 address = COALESCE(EXCLUDED.address, company.address),
                 city = COALESCE(EXCLUDED.city, company.city),
                 country = COALESCE(EXCLUDED.country, company.country),
                 postal_code = COALESCE(EXCLUDED.postal_code, company.postal_code),
                 contact_name = COALESCE(EXCLUDED.contact_name, company.contact_name),
                 contact_email = COALESCE(EXCLUDED.contact_email, company.contact_email),
                 contact_phone = COALESCE(EXCLUDED.contact_phone, company.contact_phone),
                 contact_position = COALESCE(EXCLUDED.contact_position, company.contact_position),
                 updated_at = EXCLUDED.updated_at
             RETURNING company_id, (xmax = 0) AS created",
        )
        .bind(name)
        .bind(&c.industry)
        .bind(&c.company_size)
        .bind(&c.website)
        .bind(&c.description)
        .bind(&c.address)
        .bind(&c.city)
        .bind(&c.country)
        .bind(&c.postal_code)
        .bind(&c.contact_name)
        .bind(&c.contact_email)
        .bind(&c.contact_phone)
        .bind(&c.contact_position)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(UpsertOutcome {
            id: row.get("company_id"),
            created: row.get("created"),
        })
    }

    async fn get(&self, id: i32) -> Result<Option<Company>> {
        let row = sqlx::query(
            "SELECT company_id, name, industry, company_size, website, description, city, country,
                    contact_name, contact_email, contact_phone, contact_position,
                    created_at, updated_at
             FROM company WHERE company_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }
}
