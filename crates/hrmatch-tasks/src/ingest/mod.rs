//! Form submission ingestion.
//!
//! New and updated submissions are pulled from the form API, mapped through
//! the declarative schemas, checked against stored fingerprints and upserted
//! as candidates/submissions or companies/job postings.

pub mod dedup;
pub mod form_api;
pub mod schema;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use hrmatch_core::{
    CandidateRepository, CompanyRepository, ContentHashes, Error, JobPostingRepository, Result,
    StoredHashes, SubmissionRepository,
};

use crate::extraction::DocumentFetcher;

pub use dedup::{DuplicateKind, DuplicateMatch};
pub use form_api::{FormApiClient, FormApiConfig, FormQuestion, FormSubmission};
pub use schema::{
    apply_schema, map_job, map_resume, AddressField, Coercion, FieldMapping, MappedJob,
    MappedResume, Target, JOB_SCHEMA, RESUME_SCHEMA,
};

/// Counts from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub created: usize,
    pub updated: usize,
    pub duplicates: usize,
    pub failed: usize,
}

enum Disposition {
    Created,
    Updated,
    Duplicate,
}

/// Pulls form submissions into the applicant and employer tables.
pub struct Ingestor {
    forms: FormApiClient,
    candidates: Arc<dyn CandidateRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    companies: Arc<dyn CompanyRepository>,
    postings: Arc<dyn JobPostingRepository>,
    file_fetcher: Option<DocumentFetcher>,
}

impl Ingestor {
    pub fn new(
        forms: FormApiClient,
        candidates: Arc<dyn CandidateRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        companies: Arc<dyn CompanyRepository>,
        postings: Arc<dyn JobPostingRepository>,
    ) -> Self {
        Self {
            forms,
            candidates,
            submissions,
            companies,
            postings,
            file_fetcher: None,
        }
    }

    /// Download attached files to fingerprint their contents.
    pub fn with_file_hashing(mut self, fetcher: DocumentFetcher) -> Self {
        self.file_fetcher = Some(fetcher);
        self
    }

    /// Ingest applicant submissions updated since the newest stored one.
    #[instrument(skip(self), fields(subsystem = "ingest", component = "ingestor", op = "ingest_resumes"))]
    pub async fn ingest_resumes(&self) -> Result<IngestReport> {
        let start = Instant::now();
        let after = self.submissions.latest_form_update().await?;
        let delivered = self.forms.fetch_resume_submissions(after).await?;
        let mut existing = self.submissions.existing_hashes().await?;

        let mut report = IngestReport {
            received: delivered.len(),
            ..Default::default()
        };
        for submission in &delivered {
            let outcome = self.ingest_resume(submission, &mut existing).await;
            tally(&mut report, &submission.submission_id, outcome)?;
        }

        info!(
            received = report.received,
            created = report.created,
            updated = report.updated,
            duplicates = report.duplicates,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Resume ingestion complete"
        );
        Ok(report)
    }

    /// Ingest employer submissions updated since the newest stored posting.
    #[instrument(skip(self), fields(subsystem = "ingest", component = "ingestor", op = "ingest_jobs"))]
    pub async fn ingest_jobs(&self) -> Result<IngestReport> {
        let start = Instant::now();
        let after = self.postings.latest_form_update().await?;
        let delivered = self.forms.fetch_job_submissions(after).await?;
        let mut existing = self.postings.existing_hashes().await?;

        let mut report = IngestReport {
            received: delivered.len(),
            ..Default::default()
        };
        for submission in &delivered {
            let outcome = self.ingest_job(submission, &mut existing).await;
            tally(&mut report, &submission.submission_id, outcome)?;
        }

        info!(
            received = report.received,
            created = report.created,
            updated = report.updated,
            duplicates = report.duplicates,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job ingestion complete"
        );
        Ok(report)
    }

    async fn ingest_resume(
        &self,
        submission: &FormSubmission,
        existing: &mut Vec<StoredHashes>,
    ) -> Result<Disposition> {
        require_id(submission)?;
        let mapped = map_resume(submission)?;
        let hashes = self
            .fingerprint(
                RESUME_SCHEMA,
                submission,
                mapped.submission.resume_url.as_deref(),
            )
            .await;
        if let Some(duplicate) = dedup::find_duplicate(&hashes, existing) {
            log_duplicate(submission, &duplicate);
            return Ok(Disposition::Duplicate);
        }

        let candidate = self.candidates.upsert_by_email(&mapped.candidate).await?;
        let stored = self
            .submissions
            .upsert_from_form(candidate.id, &mapped.submission, &hashes)
            .await?;
        existing.push(StoredHashes {
            record_id: stored.id.to_string(),
            hashes,
        });

        debug!(
            form_submission_id = submission.submission_id.as_str(),
            submission_id = %stored.id,
            created = stored.created,
            "Stored resume submission"
        );
        Ok(if stored.created {
            Disposition::Created
        } else {
            Disposition::Updated
        })
    }

    async fn ingest_job(
        &self,
        submission: &FormSubmission,
        existing: &mut Vec<StoredHashes>,
    ) -> Result<Disposition> {
        require_id(submission)?;
        let mapped = map_job(submission)?;
        if mapped.postings.is_empty() {
            return Err(Error::InvalidInput(format!(
                "submission {} has no vacancy title",
                submission.submission_id
            )));
        }
        let main_file = mapped
            .postings
            .iter()
            .find(|p| p.vacancy_slot == 1)
            .and_then(|p| p.description_url.as_deref());
        let hashes = self.fingerprint(JOB_SCHEMA, submission, main_file).await;
        if let Some(duplicate) = dedup::find_duplicate(&hashes, existing) {
            log_duplicate(submission, &duplicate);
            return Ok(Disposition::Duplicate);
        }

        let company = self.companies.upsert_by_name(&mapped.company).await?;
        let mut any_created = false;
        for posting in &mapped.postings {
            let stored = self
                .postings
                .upsert_from_form(company.id, posting, &hashes)
                .await?;
            any_created |= stored.created;
            existing.push(StoredHashes {
                record_id: stored.id.to_string(),
                hashes: hashes.clone(),
            });
            debug!(
                form_submission_id = submission.submission_id.as_str(),
                job_id = stored.id,
                slot = posting.vacancy_slot,
                created = stored.created,
                "Stored job posting"
            );
        }

        Ok(if any_created {
            Disposition::Created
        } else {
            Disposition::Updated
        })
    }

    async fn fingerprint(
        &self,
        schema: &[FieldMapping],
        submission: &FormSubmission,
        file_url: Option<&str>,
    ) -> ContentHashes {
        let content = dedup::content_fields(&apply_schema(schema, submission));
        let metadata = dedup::metadata_fields(submission);
        let file_hash = match (&self.file_fetcher, file_url) {
            (Some(fetcher), Some(url)) => match fetcher.fetch(url).await {
                Ok(document) => Some(dedup::hash_bytes(&document.bytes)),
                Err(e) => {
                    warn!(
                        form_submission_id = submission.submission_id.as_str(),
                        error = %e,
                        "Could not fingerprint attached file"
                    );
                    None
                }
            },
            _ => None,
        };
        dedup::compute_hashes(&content, &metadata, file_hash)
    }
}

fn require_id(submission: &FormSubmission) -> Result<()> {
    if submission.submission_id.trim().is_empty() {
        return Err(Error::InvalidInput("submission without id".into()));
    }
    Ok(())
}

fn log_duplicate(submission: &FormSubmission, duplicate: &DuplicateMatch) {
    debug!(
        form_submission_id = submission.submission_id.as_str(),
        existing = duplicate.record_id.as_str(),
        kind = duplicate.kind.as_str(),
        confidence = duplicate.kind.confidence(),
        "Skipping duplicate submission"
    );
}

/// Count one submission. Transient failures abort the run so the task retries;
/// bad records are counted and skipped.
fn tally(report: &mut IngestReport, id: &str, outcome: Result<Disposition>) -> Result<()> {
    match outcome {
        Ok(Disposition::Created) => report.created += 1,
        Ok(Disposition::Updated) => report.updated += 1,
        Ok(Disposition::Duplicate) => report.duplicates += 1,
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => {
            warn!(form_submission_id = id, error = %e, "Skipping submission");
            report.failed += 1;
        }
    }
    Ok(())
}
