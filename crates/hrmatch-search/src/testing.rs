//! In-memory repositories and vector store for tests.
//!
//! Each fake implements the same `hrmatch_core` trait as its Postgres
//! counterpart with the same observable semantics (upsert keys, stale and
//! orphan detection, claim ordering), so services can be exercised without a
//! database. [`TestStore`] wires one of each together like `Database` does.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hrmatch_core::{
    AnalysisRepository, Candidate, CandidateRepository, Company, CompanyRepository,
    ContentHashes, DailyCount, EmbeddingMetadata, EmbeddingMetadataRepository, Error, Include,
    JobAnalytics, JobPosting, JobPostingRepository, NewAnalysisResult, NewAnalysisSession,
    NewCandidate, NewCompany, NewEmbeddingMetadata, NewJobPosting, NewSubmission, NewTask,
    QueryInput, QueueStats, RerankerAnalysisResult, RerankerAnalysisSession, Result, SourceType,
    StaleSource, StoredHashes, Submission, SubmissionRepository, SubmissionStatus,
    SubmissionWithCandidate, Task, TaskQueue, TaskRepository, TaskStatus, TaskType,
    UpsertOutcome, Vector, VectorDocument, VectorQuery, VectorQueryResponse, VectorStore,
};
use hrmatch_db::text_hash;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn check_available(flag: &AtomicBool, what: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        Err(Error::Unavailable(format!("{} offline", what)))
    } else {
        Ok(())
    }
}

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Brute-force cosine vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, BTreeMap<String, VectorDocument>>>,
    unavailable: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Error::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a document directly, bypassing any indexer.
    pub fn insert(
        &self,
        collection: &str,
        id: &str,
        document: &str,
        metadata: JsonValue,
        embedding: Vec<f32>,
    ) {
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(
                id.to_string(),
                VectorDocument {
                    id: id.to_string(),
                    document: document.to_string(),
                    metadata,
                    embedding: Vector::from(embedding),
                },
            );
    }

    pub fn ids(&self, collection: &str) -> Vec<String> {
        lock(&self.collections)
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<VectorDocument> {
        lock(&self.collections)
            .get(collection)
            .and_then(|c| c.get(id).cloned())
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, documents: Vec<VectorDocument>) -> Result<()> {
        check_available(&self.unavailable, "vector store")?;
        let mut collections = lock(&self.collections);
        let target = collections.entry(collection.to_string()).or_default();
        for doc in documents {
            target.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    async fn get_embedding(&self, collection: &str, id: &str) -> Result<Option<Vector>> {
        check_available(&self.unavailable, "vector store")?;
        Ok(self.document(collection, id).map(|d| d.embedding))
    }

    async fn query(&self, query: VectorQuery) -> Result<VectorQueryResponse> {
        check_available(&self.unavailable, "vector store")?;
        let QueryInput::Embeddings(embeddings) = &query.input else {
            return Err(Error::VectorStore(
                "text queries need an embedding backend".into(),
            ));
        };

        let collections = lock(&self.collections);
        let docs: Vec<&VectorDocument> = collections
            .get(&query.collection)
            .map(|c| c.values().collect())
            .unwrap_or_default();

        let mut response = VectorQueryResponse {
            ids: Vec::new(),
            documents: query.includes(Include::Documents).then(Vec::new),
            metadatas: query.includes(Include::Metadatas).then(Vec::new),
            distances: query.includes(Include::Distances).then(Vec::new),
        };

        for embedding in embeddings {
            let mut scored: Vec<(f32, &VectorDocument)> = docs
                .iter()
                .map(|d| (cosine_distance(embedding.as_slice(), d.embedding.as_slice()), *d))
                .collect();
            scored.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
            scored.truncate(query.n_results);

            response.ids.push(scored.iter().map(|(_, d)| d.id.clone()).collect());
            if let Some(documents) = response.documents.as_mut() {
                documents.push(scored.iter().map(|(_, d)| d.document.clone()).collect());
            }
            if let Some(metadatas) = response.metadatas.as_mut() {
                metadatas.push(scored.iter().map(|(_, d)| d.metadata.clone()).collect());
            }
            if let Some(distances) = response.distances.as_mut() {
                distances.push(scored.iter().map(|(dist, _)| *dist).collect());
            }
        }
        Ok(response)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64> {
        check_available(&self.unavailable, "vector store")?;
        let mut collections = lock(&self.collections);
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| target.remove(*id).is_some()).count() as u64)
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        check_available(&self.unavailable, "vector store")?;
        Ok(lock(&self.collections)
            .get(collection)
            .map_or(0, |c| c.len() as i64))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }
}

// =============================================================================
// CANDIDATES & SUBMISSIONS
// =============================================================================

#[derive(Default)]
pub struct InMemoryCandidateRepository {
    rows: Mutex<Vec<Candidate>>,
}

impl InMemoryCandidateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate directly.
    pub fn add(&self, first_name: &str, last_name: &str, email: Option<&str>) -> Candidate {
        let now = Utc::now();
        let candidate = Candidate {
            id: Uuid::now_v7(),
            first_name: Some(first_name.to_string()).filter(|s| !s.is_empty()),
            last_name: Some(last_name.to_string()).filter(|s| !s.is_empty()),
            email: email.map(str::to_string),
            phone: None,
            linkedin: None,
            city: None,
            state: None,
            country: None,
            created_at: now,
            updated_at: now,
        };
        lock(&self.rows).push(candidate.clone());
        candidate
    }

    pub fn all(&self) -> Vec<Candidate> {
        lock(&self.rows).clone()
    }
}

#[async_trait]
impl CandidateRepository for InMemoryCandidateRepository {
    async fn upsert_by_email(&self, c: &NewCandidate) -> Result<UpsertOutcome<Uuid>> {
        let email = c
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        let now = Utc::now();
        let mut rows = lock(&self.rows);

        if let Some(email) = &email {
            if let Some(existing) = rows
                .iter_mut()
                .find(|r| r.email.as_deref() == Some(email.as_str()))
            {
                if c.first_name.is_some() {
                    existing.first_name = c.first_name.clone();
                }
                if c.last_name.is_some() {
                    existing.last_name = c.last_name.clone();
                }
                if c.phone.is_some() {
                    existing.phone = c.phone.clone();
                }
                if c.city.is_some() {
                    existing.city = c.city.clone();
                }
                existing.updated_at = now;
                return Ok(UpsertOutcome {
                    id: existing.id,
                    created: false,
                });
            }
        }

        let id = Uuid::now_v7();
        rows.push(Candidate {
            id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            email,
            phone: c.phone.clone(),
            linkedin: c.linkedin.clone(),
            city: c.city.clone(),
            state: c.state.clone(),
            country: c.country.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(UpsertOutcome { id, created: true })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>> {
        Ok(lock(&self.rows).iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Candidate>> {
        let email = email.trim().to_lowercase();
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.email.as_deref() == Some(email.as_str()))
            .cloned())
    }
}

struct SubmissionRow {
    submission: Submission,
    hashes: ContentHashes,
}

pub struct InMemorySubmissionRepository {
    candidates: Arc<InMemoryCandidateRepository>,
    rows: Mutex<Vec<SubmissionRow>>,
}

impl InMemorySubmissionRepository {
    pub fn new(candidates: Arc<InMemoryCandidateRepository>) -> Self {
        Self {
            candidates,
            rows: Mutex::new(Vec::new()),
        }
    }

    /// Insert a submission for `candidate_id` with optional resume text.
    pub fn add(&self, candidate_id: Uuid, text: Option<&str>) -> Submission {
        let mut submission = blank_submission(candidate_id, &Uuid::new_v4().to_string());
        if let Some(text) = text {
            submission.resume_raw_text = Some(text.to_string());
            submission.resume_text_hash = Some(text_hash(text));
            submission.status = SubmissionStatus::Parsed;
        }
        lock(&self.rows).push(SubmissionRow {
            submission: submission.clone(),
            hashes: ContentHashes::default(),
        });
        submission
    }

    /// Delete a submission, leaving any embeddings behind.
    pub fn remove(&self, id: Uuid) {
        lock(&self.rows).retain(|r| r.submission.submission_id != id);
    }

    pub fn all(&self) -> Vec<Submission> {
        lock(&self.rows)
            .iter()
            .map(|r| r.submission.clone())
            .collect()
    }

    pub fn set_resume_url(&self, id: Uuid, url: &str) {
        if let Some(row) = lock(&self.rows)
            .iter_mut()
            .find(|r| r.submission.submission_id == id)
        {
            row.submission.resume_url = Some(url.to_string());
        }
    }
}

fn blank_submission(candidate_id: Uuid, form_submission_id: &str) -> Submission {
    let now = Utc::now();
    Submission {
        submission_id: Uuid::now_v7(),
        candidate_id,
        form_submission_id: form_submission_id.to_string(),
        status: SubmissionStatus::Submitted,
        position: None,
        current_company: None,
        current_role: None,
        years_experience: None,
        min_salary: None,
        max_salary: None,
        salary_currency: None,
        education_level: None,
        field_of_study: None,
        university: None,
        graduation_year: None,
        core_competency: None,
        preferred_role_type: None,
        preferred_industry: None,
        work_preference: None,
        willing_to_relocate: None,
        us_work_authorized: false,
        visa_sponsorship_required: false,
        resume_url: None,
        resume_raw_text: None,
        resume_text_hash: None,
        submitted_at: None,
        last_updated: None,
        created_at: now,
        updated_at: now,
    }
}

fn apply_new_submission(row: &mut Submission, s: &NewSubmission) {
    if row.resume_url != s.resume_url {
        row.resume_raw_text = None;
        row.resume_text_hash = None;
    }
    row.position = s.position.clone();
    row.current_company = s.current_company.clone();
    row.current_role = s.current_role.clone();
    row.years_experience = s.years_experience;
    row.min_salary = s.min_salary;
    row.max_salary = s.max_salary;
    row.salary_currency = s.salary_currency.clone();
    row.education_level = s.education_level.clone();
    row.field_of_study = s.field_of_study.clone();
    row.university = s.university.clone();
    row.graduation_year = s.graduation_year;
    row.core_competency = s.core_competency.clone();
    row.preferred_role_type = s.preferred_role_type.clone();
    row.preferred_industry = s.preferred_industry.clone();
    row.work_preference = s.work_preference.clone();
    row.willing_to_relocate = s.willing_to_relocate.clone();
    row.us_work_authorized = s.us_work_authorized.unwrap_or(false);
    row.visa_sponsorship_required = s.visa_sponsorship_required.unwrap_or(false);
    row.resume_url = s.resume_url.clone();
    row.submitted_at = s.submitted_at;
    row.last_updated = s.last_updated;
    row.updated_at = Utc::now();
}

#[async_trait]
impl SubmissionRepository for InMemorySubmissionRepository {
    async fn upsert_from_form(
        &self,
        candidate_id: Uuid,
        s: &NewSubmission,
        hashes: &ContentHashes,
    ) -> Result<UpsertOutcome<Uuid>> {
        let mut rows = lock(&self.rows);
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.submission.form_submission_id == s.form_submission_id)
        {
            row.submission.candidate_id = candidate_id;
            apply_new_submission(&mut row.submission, s);
            row.hashes = hashes.clone();
            return Ok(UpsertOutcome {
                id: row.submission.submission_id,
                created: false,
            });
        }

        let mut submission = blank_submission(candidate_id, &s.form_submission_id);
        apply_new_submission(&mut submission, s);
        let id = submission.submission_id;
        rows.push(SubmissionRow {
            submission,
            hashes: hashes.clone(),
        });
        Ok(UpsertOutcome { id, created: true })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.submission.submission_id == id)
            .map(|r| r.submission.clone()))
    }

    async fn get_with_candidate(&self, id: Uuid) -> Result<Option<SubmissionWithCandidate>> {
        let Some(submission) = SubmissionRepository::get(self, id).await? else {
            return Ok(None);
        };
        let Some(candidate) = self.candidates.get(submission.candidate_id).await? else {
            return Ok(None);
        };
        Ok(Some(SubmissionWithCandidate {
            submission,
            candidate,
        }))
    }

    async fn list_needing_text(&self, limit: i64) -> Result<Vec<Submission>> {
        Ok(lock(&self.rows)
            .iter()
            .map(|r| &r.submission)
            .filter(|s| s.resume_url.is_some() && !s.has_text())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_resume_text(&self, id: Uuid, text: &str) -> Result<()> {
        let mut rows = lock(&self.rows);
        let row = rows
            .iter_mut()
            .find(|r| r.submission.submission_id == id)
            .ok_or_else(|| Error::NotFound(format!("submission {}", id)))?;
        row.submission.resume_raw_text = Some(text.to_string());
        row.submission.resume_text_hash = Some(text_hash(text));
        row.submission.status = SubmissionStatus::Parsed;
        row.submission.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SubmissionStatus) -> Result<()> {
        if let Some(row) = lock(&self.rows)
            .iter_mut()
            .find(|r| r.submission.submission_id == id)
        {
            row.submission.status = status;
        }
        Ok(())
    }

    async fn list_with_text(&self, limit: Option<i64>) -> Result<Vec<Submission>> {
        let rows = lock(&self.rows);
        let with_text = rows.iter().map(|r| &r.submission).filter(|s| s.has_text());
        Ok(match limit {
            Some(limit) => with_text.take(limit.max(0) as usize).cloned().collect(),
            None => with_text.cloned().collect(),
        })
    }

    async fn latest_form_update(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(lock(&self.rows)
            .iter()
            .filter_map(|r| r.submission.last_updated.or(r.submission.submitted_at))
            .max())
    }

    async fn existing_hashes(&self) -> Result<Vec<StoredHashes>> {
        Ok(lock(&self.rows)
            .iter()
            .map(|r| StoredHashes {
                record_id: r.submission.submission_id.to_string(),
                hashes: r.hashes.clone(),
            })
            .collect())
    }
}

// =============================================================================
// COMPANIES & JOB POSTINGS
// =============================================================================

#[derive(Default)]
pub struct InMemoryCompanyRepository {
    rows: Mutex<Vec<Company>>,
    next_id: AtomicI32,
}

impl InMemoryCompanyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Company> {
        lock(&self.rows).clone()
    }
}

#[async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn upsert_by_name(&self, c: &NewCompany) -> Result<UpsertOutcome<i32>> {
        let name = c
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidInput("company has no name".into()))?;
        let mut rows = lock(&self.rows);
        let now = Utc::now();

        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.name.to_lowercase() == name.to_lowercase())
        {
            if c.industry.is_some() {
                existing.industry = c.industry.clone();
            }
            if c.website.is_some() {
                existing.website = c.website.clone();
            }
            if c.contact_email.is_some() {
                existing.contact_email = c.contact_email.clone();
            }
            existing.updated_at = now;
            return Ok(UpsertOutcome {
                id: existing.company_id,
                created: false,
            });
        }

        let company_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        rows.push(Company {
            company_id,
            name: name.to_string(),
            industry: c.industry.clone(),
            company_size: c.company_size.clone(),
            website: c.website.clone(),
            description: c.description.clone(),
            city: c.city.clone(),
            country: c.country.clone(),
            contact_name: c.contact_name.clone(),
            contact_email: c.contact_email.clone(),
            contact_phone: c.contact_phone.clone(),
            contact_position: c.contact_position.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(UpsertOutcome {
            id: company_id,
            created: true,
        })
    }

    async fn get(&self, id: i32) -> Result<Option<Company>> {
        Ok(lock(&self.rows).iter().find(|r| r.company_id == id).cloned())
    }
}

struct PostingRow {
    posting: JobPosting,
    vacancy_slot: i32,
    form_last_updated: Option<DateTime<Utc>>,
    hashes: ContentHashes,
}

#[derive(Default)]
pub struct InMemoryJobPostingRepository {
    rows: Mutex<Vec<PostingRow>>,
    next_id: AtomicI32,
}

impl InMemoryJobPostingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a posting directly.
    pub fn add(&self, company_id: i32, title: &str, text: Option<&str>, active: bool) -> JobPosting {
        let now = Utc::now();
        let posting = JobPosting {
            job_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            company_id,
            form_submission_id: None,
            title: title.to_string(),
            description: None,
            description_url: None,
            description_raw_text: text.map(str::to_string),
            description_text_hash: text.map(text_hash),
            requirements: None,
            responsibilities: None,
            employment_type: None,
            experience_level: None,
            location: None,
            remote_work: false,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
            is_active: active,
            created_at: now,
            updated_at: now,
        };
        lock(&self.rows).push(PostingRow {
            posting: posting.clone(),
            vacancy_slot: 1,
            form_last_updated: None,
            hashes: ContentHashes::default(),
        });
        posting
    }

    pub fn remove(&self, id: i32) {
        lock(&self.rows).retain(|r| r.posting.job_id != id);
    }

    pub fn all(&self) -> Vec<JobPosting> {
        lock(&self.rows).iter().map(|r| r.posting.clone()).collect()
    }

    pub fn set_description_url(&self, id: i32, url: &str) {
        if let Some(row) = lock(&self.rows).iter_mut().find(|r| r.posting.job_id == id) {
            row.posting.description_url = Some(url.to_string());
        }
    }

    /// Set the free-text description field submitted with the form.
    pub fn set_description(&self, id: i32, description: &str) {
        if let Some(row) = lock(&self.rows).iter_mut().find(|r| r.posting.job_id == id) {
            row.posting.description = Some(description.to_string());
        }
    }
}

#[async_trait]
impl JobPostingRepository for InMemoryJobPostingRepository {
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
            .ok_or_else(|| Error::InvalidInput("job posting has no title".into()))?
            .to_string();
        let slot = p.vacancy_slot.max(1);
        let inline_text = if p.description_url.is_none() {
            p.description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
        } else {
            None
        };

        let mut rows = lock(&self.rows);
        let now = Utc::now();
        let existing = rows.iter().position(|r| {
            r.posting.form_submission_id.is_some()
                && r.posting.form_submission_id == p.form_submission_id
                && r.vacancy_slot == slot
        });

        let (index, created) = match existing {
            Some(index) => (index, false),
            None => {
                let job_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                rows.push(PostingRow {
                    posting: JobPosting {
                        job_id,
                        company_id,
                        form_submission_id: p.form_submission_id.clone(),
                        title: title.clone(),
                        description: None,
                        description_url: None,
                        description_raw_text: None,
                        description_text_hash: None,
                        requirements: None,
                        responsibilities: None,
                        employment_type: None,
                        experience_level: None,
                        location: None,
                        remote_work: false,
                        salary_min: None,
                        salary_max: None,
                        salary_currency: None,
                        is_active: true,
                        created_at: now,
                        updated_at: now,
                    },
                    vacancy_slot: slot,
                    form_last_updated: None,
                    hashes: ContentHashes::default(),
                });
                (rows.len() - 1, true)
            }
        };

        let row = &mut rows[index];
        row.form_last_updated = p.form_last_updated;
        let posting = &mut row.posting;
        if inline_text.is_some() {
            posting.description_text_hash = inline_text.as_deref().map(text_hash);
            posting.description_raw_text = inline_text;
        } else if posting.description_url != p.description_url {
            posting.description_raw_text = None;
            posting.description_text_hash = None;
        }
        posting.company_id = company_id;
        posting.title = title;
        posting.description = p.description.clone();
        posting.description_url = p.description_url.clone();
        posting.requirements = p.requirements.clone();
        posting.responsibilities = p.responsibilities.clone();
        posting.employment_type = p.employment_type.clone();
        posting.experience_level = p.experience_level.clone();
        posting.location = p.location.clone();
        posting.remote_work = p.remote_work.unwrap_or(false);
        posting.salary_min = p.salary_min;
        posting.salary_max = p.salary_max;
        posting.salary_currency = p.salary_currency.clone();
        posting.updated_at = now;
        row.hashes = hashes.clone();

        Ok(UpsertOutcome {
            id: row.posting.job_id,
            created,
        })
    }

    async fn get(&self, id: i32) -> Result<Option<JobPosting>> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.posting.job_id == id)
            .map(|r| r.posting.clone()))
    }

    async fn list_needing_text(&self, limit: i64) -> Result<Vec<JobPosting>> {
        Ok(lock(&self.rows)
            .iter()
            .map(|r| &r.posting)
            .filter(|p| p.is_active && p.description_url.is_some() && !p.has_text())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_description_text(&self, id: i32, text: &str) -> Result<()> {
        let mut rows = lock(&self.rows);
        let row = rows
            .iter_mut()
            .find(|r| r.posting.job_id == id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        row.posting.description_raw_text = Some(text.to_string());
        row.posting.description_text_hash = Some(text_hash(text));
        row.posting.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active_with_text(&self, limit: Option<i64>) -> Result<Vec<JobPosting>> {
        let rows = lock(&self.rows);
        let active = rows
            .iter()
            .map(|r| &r.posting)
            .filter(|p| p.is_active && p.has_text());
        Ok(match limit {
            Some(limit) => active.take(limit.max(0) as usize).cloned().collect(),
            None => active.cloned().collect(),
        })
    }

    async fn deactivate(&self, id: i32) -> Result<()> {
        if let Some(row) = lock(&self.rows).iter_mut().find(|r| r.posting.job_id == id) {
            row.posting.is_active = false;
        }
        Ok(())
    }

    async fn latest_form_update(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(lock(&self.rows)
            .iter()
            .filter_map(|r| r.form_last_updated)
            .max())
    }

    async fn existing_hashes(&self) -> Result<Vec<StoredHashes>> {
        Ok(lock(&self.rows)
            .iter()
            .map(|r| StoredHashes {
                record_id: r.posting.job_id.to_string(),
                hashes: r.hashes.clone(),
            })
            .collect())
    }
}

// =============================================================================
// EMBEDDING PROVENANCE
// =============================================================================

pub struct InMemoryEmbeddingMetadataRepository {
    rows: Mutex<Vec<EmbeddingMetadata>>,
    submissions: Arc<InMemorySubmissionRepository>,
    postings: Arc<InMemoryJobPostingRepository>,
}

impl InMemoryEmbeddingMetadataRepository {
    pub fn new(
        submissions: Arc<InMemorySubmissionRepository>,
        postings: Arc<InMemoryJobPostingRepository>,
    ) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            submissions,
            postings,
        }
    }

    pub fn all(&self) -> Vec<EmbeddingMetadata> {
        lock(&self.rows).clone()
    }

    /// `(source_id, current text hash)` of every source that has text.
    fn sources_with_text(&self, source_type: SourceType) -> Vec<(String, Option<String>)> {
        match source_type {
            SourceType::Resume => self
                .submissions
                .all()
                .into_iter()
                .filter(|s| s.has_text())
                .map(|s| (s.submission_id.to_string(), s.resume_text_hash))
                .collect(),
            SourceType::JobDescription => self
                .postings
                .all()
                .into_iter()
                .filter(|p| p.is_active && p.has_text())
                .map(|p| (p.job_id.to_string(), p.description_text_hash))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingMetadataRepository for InMemoryEmbeddingMetadataRepository {
    async fn upsert(&self, meta: &NewEmbeddingMetadata) -> Result<EmbeddingMetadata> {
        let mut rows = lock(&self.rows);
        let now = Utc::now();
        if rows
            .iter()
            .any(|r| r.document_id == meta.document_id && r.source_id != meta.source_id)
        {
            return Err(Error::InvalidInput(format!(
                "document id {} belongs to another source",
                meta.document_id
            )));
        }

        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.source_type == meta.source_type && r.source_id == meta.source_id)
        {
            row.document_id = meta.document_id.clone();
            row.collection_name = meta.collection_name.clone();
            row.text_content = meta.text_content.clone();
            row.source_text_hash = meta.source_text_hash.clone();
            row.model_name = meta.model_name.clone();
            row.additional_metadata = meta.additional_metadata.clone();
            row.updated_at = now;
            return Ok(row.clone());
        }

        let row = EmbeddingMetadata {
            embedding_id: Uuid::now_v7(),
            source_type: meta.source_type,
            source_id: meta.source_id.clone(),
            document_id: meta.document_id.clone(),
            collection_name: meta.collection_name.clone(),
            text_content: meta.text_content.clone(),
            source_text_hash: meta.source_text_hash.clone(),
            model_name: meta.model_name.clone(),
            additional_metadata: meta.additional_metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn get_by_source(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<EmbeddingMetadata>> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.source_type == source_type && r.source_id == source_id)
            .cloned())
    }

    async fn get_by_document_id(&self, document_id: &str) -> Result<Option<EmbeddingMetadata>> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.document_id == document_id)
            .cloned())
    }

    async fn get_by_collection(
        &self,
        collection: &str,
        limit: i64,
    ) -> Result<Vec<EmbeddingMetadata>> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|r| r.collection_name == collection)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_by_source(&self, source_type: SourceType, source_id: &str) -> Result<bool> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|r| !(r.source_type == source_type && r.source_id == source_id));
        Ok(rows.len() < before)
    }

    async fn sources_without_embeddings(
        &self,
        source_type: SourceType,
        source_ids: &[String],
    ) -> Result<Vec<String>> {
        let rows = lock(&self.rows);
        Ok(source_ids
            .iter()
            .filter(|id| {
                !rows
                    .iter()
                    .any(|r| r.source_type == source_type && &r.source_id == *id)
            })
            .cloned()
            .collect())
    }

    async fn stale_sources(&self, source_type: SourceType) -> Result<Vec<StaleSource>> {
        let sources = self.sources_with_text(source_type);
        let rows = lock(&self.rows);
        Ok(sources
            .into_iter()
            .filter_map(|(source_id, hash)| {
                let existing = rows
                    .iter()
                    .find(|r| r.source_type == source_type && r.source_id == source_id);
                match existing {
                    Some(meta) if meta.source_text_hash == hash => None,
                    Some(meta) => Some(StaleSource {
                        source_id,
                        existing_document_id: Some(meta.document_id.clone()),
                    }),
                    None => Some(StaleSource {
                        source_id,
                        existing_document_id: None,
                    }),
                }
            })
            .collect())
    }

    async fn orphaned(&self, source_type: SourceType) -> Result<Vec<EmbeddingMetadata>> {
        let live: Vec<String> = self
            .sources_with_text(source_type)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        Ok(lock(&self.rows)
            .iter()
            .filter(|r| r.source_type == source_type && !live.contains(&r.source_id))
            .cloned()
            .collect())
    }
}

// =============================================================================
// ANALYSIS
// =============================================================================

#[derive(Default)]
pub struct InMemoryAnalysisRepository {
    sessions: Mutex<Vec<RerankerAnalysisSession>>,
    results: Mutex<Vec<RerankerAnalysisResult>>,
    next_id: AtomicI64,
    failing: AtomicBool,
    failing_inserts: AtomicBool,
}

impl InMemoryAnalysisRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes fail with a database-style error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only `insert_results`; sessions can still be opened and completed.
    pub fn set_failing_inserts(&self, failing: bool) {
        self.failing_inserts.store(failing, Ordering::SeqCst);
    }

    pub fn results(&self) -> Vec<RerankerAnalysisResult> {
        lock(&self.results).clone()
    }

    pub fn sessions(&self) -> Vec<RerankerAnalysisSession> {
        lock(&self.sessions).clone()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Unavailable("analysis store offline".into()))
        } else {
            Ok(())
        }
    }

    fn latest_run(rows: &[RerankerAnalysisResult], job_id: i32) -> Vec<RerankerAnalysisResult> {
        let latest = rows
            .iter()
            .filter(|r| r.job_id == job_id)
            .map(|r| r.processed_at)
            .max();
        let mut run: Vec<RerankerAnalysisResult> = rows
            .iter()
            .filter(|r| r.job_id == job_id && Some(r.processed_at) == latest)
            .cloned()
            .collect();
        run.sort_by_key(|r| r.rank_position);
        run
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryAnalysisRepository {
    async fn create_session(&self, s: &NewAnalysisSession) -> Result<i64> {
        self.check_writable()?;
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.iter().find(|e| e.session_uuid == s.session_uuid) {
            return Ok(existing.session_id);
        }
        let session_id = self.next_id();
        sessions.push(RerankerAnalysisSession {
            session_id,
            session_uuid: s.session_uuid,
            job_id: s.job_id,
            submission_id: s.submission_id,
            company_id: s.company_id,
            analysis_type: s.analysis_type.clone(),
            total_results: 0,
            search_params: s.search_params.clone(),
            reranker_model: s.reranker_model.clone(),
            session_stats: None,
            started_at: s.started_at,
            completed_at: None,
            created_at: Utc::now(),
        });
        Ok(session_id)
    }

    async fn complete_session(
        &self,
        session_id: i64,
        total_results: i32,
        stats: JsonValue,
    ) -> Result<()> {
        self.check_writable()?;
        if let Some(s) = lock(&self.sessions)
            .iter_mut()
            .find(|s| s.session_id == session_id)
        {
            s.total_results = total_results;
            s.session_stats = Some(stats);
            s.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_results(&self, results: &[NewAnalysisResult]) -> Result<u64> {
        self.check_writable()?;
        if self.failing_inserts.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("analysis result table locked".into()));
        }
        if let Some(bad) = results
            .iter()
            .find(|r| !(0.0..=1.0).contains(&r.original_similarity) || r.rank_position < 1)
        {
            return Err(Error::InvalidInput(format!(
                "analysis row violates constraints: rank {} similarity {}",
                bad.rank_position, bad.original_similarity
            )));
        }

        let mut rows = lock(&self.results);
        let mut inserted = 0;
        for r in results {
            let duplicate = rows.iter().any(|e| {
                e.job_id == r.job_id
                    && e.submission_id == r.submission_id
                    && e.processed_at == r.processed_at
            });
            if duplicate {
                continue;
            }
            let analysis_id = self.next_id();
            rows.push(RerankerAnalysisResult {
                analysis_id,
                session_id: r.session_id,
                job_id: r.job_id,
                submission_id: r.submission_id,
                original_similarity: r.original_similarity,
                rerank_score: r.rerank_score,
                final_score: r.final_score,
                score_improvement: r.score_improvement,
                rank_position: r.rank_position,
                search_params: r.search_params.clone(),
                reranker_model: r.reranker_model.clone(),
                workflow_stats: Some(r.workflow_stats.clone()),
                job_title: r.job_title.clone(),
                company_id: r.company_id,
                candidate_name: r.candidate_name.clone(),
                candidate_email: r.candidate_email.clone(),
                total_candidates_found: r.total_candidates_found,
                analysis_type: r.analysis_type.clone(),
                processed_at: r.processed_at,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_by_job(&self, job_id: i32, limit: i64) -> Result<Vec<RerankerAnalysisResult>> {
        let mut rows: Vec<RerankerAnalysisResult> = lock(&self.results)
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.processed_at
                .cmp(&a.processed_at)
                .then(a.rank_position.cmp(&b.rank_position))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn get_by_submission(
        &self,
        submission_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RerankerAnalysisResult>> {
        let mut rows: Vec<RerankerAnalysisResult> = lock(&self.results)
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.processed_at
                .cmp(&a.processed_at)
                .then(a.rank_position.cmp(&b.rank_position))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn get_latest_by_job(&self, job_id: i32) -> Result<Vec<RerankerAnalysisResult>> {
        Ok(Self::latest_run(&lock(&self.results), job_id))
    }

    async fn get_top_candidates_for_job(
        &self,
        job_id: i32,
        limit: i64,
        min_rerank_score: Option<f64>,
    ) -> Result<Vec<RerankerAnalysisResult>> {
        let mut run = Self::latest_run(&lock(&self.results), job_id);
        if let Some(min) = min_rerank_score {
            run.retain(|r| r.rerank_score >= min);
        }
        run.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        run.truncate(limit.max(0) as usize);
        Ok(run)
    }

    async fn get_analytics_by_job(&self, job_id: i32) -> Result<JobAnalytics> {
        let rows: Vec<RerankerAnalysisResult> = lock(&self.results)
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        let n = rows.len() as f64;
        let avg = |f: fn(&RerankerAnalysisResult) -> f64| {
            (!rows.is_empty()).then(|| rows.iter().map(f).sum::<f64>() / n)
        };

        let mut by_date: BTreeMap<chrono::NaiveDate, i64> = BTreeMap::new();
        for r in &rows {
            *by_date.entry(r.processed_at.date_naive()).or_default() += 1;
        }

        Ok(JobAnalytics {
            job_id,
            total_analyses: rows.len() as i64,
            avg_rerank_score: avg(|r| r.rerank_score),
            avg_improvement: avg(|r| r.score_improvement),
            top_score: rows.iter().map(|r| r.final_score).reduce(f64::max),
            analyses_by_date: by_date
                .into_iter()
                .rev()
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
        })
    }

    async fn get_recent_sessions(&self, limit: i64) -> Result<Vec<RerankerAnalysisSession>> {
        let mut sessions = self.sessions();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }
}

// =============================================================================
// TASK QUEUE
// =============================================================================

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Task> {
        lock(&self.tasks).clone()
    }

    pub fn of_type(&self, task_type: TaskType) -> Vec<Task> {
        self.all()
            .into_iter()
            .filter(|t| t.task_type == task_type)
            .collect()
    }

    /// Make a scheduled retry due now.
    pub fn make_due(&self, id: Uuid) {
        if let Some(t) = lock(&self.tasks).iter_mut().find(|t| t.id == id) {
            t.run_after = Utc::now();
        }
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut Task)) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
        f(task);
        Ok(())
    }
}

fn new_task_row(task: NewTask) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::now_v7(),
        task_type: task.task_type,
        queue: task.task_type.queue(),
        status: TaskStatus::Pending,
        priority: task.effective_priority(),
        max_retries: task.effective_max_retries(),
        payload: task.payload,
        result: None,
        error_message: None,
        progress_percent: 0,
        progress_message: None,
        retry_count: 0,
        run_after: task.run_after.unwrap_or(now),
        created_at: now,
        started_at: None,
        completed_at: None,
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn enqueue(&self, task: NewTask) -> Result<Uuid> {
        let row = new_task_row(task);
        let id = row.id;
        lock(&self.tasks).push(row);
        Ok(id)
    }

    async fn enqueue_deduplicated(&self, task: NewTask) -> Result<Option<Uuid>> {
        let mut tasks = lock(&self.tasks);
        let duplicate = tasks.iter().any(|t| {
            t.status == TaskStatus::Pending && t.task_type == task.task_type && t.payload == task.payload
        });
        if duplicate {
            return Ok(None);
        }
        let row = new_task_row(task);
        let id = row.id;
        tasks.push(row);
        Ok(Some(id))
    }

    async fn claim_next(
        &self,
        queues: &[TaskQueue],
        task_types: &[TaskType],
    ) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut tasks = lock(&self.tasks);
        let next = tasks
            .iter_mut()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.run_after <= now
                    && (queues.is_empty() || queues.contains(&t.queue))
                    && (task_types.is_empty() || task_types.contains(&t.task_type))
            })
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
        Ok(next.map(|t| {
            t.status = TaskStatus::Running;
            t.started_at = Some(now);
            t.clone()
        }))
    }

    async fn update_progress(&self, id: Uuid, percent: i32, message: Option<&str>) -> Result<()> {
        self.update(id, |t| {
            t.progress_percent = percent.clamp(0, 100);
            t.progress_message = message.map(str::to_string);
        })
    }

    async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()> {
        self.update(id, |t| {
            t.status = TaskStatus::Completed;
            t.result = result;
            t.progress_percent = 100;
            t.completed_at = Some(Utc::now());
        })
    }

    async fn retry_later(&self, id: Uuid, error: &str, delay: Duration) -> Result<()> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| Error::InvalidInput(format!("retry delay: {}", e)))?;
        self.update(id, |t| {
            t.status = TaskStatus::Pending;
            t.retry_count += 1;
            t.error_message = Some(error.to_string());
            t.run_after = Utc::now() + delay;
            t.started_at = None;
            t.progress_percent = 0;
            t.progress_message = None;
        })
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        self.update(id, |t| {
            t.status = TaskStatus::Failed;
            t.error_message = Some(error.to_string());
            t.completed_at = Some(Utc::now());
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(lock(&self.tasks).iter().find(|t| t.id == id).cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(lock(&self.tasks)
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let tasks = lock(&self.tasks);
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let finished_since = |status: TaskStatus| {
            tasks
                .iter()
                .filter(|t| t.status == status && t.completed_at.is_some_and(|c| c >= hour_ago))
                .count() as i64
        };
        Ok(QueueStats {
            pending: tasks.iter().filter(|t| t.status == TaskStatus::Pending).count() as i64,
            running: tasks.iter().filter(|t| t.status == TaskStatus::Running).count() as i64,
            completed_last_hour: finished_since(TaskStatus::Completed),
            failed_last_hour: finished_since(TaskStatus::Failed),
            total: tasks.len() as i64,
        })
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let mut tasks = lock(&self.tasks);
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
                )
            })
            .map(|t| (t.completed_at.unwrap_or(t.created_at), t.id))
            .collect();
        finished.sort_by(|a, b| b.0.cmp(&a.0));
        let doomed: Vec<Uuid> = finished
            .into_iter()
            .skip(keep_count.max(0) as usize)
            .map(|(_, id)| id)
            .collect();
        tasks.retain(|t| !doomed.contains(&t.id));
        Ok(doomed.len() as i64)
    }
}

// =============================================================================
// AGGREGATE
// =============================================================================

/// One of each fake, wired together.
#[derive(Clone)]
pub struct TestStore {
    pub candidates: Arc<InMemoryCandidateRepository>,
    pub submissions: Arc<InMemorySubmissionRepository>,
    pub companies: Arc<InMemoryCompanyRepository>,
    pub postings: Arc<InMemoryJobPostingRepository>,
    pub embedding_metadata: Arc<InMemoryEmbeddingMetadataRepository>,
    pub analysis: Arc<InMemoryAnalysisRepository>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub vectors: Arc<InMemoryVectorStore>,
}

impl TestStore {
    pub fn new() -> Self {
        let candidates = Arc::new(InMemoryCandidateRepository::new());
        let submissions = Arc::new(InMemorySubmissionRepository::new(candidates.clone()));
        let postings = Arc::new(InMemoryJobPostingRepository::new());
        Self {
            embedding_metadata: Arc::new(InMemoryEmbeddingMetadataRepository::new(
                submissions.clone(),
                postings.clone(),
            )),
            companies: Arc::new(InMemoryCompanyRepository::new()),
            analysis: Arc::new(InMemoryAnalysisRepository::new()),
            tasks: Arc::new(InMemoryTaskRepository::new()),
            vectors: Arc::new(InMemoryVectorStore::new()),
            candidates,
            submissions,
            postings,
        }
    }

    /// Candidate plus a submission with `text`.
    pub fn add_resume(&self, first_name: &str, last_name: &str, text: &str) -> Submission {
        let email = format!(
            "{}.{}@example.com",
            first_name.to_lowercase(),
            last_name.to_lowercase()
        );
        let candidate = self.candidates.add(first_name, last_name, Some(&email));
        self.submissions.add(candidate.id, Some(text))
    }

    pub fn add_job(&self, title: &str, text: &str) -> JobPosting {
        self.postings.add(1, title, Some(text), true)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vector_store_orders_by_distance() {
        let store = InMemoryVectorStore::new();
        store.insert("c", "far", "", JsonValue::Null, vec![0.0, 1.0]);
        store.insert("c", "near", "", JsonValue::Null, vec![1.0, 0.1]);
        store.insert("c", "exact", "", JsonValue::Null, vec![1.0, 0.0]);

        let resp = store
            .query(VectorQuery::by_embedding("c", Vector::from(vec![1.0, 0.0]), 2))
            .await
            .unwrap();
        assert_eq!(resp.ids[0], vec!["exact", "near"]);
        let d = resp.distances.unwrap();
        assert!(d[0][0].abs() < 1e-6);
        assert!(d[0][0] <= d[0][1]);
        assert_eq!(store.count("c").await.unwrap(), 3);
        assert_eq!(store.count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_sources_follow_text_hash() {
        let store = TestStore::new();
        let sub = store.add_resume("Ada", "Lovelace", "analytical engines");
        let stale = store
            .embedding_metadata
            .stale_sources(SourceType::Resume)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].existing_document_id, None);

        store
            .embedding_metadata
            .upsert(&NewEmbeddingMetadata {
                source_type: SourceType::Resume,
                source_id: sub.submission_id.to_string(),
                document_id: "resume_x".into(),
                collection_name: "resume_embeddings".into(),
                text_content: "analytical engines".into(),
                source_text_hash: sub.resume_text_hash.clone(),
                model_name: "m".into(),
                additional_metadata: None,
            })
            .await
            .unwrap();
        assert!(store
            .embedding_metadata
            .stale_sources(SourceType::Resume)
            .await
            .unwrap()
            .is_empty());

        store
            .submissions
            .set_resume_text(sub.submission_id, "difference engines")
            .await
            .unwrap();
        let stale = store
            .embedding_metadata
            .stale_sources(SourceType::Resume)
            .await
            .unwrap();
        assert_eq!(stale[0].existing_document_id.as_deref(), Some("resume_x"));
    }

    #[tokio::test]
    async fn test_task_claim_order_and_retry() {
        let repo = InMemoryTaskRepository::new();
        let low = repo.enqueue(NewTask::new(TaskType::CleanupEmbeddings)).await.unwrap();
        let high = repo.enqueue(NewTask::new(TaskType::PersistAnalysis)).await.unwrap();

        let claimed = repo.claim_next(&[], &[]).await.unwrap().unwrap();
        assert_eq!(claimed.id, high);
        repo.retry_later(high, "boom", Duration::from_secs(60))
            .await
            .unwrap();

        let claimed = repo.claim_next(&[], &[]).await.unwrap().unwrap();
        assert_eq!(claimed.id, low);
        assert!(repo.claim_next(&[], &[]).await.unwrap().is_none());

        repo.make_due(high);
        let claimed = repo.claim_next(&[], &[]).await.unwrap().unwrap();
        assert_eq!(claimed.retry_count, 1);
    }

    #[tokio::test]
    async fn test_analysis_insert_is_idempotent() {
        let repo = InMemoryAnalysisRepository::new();
        let row = NewAnalysisResult {
            session_id: None,
            job_id: 1,
            submission_id: Uuid::nil(),
            original_similarity: 0.5,
            rerank_score: 1.0,
            final_score: 0.5,
            score_improvement: 0.0,
            rank_position: 1,
            search_params: JsonValue::Null,
            reranker_model: "m".into(),
            workflow_stats: JsonValue::Null,
            job_title: None,
            company_id: None,
            candidate_name: None,
            candidate_email: None,
            total_candidates_found: 1,
            analysis_type: "job_to_resumes_rerank".into(),
            processed_at: Utc::now(),
        };
        assert_eq!(repo.insert_results(&[row.clone()]).await.unwrap(), 1);
        assert_eq!(repo.insert_results(&[row]).await.unwrap(), 0);
        assert_eq!(repo.results().len(), 1);
    }
}
