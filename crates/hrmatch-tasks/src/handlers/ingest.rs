//! Form fetching and document parsing handlers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use hrmatch_core::defaults::PARSE_BATCH_LIMIT;
use hrmatch_core::{
    JobPostingRepository, Result, SourceType, SubmissionRepository, SubmissionStatus, TaskType,
};

use crate::extraction::DocumentTextService;
use crate::handler::{TaskContext, TaskHandler, TaskOutcome};
use crate::ingest::Ingestor;

/// Pulls new submissions of one form into the database.
pub struct FetchSubmissionsHandler {
    task_type: TaskType,
    ingestor: Arc<Ingestor>,
}

impl FetchSubmissionsHandler {
    pub fn resumes(ingestor: Arc<Ingestor>) -> Self {
        Self {
            task_type: TaskType::FetchResumes,
            ingestor,
        }
    }

    pub fn jobs(ingestor: Arc<Ingestor>) -> Self {
        Self {
            task_type: TaskType::FetchJobs,
            ingestor,
        }
    }
}

#[async_trait]
impl TaskHandler for FetchSubmissionsHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "fetch", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        ctx.report_progress(10, Some("Fetching form submissions..."));
        let report = match self.task_type {
            TaskType::FetchJobs => self.ingestor.ingest_jobs().await,
            _ => self.ingestor.ingest_resumes().await,
        };
        if report.is_ok() {
            ctx.report_progress(100, Some("Submissions stored"));
        }
        TaskOutcome::from_result(report)
    }
}

/// Counts from one parse run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub pending: usize,
    pub parsed: usize,
    /// Jobs whose document was unreadable but had a description field
    pub from_description: usize,
    pub failed: usize,
    /// Stopped before the batch was done because the soft limit passed
    pub interrupted: bool,
}

/// Downloads linked documents and stores their text.
pub struct ParseTextHandler {
    source_type: SourceType,
    documents: Arc<DocumentTextService>,
    submissions: Arc<dyn SubmissionRepository>,
    postings: Arc<dyn JobPostingRepository>,
}

impl ParseTextHandler {
    pub fn resumes(
        documents: Arc<DocumentTextService>,
        submissions: Arc<dyn SubmissionRepository>,
        postings: Arc<dyn JobPostingRepository>,
    ) -> Self {
        Self {
            source_type: SourceType::Resume,
            documents,
            submissions,
            postings,
        }
    }

    pub fn jobs(
        documents: Arc<DocumentTextService>,
        submissions: Arc<dyn SubmissionRepository>,
        postings: Arc<dyn JobPostingRepository>,
    ) -> Self {
        Self {
            source_type: SourceType::JobDescription,
            documents,
            submissions,
            postings,
        }
    }

    /// Extracted text of `url`; download and extraction failures are logged.
    async fn text_of(&self, url: &str, source_id: &str) -> Option<String> {
        match self.documents.extract_url(url).await {
            Ok(Some(extracted)) => Some(extracted.text),
            Ok(None) => None,
            Err(e) => {
                warn!(
                    source_type = self.source_type.as_str(),
                    source_id,
                    error = %e,
                    "Document download failed"
                );
                None
            }
        }
    }

    async fn parse_resumes(&self, ctx: &TaskContext) -> Result<ParseReport> {
        let pending = self.submissions.list_needing_text(PARSE_BATCH_LIMIT).await?;
        let mut report = ParseReport {
            pending: pending.len(),
            ..Default::default()
        };

        for (i, submission) in pending.iter().enumerate() {
            if ctx.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let Some(url) = submission.resume_url.as_deref() else {
                continue;
            };
            let id = submission.submission_id.to_string();
            match self.text_of(url, &id).await {
                Some(text) => {
                    self.submissions
                        .set_resume_text(submission.submission_id, &text)
                        .await?;
                    report.parsed += 1;
                }
                None => {
                    self.submissions
                        .set_status(submission.submission_id, SubmissionStatus::Failed)
                        .await?;
                    report.failed += 1;
                }
            }
            report_batch_progress(ctx, i + 1, report.pending);
        }
        Ok(report)
    }

    async fn parse_jobs(&self, ctx: &TaskContext) -> Result<ParseReport> {
        let pending = self.postings.list_needing_text(PARSE_BATCH_LIMIT).await?;
        let mut report = ParseReport {
            pending: pending.len(),
            ..Default::default()
        };

        for (i, posting) in pending.iter().enumerate() {
            if ctx.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let Some(url) = posting.description_url.as_deref() else {
                continue;
            };
            let id = posting.job_id.to_string();
            let fallback = posting
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty());
            match (self.text_of(url, &id).await, fallback) {
                (Some(text), _) => {
                    self.postings
                        .set_description_text(posting.job_id, &text)
                        .await?;
                    report.parsed += 1;
                }
                (None, Some(description)) => {
                    self.postings
                        .set_description_text(posting.job_id, description)
                        .await?;
                    report.from_description += 1;
                }
                (None, None) => report.failed += 1,
            }
            report_batch_progress(ctx, i + 1, report.pending);
        }
        Ok(report)
    }
}

fn report_batch_progress(ctx: &TaskContext, done: usize, total: usize) {
    if done % 10 == 0 || done == total {
        let percent = (done * 100 / total.max(1)) as i32;
        ctx.report_progress(
            percent.min(99),
            Some(&format!("Parsed {}/{} documents", done, total)),
        );
    }
}

#[async_trait]
impl TaskHandler for ParseTextHandler {
    fn task_type(&self) -> TaskType {
        match self.source_type {
            SourceType::Resume => TaskType::ParseResumeText,
            SourceType::JobDescription => TaskType::ParseJobText,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(
            subsystem = "tasks",
            component = "parse",
            op = "execute"
        )
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let start = Instant::now();
        let report = match self.source_type {
            SourceType::Resume => self.parse_resumes(&ctx).await,
            SourceType::JobDescription => self.parse_jobs(&ctx).await,
        };
        if let Ok(report) = &report {
            if report.interrupted {
                warn!(
                    parsed = report.parsed,
                    pending = report.pending,
                    "Parse run stopped at soft time limit"
                );
            }
            info!(
                pending = report.pending,
                parsed = report.parsed,
                from_description = report.from_description,
                failed = report.failed,
                duration_ms = start.elapsed().as_millis() as u64,
                "Document parsing complete"
            );
            ctx.report_progress(100, Some("Parsing complete"));
        }
        TaskOutcome::from_result(report)
    }
}
