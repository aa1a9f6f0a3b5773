//! Fan-out and chained-workflow handlers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use hrmatch_core::defaults::LAUNCH_RERANKING_MAX_TARGETS;
use hrmatch_core::{
    EmbeddingMetadataRepository, NewTask, Result, SourceType, TaskRepository, TaskType,
};

use super::match_params;
use crate::handler::{TaskContext, TaskHandler, TaskOutcome};

/// Stages run after `fetch_resumes` by a full pipeline run.
pub const FULL_PIPELINE_STAGES: [TaskType; 6] = [
    TaskType::FetchJobs,
    TaskType::ParseResumeText,
    TaskType::ParseJobText,
    TaskType::GenerateResumeEmbeddings,
    TaskType::GenerateJobEmbeddings,
    TaskType::LaunchReranking,
];

/// Which embedded sources a launch fans out over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchScope {
    Jobs,
    Resumes,
    #[default]
    All,
}

impl LaunchScope {
    fn includes(&self, source_type: SourceType) -> bool {
        matches!(
            (self, source_type),
            (LaunchScope::All, _)
                | (LaunchScope::Jobs, SourceType::JobDescription)
                | (LaunchScope::Resumes, SourceType::Resume)
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct LaunchPayload {
    #[serde(default)]
    scope: LaunchScope,
}

/// Counts from one reranking launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchReport {
    pub jobs_queued: usize,
    pub resumes_queued: usize,
    /// Targets with an identical rerank task already pending
    pub already_pending: usize,
    /// Provenance records whose source id is not a valid target id
    pub skipped: usize,
    pub interrupted: bool,
}

/// Enqueues one rerank task per embedded job and resume.
pub struct LaunchRerankingHandler {
    embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
    tasks: Arc<dyn TaskRepository>,
}

impl LaunchRerankingHandler {
    pub fn new(
        embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
        tasks: Arc<dyn TaskRepository>,
    ) -> Self {
        Self {
            embedding_metadata,
            tasks,
        }
    }

    async fn launch(
        &self,
        ctx: &TaskContext,
        source_type: SourceType,
        params: &Map<String, JsonValue>,
        report: &mut LaunchReport,
    ) -> Result<()> {
        let records = self
            .embedding_metadata
            .get_by_collection(source_type.collection(), LAUNCH_RERANKING_MAX_TARGETS)
            .await?;
        debug!(
            collection = source_type.collection(),
            targets = records.len(),
            "Launching rerank tasks"
        );

        for record in &records {
            if ctx.is_cancelled() {
                report.interrupted = true;
                return Ok(());
            }
            let Some(task) = rerank_task(source_type, &record.source_id, params) else {
                warn!(
                    source_type = source_type.as_str(),
                    source_id = record.source_id.as_str(),
                    "Embedded source id is not a valid target"
                );
                report.skipped += 1;
                continue;
            };
            match self.tasks.enqueue_deduplicated(task).await? {
                Some(_) if source_type == SourceType::JobDescription => report.jobs_queued += 1,
                Some(_) => report.resumes_queued += 1,
                None => report.already_pending += 1,
            }
        }
        Ok(())
    }
}

/// The rerank task for one embedded source, carrying the matching parameters.
fn rerank_task(
    source_type: SourceType,
    source_id: &str,
    params: &Map<String, JsonValue>,
) -> Option<NewTask> {
    let mut payload = params.clone();
    let task_type = match source_type {
        SourceType::JobDescription => {
            let job_id: i32 = source_id.trim().parse().ok()?;
            payload.insert("job_id".to_string(), json!(job_id));
            TaskType::RerankResumesForJob
        }
        SourceType::Resume => {
            let submission_id = uuid::Uuid::parse_str(source_id.trim()).ok()?;
            payload.insert("submission_id".to_string(), json!(submission_id.to_string()));
            TaskType::RerankJobsForResume
        }
    };
    Some(NewTask::new(task_type).with_payload(JsonValue::Object(payload)))
}

#[async_trait]
impl TaskHandler for LaunchRerankingHandler {
    fn task_type(&self) -> TaskType {
        TaskType::LaunchReranking
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "launch_reranking", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let start = Instant::now();
        let payload: LaunchPayload = match ctx.payload_as() {
            Ok(payload) => payload,
            Err(e) => return TaskOutcome::from_error(&e),
        };
        let params = match_params(ctx.payload());
        let mut report = LaunchReport::default();

        for source_type in [SourceType::JobDescription, SourceType::Resume] {
            if !payload.scope.includes(source_type) {
                continue;
            }
            if let Err(e) = self.launch(&ctx, source_type, &params, &mut report).await {
                return TaskOutcome::from_error(&e);
            }
            ctx.report_progress(50, Some(&format!("{} targets queued", source_type)));
        }

        info!(
            jobs_queued = report.jobs_queued,
            resumes_queued = report.resumes_queued,
            already_pending = report.already_pending,
            skipped = report.skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reranking launched"
        );
        ctx.report_progress(100, Some("Rerank tasks queued"));
        TaskOutcome::from_result(Ok(report))
    }
}

/// Starts the fetch → parse → embed → rerank chain.
///
/// Each stage runs as its own task; the worker enqueues the next stage only
/// after the previous one succeeded.
pub struct RunFullPipelineHandler {
    tasks: Arc<dyn TaskRepository>,
}

impl RunFullPipelineHandler {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }
}

/// Payload of the chain's first task.
fn chain_payload(incoming: Option<&JsonValue>) -> JsonValue {
    let mut payload = match_params(incoming);
    let stages: Vec<&str> = FULL_PIPELINE_STAGES.iter().map(|t| t.as_str()).collect();
    payload.insert("then".to_string(), json!(stages));
    if let Some(scope) = incoming.and_then(|p| p.get("scope")) {
        payload.insert("scope".to_string(), scope.clone());
    }
    JsonValue::Object(payload)
}

#[async_trait]
impl TaskHandler for RunFullPipelineHandler {
    fn task_type(&self) -> TaskType {
        TaskType::RunFullPipeline
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "full_pipeline", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let first = NewTask::new(TaskType::FetchResumes).with_payload(chain_payload(ctx.payload()));
        match self.tasks.enqueue(first).await {
            Ok(task_id) => {
                info!(task_id = %task_id, stages = FULL_PIPELINE_STAGES.len() + 1, "Full pipeline started");
                let stages: Vec<&str> = std::iter::once(TaskType::FetchResumes)
                    .chain(FULL_PIPELINE_STAGES)
                    .map(|t| t.as_str())
                    .collect();
                TaskOutcome::Ok(Some(json!({
                    "first_task_id": task_id,
                    "stages": stages,
                })))
            }
            Err(e) => TaskOutcome::from_error(&e),
        }
    }
}
