//! Embedding generation and cleanup handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use hrmatch_core::defaults::TASK_CLEANUP_KEEP;
use hrmatch_core::{Error, Result, SourceType, TaskRepository, TaskType};
use hrmatch_search::EmbeddingIndexer;

use crate::handler::{TaskContext, TaskHandler, TaskOutcome};

/// Embeds every source of one type whose text is new or changed.
pub struct GenerateEmbeddingsHandler {
    source_type: SourceType,
    indexer: Arc<EmbeddingIndexer>,
}

impl GenerateEmbeddingsHandler {
    pub fn new(source_type: SourceType, indexer: Arc<EmbeddingIndexer>) -> Self {
        Self {
            source_type,
            indexer,
        }
    }
}

fn limit_from(ctx: &TaskContext) -> Result<Option<usize>> {
    match ctx.payload().and_then(|p| p.get("limit")) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::InvalidInput(format!("invalid limit: {}", v))),
    }
}

#[async_trait]
impl TaskHandler for GenerateEmbeddingsHandler {
    fn task_type(&self) -> TaskType {
        match self.source_type {
            SourceType::Resume => TaskType::GenerateResumeEmbeddings,
            SourceType::JobDescription => TaskType::GenerateJobEmbeddings,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(
            subsystem = "tasks",
            component = "embeddings",
            op = "execute"
        )
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let limit = match limit_from(&ctx) {
            Ok(limit) => limit,
            Err(e) => return TaskOutcome::from_error(&e),
        };
        ctx.report_progress(10, Some("Embedding new and changed sources..."));
        let report = self.indexer.index_pending(self.source_type, limit).await;
        if report.is_ok() {
            ctx.report_progress(100, Some("Embeddings up to date"));
        }
        TaskOutcome::from_result(report)
    }
}

/// Removes embeddings of vanished sources and prunes old finished tasks.
pub struct CleanupEmbeddingsHandler {
    indexer: Arc<EmbeddingIndexer>,
    tasks: Arc<dyn TaskRepository>,
}

impl CleanupEmbeddingsHandler {
    pub fn new(indexer: Arc<EmbeddingIndexer>, tasks: Arc<dyn TaskRepository>) -> Self {
        Self { indexer, tasks }
    }

    async fn run(&self, ctx: &TaskContext) -> Result<serde_json::Value> {
        let resumes = self.indexer.cleanup_orphans(SourceType::Resume).await?;
        ctx.report_progress(40, Some("Resume embeddings cleaned"));
        let jobs = self
            .indexer
            .cleanup_orphans(SourceType::JobDescription)
            .await?;
        ctx.report_progress(80, Some("Job embeddings cleaned"));
        let tasks_removed = self.tasks.cleanup(TASK_CLEANUP_KEEP).await?;

        info!(
            resume_orphans = resumes.orphaned,
            job_orphans = jobs.orphaned,
            tasks_removed,
            "Embedding cleanup complete"
        );
        Ok(json!({
            "resume": resumes,
            "job_description": jobs,
            "tasks_removed": tasks_removed,
        }))
    }
}

#[async_trait]
impl TaskHandler for CleanupEmbeddingsHandler {
    fn task_type(&self) -> TaskType {
        TaskType::CleanupEmbeddings
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "embeddings", op = "cleanup")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let result = self.run(&ctx).await;
        if result.is_ok() {
            ctx.report_progress(100, Some("Cleanup complete"));
        }
        TaskOutcome::from_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_task;

    #[test]
    fn test_limit_from_payload() {
        let ctx = TaskContext::new(test_task(
            TaskType::GenerateJobEmbeddings,
            Some(json!({"limit": 25})),
        ));
        assert_eq!(limit_from(&ctx).unwrap(), Some(25));

        let ctx = TaskContext::new(test_task(TaskType::GenerateJobEmbeddings, None));
        assert_eq!(limit_from(&ctx).unwrap(), None);

        let ctx = TaskContext::new(test_task(
            TaskType::GenerateJobEmbeddings,
            Some(json!({"limit": "all"})),
        ));
        assert!(limit_from(&ctx).is_err());
    }
}
