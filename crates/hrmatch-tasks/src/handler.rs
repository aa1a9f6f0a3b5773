//! Task handlers for each task type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hrmatch_core::{defaults, Error, MatchRequest, Result, Task, TaskLimits, TaskType};

/// Progress callback type for task handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to task handlers.
pub struct TaskContext {
    /// The task being processed.
    pub task: Task,
    progress_callback: Option<ProgressCallback>,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            progress_callback: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Share the flag the worker raises when the soft time limit passes.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    /// True once the soft time limit has passed; long loops should stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn task_id(&self) -> Uuid {
        self.task.id
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        self.task.payload.as_ref()
    }

    /// Deserialize the whole payload, treating a missing payload as `{}`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .task
            .payload
            .clone()
            .unwrap_or_else(|| JsonValue::Object(Default::default()));
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("{} payload: {}", self.task.task_type, e)))
    }

    /// `job_id` from the payload; numeric strings are accepted.
    pub fn job_id(&self) -> Result<i32> {
        let value = self
            .payload()
            .and_then(|p| p.get("job_id"))
            .ok_or_else(|| Error::InvalidInput("payload has no job_id".into()))?;
        match value {
            JsonValue::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidInput(format!("invalid job_id: {}", value)))
    }

    pub fn submission_id(&self) -> Result<Uuid> {
        let raw = self
            .payload()
            .and_then(|p| p.get("submission_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("payload has no submission_id".into()))?;
        Uuid::parse_str(raw.trim())
            .map_err(|e| Error::InvalidInput(format!("invalid submission_id {}: {}", raw, e)))
    }

    /// Matching parameters from the payload, falling back to `defaults` per field.
    pub fn match_request(&self, defaults: MatchRequest) -> Result<MatchRequest> {
        let Some(payload) = self.payload() else {
            return Ok(defaults);
        };
        let mut request = defaults;
        if let Some(v) = payload.get("top_k").filter(|v| !v.is_null()) {
            request.top_k = v
                .as_u64()
                .and_then(|k| usize::try_from(k).ok())
                .filter(|k| (1..=defaults::MAX_TOP_K).contains(k))
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "invalid top_k: {} (expected 1..={})",
                        v,
                        defaults::MAX_TOP_K
                    ))
                })?;
        }
        if let Some(v) = payload.get("min_similarity").filter(|v| !v.is_null()) {
            request.min_similarity = v
                .as_f64()
                .ok_or_else(|| Error::InvalidInput(format!("invalid min_similarity: {}", v)))?
                as f32;
        }
        if let Some(v) = payload.get("min_rerank_score").filter(|v| !v.is_null()) {
            request.min_rerank_score = v
                .as_f64()
                .ok_or_else(|| Error::InvalidInput(format!("invalid min_rerank_score: {}", v)))?
                as f32;
        }
        Ok(request)
    }
}

/// Result of task execution.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Completed, with optional result data.
    Ok(Option<JsonValue>),
    /// Transient failure; rescheduled while retries remain.
    RetryableError(String),
    /// Permanent failure.
    FatalError(String),
}

impl TaskOutcome {
    /// Classify an error by [`Error::is_retryable`].
    pub fn from_error(err: &Error) -> Self {
        if err.is_retryable() {
            TaskOutcome::RetryableError(err.to_string())
        } else {
            TaskOutcome::FatalError(err.to_string())
        }
    }

    /// Serialize `value` as the task result.
    pub fn from_result<T: serde::Serialize>(value: Result<T>) -> Self {
        match value.and_then(|v| serde_json::to_value(v).map_err(Error::from)) {
            Ok(json) => TaskOutcome::Ok(Some(json)),
            Err(e) => TaskOutcome::from_error(&e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TaskOutcome::Ok(_))
    }
}

/// Trait for task handlers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler processes.
    fn task_type(&self) -> TaskType;

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome;

    /// Soft/hard time limits applied by the worker.
    fn limits(&self) -> TaskLimits {
        self.task_type().limits()
    }

    fn can_handle(&self, task_type: TaskType) -> bool {
        self.task_type() == task_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    task_type: TaskType,
}

impl NoOpHandler {
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }
}

#[async_trait]
impl TaskHandler for NoOpHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        ctx.report_progress(50, Some("Processing..."));
        ctx.report_progress(100, Some("Done"));
        TaskOutcome::Ok(None)
    }
}

#[cfg(test)]
pub(crate) fn test_task(task_type: TaskType, payload: Option<JsonValue>) -> Task {
    Task {
        id: Uuid::new_v4(),
        task_type,
        queue: task_type.queue(),
        status: hrmatch_core::TaskStatus::Running,
        priority: task_type.default_priority(),
        payload,
        result: None,
        error_message: None,
        progress_percent: 0,
        progress_message: None,
        retry_count: 0,
        max_retries: task_type.limits().max_retries,
        run_after: chrono::Utc::now(),
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}
