//! Worker behaviour against the in-memory task queue.
//!
//! Tests run on a paused clock so time limits and polling advance
//! instantly and deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use hrmatch_search::testing::InMemoryTaskRepository;
use hrmatch_tasks::{
    NewTask, NoOpHandler, RetryPolicy, Task, TaskContext, TaskHandler, TaskLimits, TaskOutcome,
    TaskQueue, TaskRepository, TaskStatus, TaskType, WorkerBuilder, WorkerConfig, WorkerEvent,
};

// ============================================================================
// HELPERS
// ============================================================================

fn config() -> WorkerConfig {
    WorkerConfig::default()
        .with_poll_interval(10)
        .with_max_concurrent(2)
}

async fn enqueue(repo: &InMemoryTaskRepository, task: NewTask) -> Uuid {
    repo.enqueue(task).await.unwrap()
}

/// Poll until the task reaches `status`.
async fn wait_for_status(repo: &InMemoryTaskRepository, id: Uuid, status: TaskStatus) -> Task {
    for _ in 0..2000 {
        if let Some(task) = repo.get(id).await.unwrap() {
            if task.status == status {
                return task;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {:?}", id, status);
}

/// Next event matching `pred`, skipping others.
async fn next_event(
    events: &mut broadcast::Receiver<WorkerEvent>,
    pred: impl Fn(&WorkerEvent) -> bool,
) -> WorkerEvent {
    timeout(Duration::from_secs(3600), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

/// Counts executions and returns a fixed outcome.
struct ScriptedHandler {
    task_type: TaskType,
    outcome: fn() -> TaskOutcome,
    runs: Arc<AtomicUsize>,
}

impl ScriptedHandler {
    fn new(task_type: TaskType, outcome: fn() -> TaskOutcome) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Self {
                task_type,
                outcome,
                runs: runs.clone(),
            },
            runs,
        )
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        (self.outcome)()
    }
}

/// Works until told to stop, or forever.
struct LongRunningHandler {
    task_type: TaskType,
    limits: TaskLimits,
    honours_cancellation: bool,
}

#[async_trait]
impl TaskHandler for LongRunningHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn limits(&self) -> TaskLimits {
        self.limits
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let mut steps = 0;
        loop {
            if self.honours_cancellation && ctx.is_cancelled() {
                return TaskOutcome::Ok(Some(json!({"stopped_early": true, "steps": steps})));
            }
            sleep(Duration::from_millis(100)).await;
            steps += 1;
        }
    }
}

// ============================================================================
// COMPLETION AND EVENTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_worker_completes_task_and_records_progress() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::CleanupEmbeddings)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(NoOpHandler::new(TaskType::CleanupEmbeddings))
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    let started = next_event(&mut events, |e| matches!(e, WorkerEvent::TaskStarted { .. })).await;
    assert!(matches!(started, WorkerEvent::TaskStarted { task_id, .. } if task_id == id));
    let progress = next_event(&mut events, |e| matches!(e, WorkerEvent::TaskProgress { .. })).await;
    assert!(matches!(progress, WorkerEvent::TaskProgress { percent: 50, .. }));
    next_event(&mut events, |e| matches!(e, WorkerEvent::TaskCompleted { .. })).await;

    let task = wait_for_status(&repo, id, TaskStatus::Completed).await;
    assert_eq!(task.progress_percent, 100);
    assert!(task.completed_at.is_some());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_higher_priority_task_runs_first() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let low = enqueue(&repo, NewTask::new(TaskType::CleanupEmbeddings).with_priority(1)).await;
    let high = enqueue(&repo, NewTask::new(TaskType::CleanupEmbeddings).with_priority(9)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config().with_max_concurrent(1))
        .with_handler(NoOpHandler::new(TaskType::CleanupEmbeddings))
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    let first = next_event(&mut events, |e| matches!(e, WorkerEvent::TaskStarted { .. })).await;
    assert!(matches!(first, WorkerEvent::TaskStarted { task_id, .. } if task_id == high));
    wait_for_status(&repo, low, TaskStatus::Completed).await;

    handle.shutdown().await.unwrap();
}

// ============================================================================
// RETRIES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retryable_error_retries_until_ceiling_then_fails() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::FetchJobs)).await;
    let (handler, runs) = ScriptedHandler::new(TaskType::FetchJobs, || {
        TaskOutcome::RetryableError("form API unavailable".into())
    });

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(handler)
        .with_retry_policy(RetryPolicy::immediate())
        .build()
        .await;
    let handle = worker.start();

    let task = wait_for_status(&repo, id, TaskStatus::Failed).await;
    // First attempt plus three retries
    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.error_message.as_deref(), Some("form API unavailable"));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_scheduled_with_policy_delay() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::FetchJobs)).await;
    let (handler, runs) = ScriptedHandler::new(TaskType::FetchJobs, || {
        TaskOutcome::RetryableError("timeout".into())
    });

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(handler)
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    let retrying = next_event(&mut events, |e| matches!(e, WorkerEvent::TaskRetrying { .. })).await;
    match retrying {
        WorkerEvent::TaskRetrying {
            task_id,
            attempt,
            delay,
            ..
        } => {
            assert_eq!(task_id, id);
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_secs(60));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let task = wait_for_status(&repo, id, TaskStatus::Pending).await;
    assert_eq!(task.retry_count, 1);
    assert!(task.run_after > chrono::Utc::now());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_fails_without_retry() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::PersistAnalysis)).await;
    let (handler, runs) = ScriptedHandler::new(TaskType::PersistAnalysis, || {
        TaskOutcome::FatalError("payload has no results".into())
    });

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(handler)
        .with_retry_policy(RetryPolicy::immediate())
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    next_event(&mut events, |e| matches!(e, WorkerEvent::TaskFailed { .. })).await;
    let task = wait_for_status(&repo, id, TaskStatus::Failed).await;
    assert_eq!(task.retry_count, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    handle.shutdown().await.unwrap();
}

// ============================================================================
// CHAINING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_successful_task_enqueues_next_stage() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let first = enqueue(
        &repo,
        NewTask::new(TaskType::FetchResumes)
            .with_payload(json!({"then": ["fetch_jobs", "parse_resume_text"], "top_k": 5})),
    )
    .await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(NoOpHandler::new(TaskType::FetchResumes))
        .with_handler(NoOpHandler::new(TaskType::FetchJobs))
        .with_handler(NoOpHandler::new(TaskType::ParseResumeText))
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    let chained = next_event(&mut events, |e| matches!(e, WorkerEvent::TaskChained { .. })).await;
    assert!(matches!(
        chained,
        WorkerEvent::TaskChained { task_id, next_type: TaskType::FetchJobs, .. } if task_id == first
    ));

    next_event(&mut events, |e| {
        matches!(e, WorkerEvent::TaskCompleted { task_type: TaskType::ParseResumeText, .. })
    })
    .await;

    let fetch_jobs = repo.of_type(TaskType::FetchJobs);
    assert_eq!(fetch_jobs.len(), 1);
    let payload = fetch_jobs[0].payload.clone().unwrap();
    assert_eq!(payload["then"], json!(["parse_resume_text"]));
    assert_eq!(payload["top_k"], 5);

    let parse = repo.of_type(TaskType::ParseResumeText);
    assert_eq!(parse.len(), 1);
    assert!(parse[0].payload.as_ref().unwrap().get("then").is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_task_does_not_continue_chain() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(
        &repo,
        NewTask::new(TaskType::FetchResumes).with_payload(json!({"then": ["fetch_jobs"]})),
    )
    .await;
    let (handler, _) = ScriptedHandler::new(TaskType::FetchResumes, || {
        TaskOutcome::FatalError("CV_FORM_ID is not set".into())
    });

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(handler)
        .with_handler(NoOpHandler::new(TaskType::FetchJobs))
        .build()
        .await;
    let handle = worker.start();

    wait_for_status(&repo, id, TaskStatus::Failed).await;
    assert!(repo.of_type(TaskType::FetchJobs).is_empty());

    handle.shutdown().await.unwrap();
}

// ============================================================================
// TIME LIMITS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_soft_limit_asks_handler_to_stop() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::ParseJobText)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(LongRunningHandler {
            task_type: TaskType::ParseJobText,
            limits: TaskLimits::new(1, 5),
            honours_cancellation: true,
        })
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    next_event(&mut events, |e| matches!(e, WorkerEvent::TaskSoftLimit { .. })).await;
    let task = wait_for_status(&repo, id, TaskStatus::Completed).await;
    assert_eq!(task.result.unwrap()["stopped_early"], true);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hard_limit_aborts_and_reschedules() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::ParseJobText)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(LongRunningHandler {
            task_type: TaskType::ParseJobText,
            limits: TaskLimits::new(1, 2),
            honours_cancellation: false,
        })
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    next_event(&mut events, |e| matches!(e, WorkerEvent::TaskSoftLimit { .. })).await;
    let retrying = next_event(&mut events, |e| matches!(e, WorkerEvent::TaskRetrying { .. })).await;
    match retrying {
        WorkerEvent::TaskRetrying { task_id, error, .. } => {
            assert_eq!(task_id, id);
            assert!(error.contains("hard time limit"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    let task = wait_for_status(&repo, id, TaskStatus::Pending).await;
    assert_eq!(task.retry_count, 1);

    handle.shutdown().await.unwrap();
}

// ============================================================================
// CLAIMING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_tasks_without_handler_stay_pending() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let orphan = enqueue(&repo, NewTask::new(TaskType::FetchJobs)).await;
    let handled = enqueue(&repo, NewTask::new(TaskType::FetchResumes)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(NoOpHandler::new(TaskType::FetchResumes))
        .build()
        .await;
    let handle = worker.start();

    wait_for_status(&repo, handled, TaskStatus::Completed).await;
    sleep(Duration::from_millis(200)).await;
    let task = repo.get(orphan).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_worker_only_claims_subscribed_queues() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let fetch = enqueue(&repo, NewTask::new(TaskType::FetchResumes)).await;
    let cleanup = enqueue(&repo, NewTask::new(TaskType::CleanupEmbeddings)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config().with_queues([TaskQueue::Embeddings]))
        .with_handler(NoOpHandler::new(TaskType::FetchResumes))
        .with_handler(NoOpHandler::new(TaskType::CleanupEmbeddings))
        .build()
        .await;
    let handle = worker.start();

    wait_for_status(&repo, cleanup, TaskStatus::Completed).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(
        repo.get(fetch).await.unwrap().unwrap().status,
        TaskStatus::Pending
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disabled_worker_processes_nothing() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let id = enqueue(&repo, NewTask::new(TaskType::CleanupEmbeddings)).await;

    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config().with_enabled(false))
        .with_handler(NoOpHandler::new(TaskType::CleanupEmbeddings))
        .build()
        .await;
    let handle = worker.start();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(
        repo.get(id).await.unwrap().unwrap().status,
        TaskStatus::Pending
    );
    assert_eq!(repo.pending_count().await.unwrap(), 1);

    handle.shutdown().await.ok();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_emits_worker_stopped() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let worker = WorkerBuilder::new(repo.clone())
        .with_config(config())
        .with_handler(NoOpHandler::new(TaskType::FetchJobs))
        .build()
        .await;
    let handle = worker.start();
    let mut events = handle.events();

    next_event(&mut events, |e| matches!(e, WorkerEvent::WorkerStarted)).await;
    handle.shutdown().await.unwrap();
    next_event(&mut events, |e| matches!(e, WorkerEvent::WorkerStopped)).await;
}
