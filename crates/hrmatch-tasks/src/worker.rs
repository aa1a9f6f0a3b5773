//! Task worker and runner for processing background tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use hrmatch_core::{defaults, Error, NewTask, Result, Task, TaskQueue, TaskRepository, TaskType};

use crate::handler::{TaskContext, TaskHandler, TaskOutcome};
use crate::policy::RetryPolicy;
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the task worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent tasks.
    pub max_concurrent_tasks: usize,
    /// Whether to enable task processing.
    pub enabled: bool,
    /// Queues this worker claims from.
    pub queues: Vec<TaskQueue>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_tasks: defaults::TASK_MAX_CONCURRENT,
            enabled: true,
            queues: TaskQueue::ALL.to_vec(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `WORKER_QUEUES` | all | Comma-separated queue names |
    /// | `WORKER_MAX_CONCURRENT` | `2` | Max concurrent tasks |
    /// | `WORKER_POLL_INTERVAL_MS` | `500` | Polling interval when the queues are empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_tasks = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::TASK_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let queues = std::env::var("WORKER_QUEUES")
            .map(|v| parse_queues(&v))
            .unwrap_or_else(|_| TaskQueue::ALL.to_vec());

        Self {
            poll_interval_ms,
            max_concurrent_tasks,
            enabled,
            queues,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_queues(mut self, queues: impl IntoIterator<Item = TaskQueue>) -> Self {
        self.queues = queues.into_iter().collect();
        self
    }
}

/// Parse a comma-separated queue list; unknown names are skipped and an
/// empty result means every queue.
pub fn parse_queues(raw: &str) -> Vec<TaskQueue> {
    let mut queues = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match name.parse::<TaskQueue>() {
            Ok(q) if !queues.contains(&q) => queues.push(q),
            Ok(_) => {}
            Err(_) => warn!(queue = name, "Ignoring unknown queue in WORKER_QUEUES"),
        }
    }
    if queues.is_empty() {
        TaskQueue::ALL.to_vec()
    } else {
        queues
    }
}

/// Event emitted by the task worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    TaskStarted {
        task_id: Uuid,
        task_type: TaskType,
    },
    TaskProgress {
        task_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    TaskCompleted {
        task_id: Uuid,
        task_type: TaskType,
    },
    /// The next stage of a chain was enqueued.
    TaskChained {
        task_id: Uuid,
        next_task_id: Uuid,
        next_type: TaskType,
    },
    /// The soft time limit passed; the handler was asked to stop.
    TaskSoftLimit {
        task_id: Uuid,
        task_type: TaskType,
    },
    TaskRetrying {
        task_id: Uuid,
        task_type: TaskType,
        attempt: i32,
        delay: Duration,
        error: String,
    },
    TaskFailed {
        task_id: Uuid,
        task_type: TaskType,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop and wait for in-flight tasks to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Worker loop panicked: {}", e)))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Task worker that processes tasks from the queue.
pub struct TaskWorker {
    tasks: Arc<dyn TaskRepository>,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    retry_policy: RetryPolicy,
    notify: Option<Arc<Notify>>,
}

impl TaskWorker {
    pub fn new(tasks: Arc<dyn TaskRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            tasks,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            retry_policy: RetryPolicy::default(),
            notify: None,
        }
    }

    /// Register a handler for a task type.
    pub async fn register_handler(&self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(task_type, handler);
        debug!(task_type = task_type.as_str(), "Registered task handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            join,
        }
    }

    /// Claims up to `max_concurrent_tasks` at a time and processes them
    /// concurrently. Only sleeps when the queues are empty.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "tasks", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Task worker is disabled, not starting");
            return;
        }

        let queue_names: Vec<&str> = self.config.queues.iter().map(|q| q.as_str()).collect();
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_tasks,
            queues = ?queue_names,
            "Task worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_tasks.max(1);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Task worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut running = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_task().await {
                    Some(task) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        running.spawn(async move {
                            worker.execute_task(task).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                let notified = async {
                    match &self.notify {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Task worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                    _ = notified => {}
                }
            } else {
                debug!(claimed, "Processing concurrent task batch");
                while let Some(result) = running.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Task execution panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Task worker stopped");
    }

    async fn claim_task(&self) -> Option<Task> {
        let task_types: Vec<TaskType> = {
            let handlers = self.handlers.read().await;
            handlers.keys().copied().collect()
        };
        // An empty type filter would claim anything
        if task_types.is_empty() {
            return None;
        }

        match self.tasks.claim_next(&self.config.queues, &task_types).await {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "Failed to claim task");
                None
            }
        }
    }

    fn clone_refs(&self) -> TaskWorkerRef {
        TaskWorkerRef {
            tasks: self.tasks.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            retry_policy: self.retry_policy.clone(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.tasks.pending_count().await
    }
}

/// Reference bundle for executing a single task in a spawned future.
struct TaskWorkerRef {
    tasks: Arc<dyn TaskRepository>,
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    retry_policy: RetryPolicy,
}

impl TaskWorkerRef {
    async fn execute_task(self, task: Task) {
        let start = Instant::now();
        let task_id = task.id;
        let task_type = task.task_type;

        info!(
            subsystem = "tasks",
            component = "worker",
            task_id = %task_id,
            task_type = task_type.as_str(),
            queue = task.queue.as_str(),
            retry_count = task.retry_count,
            "Processing task"
        );

        let _ = self
            .event_tx
            .send(WorkerEvent::TaskStarted { task_id, task_type });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&task_type).cloned()
        };

        let outcome = match handler {
            Some(handler) => self.run_with_limits(handler, task.clone()).await,
            None => {
                warn!(task_type = task_type.as_str(), "No handler registered for task type");
                TaskOutcome::FatalError(format!("No handler for task type: {}", task_type))
            }
        };

        self.finish(&task, outcome, start).await;
    }

    /// Run the handler under its soft and hard time limits.
    async fn run_with_limits(&self, handler: Arc<dyn TaskHandler>, task: Task) -> TaskOutcome {
        let task_id = task.id;
        let task_type = task.task_type;
        let limits = handler.limits();
        let cancelled = Arc::new(AtomicBool::new(false));

        let event_tx = self.event_tx.clone();
        let tasks = self.tasks.clone();
        let ctx = TaskContext::new(task)
            .with_cancellation(cancelled.clone())
            .with_progress_callback(move |percent, message| {
                let _ = event_tx.send(WorkerEvent::TaskProgress {
                    task_id,
                    percent,
                    message: message.map(String::from),
                });
                let tasks = tasks.clone();
                let message = message.map(String::from);
                tokio::spawn(async move {
                    if let Err(e) = tasks
                        .update_progress(task_id, percent, message.as_deref())
                        .await
                    {
                        debug!(task_id = %task_id, error = %e, "Failed to record task progress");
                    }
                });
            });

        let execution = handler.execute(ctx);
        tokio::pin!(execution);
        let soft = sleep(Duration::from_secs(limits.soft_secs));
        tokio::pin!(soft);
        let hard = sleep(Duration::from_secs(limits.hard_secs));
        tokio::pin!(hard);
        let mut soft_fired = false;

        loop {
            tokio::select! {
                outcome = &mut execution => return outcome,
                _ = &mut soft, if !soft_fired => {
                    soft_fired = true;
                    cancelled.store(true, Ordering::Relaxed);
                    warn!(
                        task_id = %task_id,
                        task_type = task_type.as_str(),
                        soft_limit_secs = limits.soft_secs,
                        "Task exceeded soft time limit"
                    );
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::TaskSoftLimit { task_id, task_type });
                }
                _ = &mut hard => {
                    warn!(
                        task_id = %task_id,
                        task_type = task_type.as_str(),
                        hard_limit_secs = limits.hard_secs,
                        "Task exceeded hard time limit, aborting"
                    );
                    return TaskOutcome::RetryableError(format!(
                        "Task exceeded hard time limit of {}s",
                        limits.hard_secs
                    ));
                }
            }
        }
    }

    async fn finish(&self, task: &Task, outcome: TaskOutcome, start: Instant) {
        let task_id = task.id;
        let task_type = task.task_type;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            TaskOutcome::Ok(result) => {
                if let Err(e) = self.tasks.complete(task_id, result).await {
                    error!(error = %e, task_id = %task_id, "Failed to mark task as completed");
                    return;
                }
                info!(
                    task_id = %task_id,
                    task_type = task_type.as_str(),
                    duration_ms,
                    "Task completed successfully"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::TaskCompleted { task_id, task_type });
                self.enqueue_next_stage(task).await;
            }
            TaskOutcome::RetryableError(error) if self.retry_policy.should_retry(task) => {
                let delay = self.retry_policy.delay_for(task.retry_count);
                if let Err(e) = self.tasks.retry_later(task_id, &error, delay).await {
                    error!(error = %e, task_id = %task_id, "Failed to reschedule task");
                    return;
                }
                warn!(
                    task_id = %task_id,
                    task_type = task_type.as_str(),
                    attempt = task.retry_count + 1,
                    max_retries = task.max_retries,
                    delay_secs = delay.as_secs(),
                    %error,
                    duration_ms,
                    "Task failed, retry scheduled"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskRetrying {
                    task_id,
                    task_type,
                    attempt: task.retry_count + 1,
                    delay,
                    error,
                });
            }
            TaskOutcome::RetryableError(error) | TaskOutcome::FatalError(error) => {
                if let Err(e) = self.tasks.fail(task_id, &error).await {
                    error!(error = %e, task_id = %task_id, "Failed to mark task as failed");
                    return;
                }
                warn!(
                    task_id = %task_id,
                    task_type = task_type.as_str(),
                    %error,
                    duration_ms,
                    "Task failed"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                    task_id,
                    task_type,
                    error,
                });
            }
        }
    }

    async fn enqueue_next_stage(&self, task: &Task) {
        let next = match next_stage(task.payload.as_ref()) {
            Ok(Some(next)) => next,
            Ok(None) => return,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Invalid task chain, not continuing");
                return;
            }
        };
        let next_type = next.task_type;
        match self.tasks.enqueue(next).await {
            Ok(next_task_id) => {
                info!(
                    task_id = %task.id,
                    next_task_id = %next_task_id,
                    next_type = next_type.as_str(),
                    "Enqueued next chain stage"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskChained {
                    task_id: task.id,
                    next_task_id,
                    next_type,
                });
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to enqueue next chain stage");
            }
        }
    }
}

/// The task to run after a successful task whose payload lists `"then"` stages.
///
/// The next task carries the same payload with the remaining stages.
pub fn next_stage(payload: Option<&JsonValue>) -> Result<Option<NewTask>> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    let Some(then) = payload.get("then") else {
        return Ok(None);
    };
    let stages = then
        .as_array()
        .ok_or_else(|| Error::InvalidInput(format!("\"then\" must be a list: {}", then)))?;
    let Some((first, rest)) = stages.split_first() else {
        return Ok(None);
    };
    let next_type: TaskType = first
        .as_str()
        .ok_or_else(|| Error::InvalidInput(format!("invalid chain stage: {}", first)))?
        .parse()?;

    let mut next_payload = payload.clone();
    if let Some(obj) = next_payload.as_object_mut() {
        if rest.is_empty() {
            obj.remove("then");
        } else {
            obj.insert("then".to_string(), JsonValue::Array(rest.to_vec()));
        }
    }
    Ok(Some(NewTask::new(next_type).with_payload(next_payload)))
}

/// Builder for creating a task worker with handlers.
pub struct WorkerBuilder {
    tasks: Arc<dyn TaskRepository>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn TaskHandler>>,
    retry_policy: RetryPolicy,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self {
            tasks,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            retry_policy: RetryPolicy::default(),
            notify: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn TaskHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Wake the idle loop as soon as a task is enqueued.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub async fn build(self) -> TaskWorker {
        let mut worker = TaskWorker::new(self.tasks, self.config);
        worker.retry_policy = self.retry_policy;
        worker.notify = self.notify;

        for handler in self.handlers {
            worker.register_handler(handler).await;
        }

        worker
    }
}
