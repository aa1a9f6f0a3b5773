//! Task queue repository implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use hrmatch_core::{
    Error, NewTask, QueueStats, Result, Task, TaskQueue, TaskRepository, TaskType,
};

const TASK_COLUMNS: &str = "id, task_type, queue, status, priority, payload, result, \
     error_message, progress_percent, progress_message, retry_count, max_retries, run_after, \
     created_at, started_at, completed_at";

/// PostgreSQL implementation of TaskRepository.
pub struct PgTaskRepository {
    pool: Pool<Postgres>,
    /// Wakes in-process workers when a task is enqueued.
    notify: Arc<Notify>,
}

impl PgTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Share an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Notification handle for event-driven worker wake.
    pub fn task_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<Task> {
        let task_type: String = row.get("task_type");
        let queue: String = row.get("queue");
        let status: String = row.get("status");
        Ok(Task {
            id: row.get("id"),
            task_type: task_type.parse()?,
            queue: queue.parse()?,
            status: status.parse()?,
            priority: row.get("priority"),
            payload: row.get("payload"),
            result: row.get("result"),
            error_message: row.get("error_message"),
            progress_percent: row.get("progress_percent"),
            progress_message: row.get("progress_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            run_after: row.get("run_after"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn enqueue(&self, task: NewTask) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO task_queue (id, task_type, queue, status, priority, payload, max_retries,
                                     run_after, created_at)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(task.task_type.as_str())
        .bind(task.task_type.queue().as_str())
        .bind(task.effective_priority())
        .bind(&task.payload)
        .bind(task.effective_max_retries())
        .bind(task.run_after.unwrap_or(now))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn enqueue_deduplicated(&self, task: NewTask) -> Result<Option<Uuid>> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        // Atomic check-and-insert so concurrent producers cannot both enqueue.
        let result = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO task_queue (id, task_type, queue, status, priority, payload, max_retries,
                                     run_after, created_at)
             SELECT $1, $2, $3, 'pending', $4, $5, $6, $7, $8
             WHERE NOT EXISTS (
                 SELECT 1 FROM task_queue
                 WHERE task_type = $2
                   AND payload IS NOT DISTINCT FROM $5
                   AND status = 'pending'
             )
             RETURNING id",
        )
        .bind(id)
        .bind(task.task_type.as_str())
        .bind(task.task_type.queue().as_str())
        .bind(task.effective_priority())
        .bind(&task.payload)
        .bind(task.effective_max_retries())
        .bind(task.run_after.unwrap_or(now))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.is_some() {
            self.notify.notify_waiters();
        }
        Ok(result)
    }

    async fn claim_next(
        &self,
        queues: &[TaskQueue],
        task_types: &[TaskType],
    ) -> Result<Option<Task>> {
        let now = Utc::now();
        let queue_strings: Vec<String> = queues.iter().map(|q| q.as_str().to_string()).collect();
        let type_strings: Vec<String> =
            task_types.iter().map(|t| t.as_str().to_string()).collect();

        // Filter before locking; empty arrays match anything.
        let row = sqlx::query(&format!(
            "UPDATE task_queue
             SET status = 'running', started_at = $1
             WHERE id = (
                 SELECT id FROM task_queue
                 WHERE status = 'pending'
                   AND run_after <= $1
                   AND (cardinality($2::text[]) = 0 OR queue = ANY($2))
                   AND (cardinality($3::text[]) = 0 OR task_type = ANY($3))
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(now)
        .bind(&queue_strings)
        .bind(&type_strings)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn update_progress(&self, id: Uuid, percent: i32, message: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE task_queue SET progress_percent = $1, progress_message = $2 WHERE id = $3",
        )
        .bind(percent.clamp(0, 100))
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()> {
        sqlx::query(
            "UPDATE task_queue
             SET status = 'completed', completed_at = $1, result = $2, progress_percent = 100
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(&result)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn retry_later(&self, id: Uuid, error: &str, delay: Duration) -> Result<()> {
        let run_after = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| Error::InvalidInput(format!("retry delay: {}", e)))?;

        sqlx::query(
            "UPDATE task_queue
             SET status = 'pending', retry_count = retry_count + 1, error_message = $1,
                 run_after = $2, started_at = NULL, progress_percent = 0, progress_message = NULL
             WHERE id = $3",
        )
        .bind(error)
        .bind(run_after)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE task_queue
             SET status = 'failed', completed_at = $1, error_message = $2
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM task_queue WHERE id = $1", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_queue WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'completed' AND completed_at > NOW() - INTERVAL '1 hour') as completed_last_hour,
                COUNT(*) FILTER (WHERE status = 'failed' AND completed_at > NOW() - INTERVAL '1 hour') as failed_last_hour,
                COUNT(*) as total
             FROM task_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending"),
            running: row.get::<i64, _>("running"),
            completed_last_hour: row.get::<i64, _>("completed_last_hour"),
            failed_last_hour: row.get::<i64, _>("failed_last_hour"),
            total: row.get::<i64, _>("total"),
        })
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM task_queue
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND id NOT IN (
                 SELECT id FROM task_queue
                 WHERE status IN ('completed', 'failed', 'cancelled')
                 ORDER BY completed_at DESC NULLS LAST
                 LIMIT $1
             )",
        )
        .bind(keep_count)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
