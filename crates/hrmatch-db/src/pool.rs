//! Connection pool sized to the task worker.
//!
//! Every running task holds at most one connection at a time. The claim loop,
//! progress updates and deferred analysis writes share a small headroom on top.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use hrmatch_core::{Error, Result};

/// Connections kept beyond the worker's task concurrency.
pub const POOL_HEADROOM: u32 = 3;

/// Time a task waits for a free connection before failing retryably.
pub const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connections are recycled after this long to pick up server-side changes.
pub const MAX_LIFETIME_SECS: u64 = 1800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// A pool large enough for `concurrency` tasks plus headroom.
    pub fn for_workers(concurrency: usize) -> Self {
        let tasks = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: tasks.saturating_add(POOL_HEADROOM),
            acquire_timeout: Duration::from_secs(ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Apply `DB_MAX_CONNECTIONS` when set to a positive number.
    pub fn with_env_override(self) -> Self {
        match std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            Some(max) => self.with_max_connections(max),
            None => self,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }
}

/// Connect a pool with the given configuration.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(Duration::from_secs(MAX_LIFETIME_SECS))
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool connected"
    );
    Ok(pool)
}

/// Log pool occupancy, warning when every connection is checked out.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let in_use = size.saturating_sub(pool.num_idle() as u32);
    let max = pool.options().get_max_connections();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        in_use,
        max_connections = max,
        "Pool occupancy"
    );

    if in_use >= max {
        warn!(
            subsystem = "db",
            component = "pool",
            in_use,
            max_connections = max,
            "All pooled connections in use; tasks will queue for a connection"
        );
    }
}
