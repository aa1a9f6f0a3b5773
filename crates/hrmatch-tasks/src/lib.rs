//! # hrmatch-tasks
//!
//! Background task processing for the hrmatch pipeline.
//!
//! This crate provides:
//! - Priority-based task queueing over named queues
//! - Async task processing with bounded concurrency and time limits
//! - Tiered retry backoff and chained task stages
//! - Form submission ingestion with duplicate detection
//! - Document text extraction with per-format fallback chains
//! - Handlers for every task type
//!
//! ## Example
//!
//! ```ignore
//! use hrmatch_tasks::{standard_handlers, Services, WorkerBuilder, WorkerConfig};
//! use hrmatch_db::{Database, PoolConfig};
//!
//! let db = Database::connect("postgres://...", &PoolConfig::for_workers(2)).await?;
//! let services = Services { /* repositories, pipeline, indexer, ingestor */ };
//!
//! let worker = WorkerBuilder::new(db.tasks.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handlers(standard_handlers(&services))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod extraction;
pub mod handler;
pub mod handlers;
pub mod ingest;
pub mod policy;
pub mod worker;

// Re-export core types
pub use hrmatch_core::*;

pub use handler::{NoOpHandler, TaskContext, TaskHandler, TaskOutcome};
pub use handlers::{standard_handlers, Services};
pub use policy::RetryPolicy;
pub use worker::{
    next_stage, parse_queues, TaskWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};

pub use extraction::{
    clean_extracted_text, detect_document_kind, DocumentFetcher, DocumentKind,
    DocumentTextService, ExtractionRegistry, TextExtractor,
};
pub use ingest::{FormApiClient, FormApiConfig, IngestReport, Ingestor};

/// Default maximum retries for failed tasks.
pub const DEFAULT_MAX_RETRIES: i32 = hrmatch_core::defaults::TASK_MAX_RETRIES;

/// Default polling interval for task processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = hrmatch_core::defaults::TASK_POLL_INTERVAL_MS;
