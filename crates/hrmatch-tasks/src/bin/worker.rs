//! `hrmatch-worker`: runs the background task worker until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hrmatch_core::{EmbeddingBackend, RerankBackend, ScoreCalibration};
use hrmatch_db::{log_pool_metrics, Database, PoolConfig};
use hrmatch_inference::{HttpRerankBackend, OllamaBackend};
use hrmatch_search::{EmbeddingIndexer, MatchingPipeline, RerankStage, Retriever};
use hrmatch_tasks::{
    standard_handlers, DocumentFetcher, DocumentTextService, ExtractionRegistry, FormApiClient,
    Ingestor, Services, WorkerBuilder, WorkerConfig,
};

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // LOG_FORMAT  - "json" or "text" (default: "text")
    // LOG_FILE    - path to log file (optional, enables file logging)
    // LOG_ANSI    - "true"/"false" override ANSI colors
    // RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "hrmatch_tasks=info,hrmatch_search=info,hrmatch_db=info,hrmatch_inference=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("hrmatch-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/hrmatch".to_string());
    let worker_config = WorkerConfig::from_env();
    let pool_config =
        PoolConfig::for_workers(worker_config.max_concurrent_tasks).with_env_override();
    let db = Database::connect(&database_url, &pool_config)
        .await
        .context("connecting to database")?;
    log_pool_metrics(&db.pool);

    if env_flag("RUN_MIGRATIONS") {
        db.migrate().await.context("running migrations")?;
        info!("Migrations applied");
    }

    let embedder: Arc<dyn EmbeddingBackend> = Arc::new(OllamaBackend::from_env());
    let reranker: Arc<dyn RerankBackend> = Arc::new(HttpRerankBackend::from_env());
    let calibration = ScoreCalibration::from_env().context("reading score calibration")?;
    info!(
        embed_model = embedder.model_name(),
        rerank_model = reranker.model_name(),
        similarity_weight = calibration.similarity_weight,
        rerank_weight = calibration.rerank_weight,
        "Inference backends configured"
    );

    let retriever = Retriever::new(
        db.vectors.clone(),
        db.submissions.clone(),
        db.postings.clone(),
        db.embedding_metadata.clone(),
    )
    .with_embedder(embedder.clone());
    let pipeline = MatchingPipeline::new(
        retriever,
        RerankStage::new(reranker).with_calibration(calibration),
        db.analysis.clone(),
    )
    .with_task_repository(db.tasks.clone());
    let indexer = EmbeddingIndexer::new(
        embedder,
        db.vectors.clone(),
        db.submissions.clone(),
        db.postings.clone(),
        db.embedding_metadata.clone(),
    );

    let fetcher = DocumentFetcher::new();
    let ingestor = Ingestor::new(
        FormApiClient::from_env(),
        db.candidates.clone(),
        db.submissions.clone(),
        db.companies.clone(),
        db.postings.clone(),
    )
    .with_file_hashing(fetcher.clone());

    let services = Services {
        ingestor: Arc::new(ingestor),
        documents: Arc::new(DocumentTextService::new(
            fetcher,
            ExtractionRegistry::standard(),
        )),
        submissions: db.submissions.clone(),
        postings: db.postings.clone(),
        indexer: Arc::new(indexer),
        pipeline: Arc::new(pipeline),
        analysis: db.analysis.clone(),
        embedding_metadata: db.embedding_metadata.clone(),
        tasks: db.tasks.clone(),
    };

    let worker = WorkerBuilder::new(db.tasks.clone())
        .with_config(worker_config)
        .with_handlers(standard_handlers(&services))
        .with_notify(db.tasks.task_notify())
        .build()
        .await;
    let handle = worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received, stopping worker");
    handle.shutdown().await?;
    info!("Worker stopped");
    Ok(())
}
