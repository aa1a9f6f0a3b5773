//! Task handlers against in-memory repositories and mock inference backends.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hrmatch_inference::mock::{MockEmbeddingBackend, MockRerankBackend};
use hrmatch_search::testing::{InMemoryTaskRepository, TestStore};
use hrmatch_search::{
    document_id, EmbeddingIndexer, EmbeddingMetadataRepository, MatchingPipeline,
    NewEmbeddingMetadata, RerankStage, Retriever,
};
use hrmatch_tasks::{
    standard_handlers, DocumentFetcher, DocumentTextService, ExtractionRegistry, FormApiClient,
    FormApiConfig, Ingestor, NewTask, Services, SourceType, SubmissionRepository,
    SubmissionStatus, TaskContext, TaskHandler, TaskOutcome, TaskRepository, TaskType,
};

const PROSE: &str = "Senior platform engineer with nine years operating Rust services \
                     on Kubernetes, building queues, ingestion pipelines and search.";

// ============================================================================
// FIXTURES
// ============================================================================

fn services(store: &TestStore, reranker: MockRerankBackend) -> Services {
    let embedder = Arc::new(MockEmbeddingBackend::new().with_dimension(3));
    let retriever = Retriever::new(
        store.vectors.clone(),
        store.submissions.clone(),
        store.postings.clone(),
        store.embedding_metadata.clone(),
    )
    .with_batch_delay(Duration::ZERO);
    let pipeline = MatchingPipeline::new(
        retriever,
        RerankStage::new(Arc::new(reranker)),
        store.analysis.clone(),
    )
    .with_task_repository(store.tasks.clone());
    let indexer = EmbeddingIndexer::new(
        embedder,
        store.vectors.clone(),
        store.submissions.clone(),
        store.postings.clone(),
        store.embedding_metadata.clone(),
    );
    let ingestor = Ingestor::new(
        FormApiClient::new(FormApiConfig::default()),
        store.candidates.clone(),
        store.submissions.clone(),
        store.companies.clone(),
        store.postings.clone(),
    );

    Services {
        ingestor: Arc::new(ingestor),
        documents: Arc::new(DocumentTextService::new(
            DocumentFetcher::new(),
            ExtractionRegistry::standard(),
        )),
        submissions: store.submissions.clone(),
        postings: store.postings.clone(),
        indexer: Arc::new(indexer),
        pipeline: Arc::new(pipeline),
        analysis: store.analysis.clone(),
        embedding_metadata: store.embedding_metadata.clone(),
        tasks: store.tasks.clone(),
    }
}

fn handler_for(services: &Services, task_type: TaskType) -> Arc<dyn TaskHandler> {
    standard_handlers(services)
        .into_iter()
        .find(|h| h.can_handle(task_type))
        .unwrap()
}

/// A context for a task that lives outside the store under test.
async fn context(task_type: TaskType, payload: Option<JsonValue>) -> TaskContext {
    let scratch = InMemoryTaskRepository::new();
    let mut task = NewTask::new(task_type);
    if let Some(payload) = payload {
        task = task.with_payload(payload);
    }
    let id = scratch.enqueue(task).await.unwrap();
    TaskContext::new(scratch.get(id).await.unwrap().unwrap())
}

fn ok_result(outcome: TaskOutcome) -> JsonValue {
    match outcome {
        TaskOutcome::Ok(Some(result)) => result,
        other => panic!("expected success, got {:?}", other),
    }
}

/// A unit vector whose cosine similarity to `[1, 0, 0]` is `similarity`.
fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt(), 0.0]
}

async fn place(store: &TestStore, source_type: SourceType, source_id: &str, embedding: Vec<f32>) {
    let hash = match source_type {
        SourceType::Resume => store
            .submissions
            .all()
            .into_iter()
            .find(|s| s.submission_id.to_string() == source_id)
            .and_then(|s| s.resume_text_hash),
        SourceType::JobDescription => store
            .postings
            .all()
            .into_iter()
            .find(|p| p.job_id.to_string() == source_id)
            .and_then(|p| p.description_text_hash),
    }
    .unwrap_or_default();
    let doc_id = document_id(source_type, source_id, &hash);
    store.vectors.insert(
        source_type.collection(),
        &doc_id,
        "document text",
        json!({"source_id": source_id, "source_type": source_type.as_str()}),
        embedding,
    );
    store
        .embedding_metadata
        .upsert(&NewEmbeddingMetadata {
            source_type,
            source_id: source_id.to_string(),
            document_id: doc_id,
            collection_name: source_type.collection().to_string(),
            text_content: "document text".into(),
            source_text_hash: Some(hash),
            model_name: "mock-embed".into(),
            additional_metadata: None,
        })
        .await
        .unwrap();
}

// ============================================================================
// REGISTRATION
// ============================================================================

#[test]
fn test_standard_handlers_cover_every_task_type() {
    let store = TestStore::new();
    let handlers = standard_handlers(&services(&store, MockRerankBackend::new()));
    let covered: HashSet<TaskType> = handlers.iter().map(|h| h.task_type()).collect();
    assert_eq!(handlers.len(), TaskType::ALL.len());
    for task_type in TaskType::ALL {
        assert!(covered.contains(&task_type), "no handler for {}", task_type);
    }
}

// ============================================================================
// PARSING
// ============================================================================

#[tokio::test]
async fn test_parse_resumes_stores_text_and_marks_unreadable_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/ada.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROSE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let ada = store.candidates.add("Ada", "Lovelace", Some("ada@example.com"));
    let grace = store.candidates.add("Grace", "Hopper", Some("grace@example.com"));
    let readable = store.submissions.add(ada.id, None);
    let missing = store.submissions.add(grace.id, None);
    store
        .submissions
        .set_resume_url(readable.submission_id, &format!("{}/files/ada.pdf", server.uri()));
    store
        .submissions
        .set_resume_url(missing.submission_id, &format!("{}/files/gone.pdf", server.uri()));

    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::ParseResumeText);
    let result = ok_result(handler.execute(context(TaskType::ParseResumeText, None).await).await);

    assert_eq!(result["pending"], 2);
    assert_eq!(result["parsed"], 1);
    assert_eq!(result["failed"], 1);
    assert_eq!(result["interrupted"], false);

    let stored = store.submissions.get(readable.submission_id).await.unwrap().unwrap();
    assert!(stored.resume_raw_text.unwrap().contains("Rust services on Kubernetes"));
    let failed = store.submissions.get(missing.submission_id).await.unwrap().unwrap();
    assert_eq!(failed.status, SubmissionStatus::Failed);
    assert!(failed.resume_raw_text.is_none());
}

#[tokio::test]
async fn test_parse_jobs_falls_back_to_description_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/role.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROSE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/broken.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 32]))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let linked = store.postings.add(1, "Platform Engineer", None, true);
    let described = store.postings.add(1, "Data Engineer", None, true);
    let unreadable = store.postings.add(1, "QA Engineer", None, true);
    let inactive = store.postings.add(1, "Retired Role", None, false);
    store
        .postings
        .set_description_url(linked.job_id, &format!("{}/files/role.pdf", server.uri()));
    for job in [&described, &unreadable, &inactive] {
        store
            .postings
            .set_description_url(job.job_id, &format!("{}/files/broken.pdf", server.uri()));
    }
    store
        .postings
        .set_description(described.job_id, "  Build batch pipelines in Rust and SQL.  ");

    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::ParseJobText);
    let result = ok_result(handler.execute(context(TaskType::ParseJobText, None).await).await);

    assert_eq!(result["pending"], 3);
    assert_eq!(result["parsed"], 1);
    assert_eq!(result["from_description"], 1);
    assert_eq!(result["failed"], 1);

    let postings = store.postings.all();
    let text_of = |id: i32| {
        postings
            .iter()
            .find(|p| p.job_id == id)
            .and_then(|p| p.description_raw_text.clone())
    };
    assert!(text_of(linked.job_id).unwrap().contains("ingestion pipelines"));
    assert_eq!(
        text_of(described.job_id).as_deref(),
        Some("Build batch pipelines in Rust and SQL.")
    );
    assert!(text_of(unreadable.job_id).is_none());
    assert!(text_of(inactive.job_id).is_none());
}

// ============================================================================
// EMBEDDINGS
// ============================================================================

#[tokio::test]
async fn test_generate_embeddings_respects_limit() {
    let store = TestStore::new();
    store.add_resume("Ada", "Lovelace", "Wrote the first published algorithm.");
    store.add_resume("Grace", "Hopper", "Built the first compiler for a computer.");
    store.add_resume("Alan", "Turing", "Formalised computation and broke ciphers.");

    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::GenerateResumeEmbeddings);

    let first = ok_result(
        handler
            .execute(context(TaskType::GenerateResumeEmbeddings, Some(json!({"limit": 2}))).await)
            .await,
    );
    assert_eq!(first["indexed"], 2);

    let second = ok_result(
        handler
            .execute(context(TaskType::GenerateResumeEmbeddings, None).await)
            .await,
    );
    assert_eq!(second["indexed"], 1);
    assert_eq!(store.vectors.ids(SourceType::Resume.collection()).len(), 3);

    let bad = handler
        .execute(context(TaskType::GenerateResumeEmbeddings, Some(json!({"limit": "all"}))).await)
        .await;
    assert!(matches!(bad, TaskOutcome::FatalError(_)));
}

#[tokio::test]
async fn test_cleanup_removes_orphaned_embeddings() {
    let store = TestStore::new();
    let kept = store.add_resume("Ada", "Lovelace", "Wrote the first published algorithm.");
    let removed = store.add_resume("Grace", "Hopper", "Built the first compiler.");
    place(&store, SourceType::Resume, &kept.submission_id.to_string(), at_similarity(0.9)).await;
    place(&store, SourceType::Resume, &removed.submission_id.to_string(), at_similarity(0.5)).await;
    store.submissions.remove(removed.submission_id);

    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::CleanupEmbeddings);
    let result = ok_result(handler.execute(context(TaskType::CleanupEmbeddings, None).await).await);

    assert_eq!(result["resume"]["orphaned"], 1);
    assert_eq!(result["job_description"]["orphaned"], 0);
    assert_eq!(result["tasks_removed"], 0);
    assert_eq!(store.vectors.ids(SourceType::Resume.collection()).len(), 1);
    assert_eq!(store.embedding_metadata.all().len(), 1);
}

// ============================================================================
// MATCHING AND RERANKING
// ============================================================================

struct Ranked {
    store: TestStore,
    job_id: i32,
}

/// One job and three resumes at similarities 0.9, 0.7 and 0.5.
async fn ranked() -> Ranked {
    let store = TestStore::new();
    let job = store.add_job("Platform Engineer", "Operate Rust services on Kubernetes");
    place(&store, SourceType::JobDescription, &job.job_id.to_string(), vec![1.0, 0.0, 0.0]).await;
    for (first, last, text, similarity) in [
        ("Ada", "Lovelace", "java developer", 0.9),
        ("Grace", "Hopper", "kubernetes operator author", 0.7),
        ("Linus", "Torvalds", "rust services", 0.5),
    ] {
        let sub = store.add_resume(first, last, text);
        place(&store, SourceType::Resume, &sub.submission_id.to_string(), at_similarity(similarity))
            .await;
    }
    Ranked {
        store,
        job_id: job.job_id,
    }
}

fn reranker() -> MockRerankBackend {
    MockRerankBackend::new()
        .with_score("kubernetes", 6.0)
        .with_score("rust", 3.0)
        .with_default_score(-2.0)
}

#[tokio::test]
async fn test_match_handler_returns_retrieval_only() {
    let r = ranked().await;
    let services = services(&r.store, reranker());
    let handler = handler_for(&services, TaskType::MatchResumesForJob);

    let result = ok_result(
        handler
            .execute(context(TaskType::MatchResumesForJob, Some(json!({"job_id": r.job_id, "top_k": 2}))).await)
            .await,
    );
    assert_eq!(result["matches"].as_array().unwrap().len(), 2);
    assert!(r.store.analysis.results().is_empty());

    let missing = handler
        .execute(context(TaskType::MatchResumesForJob, Some(json!({"top_k": 2}))).await)
        .await;
    assert!(matches!(missing, TaskOutcome::FatalError(_)));
}

#[tokio::test]
async fn test_out_of_range_top_k_fails_the_task() {
    let r = ranked().await;
    let services = services(&r.store, reranker());
    let handler = handler_for(&services, TaskType::RerankResumesForJob);

    for top_k in [json!(0), json!(9_223_372_036_854_775_808u64)] {
        let outcome = handler
            .execute(
                context(
                    TaskType::RerankResumesForJob,
                    Some(json!({"job_id": r.job_id, "top_k": top_k})),
                )
                .await,
            )
            .await;
        match outcome {
            TaskOutcome::FatalError(message) => assert!(message.contains("top_k")),
            other => panic!("expected fatal error, got {:?}", other),
        }
    }
    assert!(r.store.analysis.results().is_empty());
}

#[tokio::test]
async fn test_batch_match_defaults_to_all_active_jobs() {
    let r = ranked().await;
    let services = services(&r.store, reranker());
    let handler = handler_for(&services, TaskType::BatchMatchJobs);

    let all = ok_result(handler.execute(context(TaskType::BatchMatchJobs, None).await).await);
    assert_eq!(all["total_processed"], 1);
    assert_eq!(all["successful"], 1);

    let listed = ok_result(
        handler
            .execute(context(TaskType::BatchMatchJobs, Some(json!({"job_ids": [r.job_id, "999"]}))).await)
            .await,
    );
    assert_eq!(listed["total_processed"], 2);

    let invalid = handler
        .execute(context(TaskType::BatchMatchJobs, Some(json!({"job_ids": "all"}))).await)
        .await;
    assert!(matches!(invalid, TaskOutcome::FatalError(_)));
}

#[tokio::test]
async fn test_rerank_persists_reranked_results() {
    let r = ranked().await;
    let services = services(&r.store, reranker());
    let handler = handler_for(&services, TaskType::RerankResumesForJob);

    let result = ok_result(
        handler
            .execute(context(TaskType::RerankResumesForJob, Some(json!({"job_id": r.job_id}))).await)
            .await,
    );
    assert_eq!(result["reranked"], true);
    let stored = r.store.analysis.results();
    assert!(!stored.is_empty());
    assert!(stored.iter().all(|row| row.job_id == r.job_id));
    assert_eq!(stored.iter().map(|row| row.rank_position).min(), Some(1));
}

#[tokio::test]
async fn test_rerank_outage_is_retryable_and_not_persisted() {
    let r = ranked().await;
    let backend = reranker();
    backend.set_unavailable(true);
    let services = services(&r.store, backend);
    let handler = handler_for(&services, TaskType::RerankResumesForJob);

    let outcome = handler
        .execute(context(TaskType::RerankResumesForJob, Some(json!({"job_id": r.job_id}))).await)
        .await;
    match outcome {
        TaskOutcome::RetryableError(message) => assert!(message.starts_with("Reranking unavailable")),
        other => panic!("expected retryable error, got {:?}", other),
    }
    assert!(r.store.analysis.results().is_empty());
}

// ============================================================================
// DEFERRED PERSISTENCE
// ============================================================================

fn analysis_row(job_id: i32, rank: i32) -> JsonValue {
    json!({
        "session_id": null,
        "job_id": job_id,
        "submission_id": uuid::Uuid::new_v4(),
        "original_similarity": 0.8,
        "rerank_score": 4.5,
        "final_score": 0.9,
        "score_improvement": 0.1,
        "rank_position": rank,
        "search_params": {"top_k": 10},
        "reranker_model": "mock-rerank",
        "workflow_stats": {},
        "job_title": "Platform Engineer",
        "company_id": 1,
        "candidate_name": "Ada Lovelace",
        "candidate_email": "ada@example.com",
        "total_candidates_found": 2,
        "analysis_type": "job_to_resumes",
        "processed_at": Utc::now(),
    })
}

#[tokio::test]
async fn test_persist_analysis_writes_deferred_rows() {
    let store = TestStore::new();
    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::PersistAnalysis);

    let payload = json!({"results": [analysis_row(3, 1), analysis_row(3, 2)]});
    let result = ok_result(handler.execute(context(TaskType::PersistAnalysis, Some(payload)).await).await);
    assert_eq!(result["submitted"], 2);
    assert_eq!(result["inserted"], 2);
    assert_eq!(store.analysis.results().len(), 2);

    let empty = ok_result(handler.execute(context(TaskType::PersistAnalysis, None).await).await);
    assert_eq!(empty["inserted"], 0);
}

#[tokio::test]
async fn test_persist_analysis_retries_while_store_is_down() {
    let store = TestStore::new();
    store.analysis.set_failing(true);
    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::PersistAnalysis);

    let payload = json!({"results": [analysis_row(3, 1)]});
    let outcome = handler.execute(context(TaskType::PersistAnalysis, Some(payload)).await).await;
    assert!(matches!(outcome, TaskOutcome::RetryableError(_)));

    let malformed = handler
        .execute(context(TaskType::PersistAnalysis, Some(json!({"results": [{"job_id": 3}]}))).await)
        .await;
    assert!(matches!(malformed, TaskOutcome::FatalError(_)));
}

/// Run the rerank handler with the given analysis failure, then replay the
/// deferred write once the store recovers.
async fn defer_then_replay(fail_inserts_only: bool) -> (Ranked, JsonValue, usize) {
    let r = ranked().await;
    if fail_inserts_only {
        r.store.analysis.set_failing_inserts(true);
    } else {
        r.store.analysis.set_failing(true);
    }
    let services = services(&r.store, reranker());

    let rerank = handler_for(&services, TaskType::RerankResumesForJob);
    let result = ok_result(
        rerank
            .execute(context(TaskType::RerankResumesForJob, Some(json!({"job_id": r.job_id}))).await)
            .await,
    );
    assert_eq!(result["persist"]["state"], "deferred");

    let tasks = r.store.tasks.of_type(TaskType::PersistAnalysis);
    assert_eq!(tasks.len(), 1);
    let payload = tasks[0].payload.clone().unwrap();
    let rows = payload["results"].as_array().unwrap().len();
    assert!(rows > 0);

    r.store.analysis.set_failing(false);
    r.store.analysis.set_failing_inserts(false);
    let persist = handler_for(&services, TaskType::PersistAnalysis);
    let replayed = ok_result(
        persist
            .execute(context(TaskType::PersistAnalysis, Some(payload)).await)
            .await,
    );
    (r, replayed, rows)
}

#[tokio::test]
async fn test_persist_analysis_completes_session_opened_before_failure() {
    let (r, replayed, rows) = defer_then_replay(true).await;
    assert_eq!(replayed["inserted"], rows as u64);

    let sessions = r.store.analysis.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].total_results, rows as i32);
    assert!(sessions[0].completed_at.is_some());
    assert_eq!(replayed["session_id"], sessions[0].session_id);
    assert!(r
        .store
        .analysis
        .results()
        .iter()
        .all(|row| row.session_id == Some(sessions[0].session_id)));
}

#[tokio::test]
async fn test_persist_analysis_opens_missing_session() {
    let (r, replayed, rows) = defer_then_replay(false).await;
    assert_eq!(replayed["inserted"], rows as u64);

    let sessions = r.store.analysis.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].job_id, Some(r.job_id));
    assert_eq!(sessions[0].total_results, rows as i32);
    assert_eq!(sessions[0].session_stats.as_ref().unwrap()["reranked_candidates"], rows);
    assert!(sessions[0].completed_at.is_some());
    assert_eq!(r.store.analysis.results().len(), rows);
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

#[tokio::test]
async fn test_launch_reranking_queues_each_target_once() {
    let r = ranked().await;
    let services = services(&r.store, reranker());
    let handler = handler_for(&services, TaskType::LaunchReranking);

    let payload = json!({"top_k": 5});
    let first = ok_result(
        handler
            .execute(context(TaskType::LaunchReranking, Some(payload.clone())).await)
            .await,
    );
    assert_eq!(first["jobs_queued"], 1);
    assert_eq!(first["resumes_queued"], 3);
    assert_eq!(first["already_pending"], 0);

    let job_tasks = r.store.tasks.of_type(TaskType::RerankResumesForJob);
    assert_eq!(job_tasks.len(), 1);
    let job_payload = job_tasks[0].payload.clone().unwrap();
    assert_eq!(job_payload["job_id"], r.job_id);
    assert_eq!(job_payload["top_k"], 5);

    let again = ok_result(
        handler
            .execute(context(TaskType::LaunchReranking, Some(payload)).await)
            .await,
    );
    assert_eq!(again["jobs_queued"], 0);
    assert_eq!(again["resumes_queued"], 0);
    assert_eq!(again["already_pending"], 4);
}

#[tokio::test]
async fn test_launch_reranking_scope_limits_direction() {
    let r = ranked().await;
    let services = services(&r.store, reranker());
    let handler = handler_for(&services, TaskType::LaunchReranking);

    let result = ok_result(
        handler
            .execute(context(TaskType::LaunchReranking, Some(json!({"scope": "jobs"}))).await)
            .await,
    );
    assert_eq!(result["jobs_queued"], 1);
    assert_eq!(result["resumes_queued"], 0);
    assert!(r.store.tasks.of_type(TaskType::RerankJobsForResume).is_empty());

    let invalid = handler
        .execute(context(TaskType::LaunchReranking, Some(json!({"scope": "everything"}))).await)
        .await;
    assert!(matches!(invalid, TaskOutcome::FatalError(_)));
}

#[tokio::test]
async fn test_full_pipeline_enqueues_first_stage_with_chain() {
    let store = TestStore::new();
    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::RunFullPipeline);

    let result = ok_result(
        handler
            .execute(context(TaskType::RunFullPipeline, Some(json!({"top_k": 7, "scope": "resumes"}))).await)
            .await,
    );
    assert_eq!(result["stages"].as_array().unwrap().len(), 7);
    assert_eq!(result["stages"][0], "fetch_resumes");
    assert_eq!(result["stages"][6], "launch_reranking");

    let queued = store.tasks.of_type(TaskType::FetchResumes);
    assert_eq!(queued.len(), 1);
    assert_eq!(result["first_task_id"], queued[0].id.to_string());
    let payload = queued[0].payload.clone().unwrap();
    assert_eq!(payload["top_k"], 7);
    assert_eq!(payload["scope"], "resumes");
    assert_eq!(payload["then"].as_array().unwrap().len(), 6);
    assert_eq!(store.tasks.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_fetch_without_form_configuration_fails_permanently() {
    let store = TestStore::new();
    let services = services(&store, MockRerankBackend::new());
    let handler = handler_for(&services, TaskType::FetchResumes);

    let outcome = handler.execute(context(TaskType::FetchResumes, None).await).await;
    match outcome {
        TaskOutcome::FatalError(message) => assert!(message.contains("CV_FORM_ID")),
        other => panic!("expected fatal error, got {:?}", other),
    }
}
