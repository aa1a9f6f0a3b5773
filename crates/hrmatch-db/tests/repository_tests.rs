//! Integration tests for the Postgres repositories and vector store.
//!
//! **IMPORTANT**: These tests require PostgreSQL with the pgvector extension.
//! Set `DATABASE_URL` and run with `cargo test -p hrmatch-db -- --ignored`.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use hrmatch_db::test_fixtures::{
    connect_test_database, sample_candidate, sample_company, unique_suffix,
};
use hrmatch_db::{
    text_hash, AnalysisRepository, CandidateRepository, CompanyRepository, ContentHashes,
    EmbeddingMetadataRepository, JobPostingRepository, NewAnalysisResult, NewAnalysisSession,
    NewEmbeddingMetadata, NewJobPosting, NewSubmission, NewTask, SourceType,
    SubmissionRepository, SubmissionStatus, TaskQueue, TaskRepository, TaskStatus, TaskType,
    Vector, VectorDocument, VectorQuery, VectorStore,
};

fn hashes(tag: &str) -> ContentHashes {
    ContentHashes {
        content_hash: format!("content-{}", tag),
        file_hash: None,
        metadata_hash: format!("meta-{}", tag),
        composite_hash: format!("composite-{}", tag),
    }
}

fn unit_vector(hot: usize) -> Vector {
    let mut v = vec![0.0f32; 768];
    v[hot] = 1.0;
    Vector::from(v)
}

#[tokio::test]
#[ignore]
async fn test_candidate_upsert_by_email_is_idempotent() {
    let db = connect_test_database().await;
    let candidate = sample_candidate();

    let first = db.candidates.upsert_by_email(&candidate).await.unwrap();
    assert!(first.created);

    let mut changed = candidate.clone();
    changed.email = changed.email.map(|e| e.to_uppercase());
    changed.phone = Some("+44 20 0000".into());
    let second = db.candidates.upsert_by_email(&changed).await.unwrap();
    assert!(!second.created);
    assert_eq!(first.id, second.id);

    let stored = db.candidates.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.phone.as_deref(), Some("+44 20 0000"));
    assert_eq!(stored.display_name(), "Ada Lovelace");
}

#[tokio::test]
#[ignore]
async fn test_submission_text_lifecycle() {
    let db = connect_test_database().await;
    let candidate = db.candidates.upsert_by_email(&sample_candidate()).await.unwrap();

    let form_id = format!("sub-{}", unique_suffix());
    let new_submission = NewSubmission {
        form_submission_id: form_id.clone(),
        position: Some("Backend Engineer".into()),
        resume_url: Some("https://files.example.com/cv.pdf".into()),
        ..Default::default()
    };
    let outcome = db
        .submissions
        .upsert_from_form(candidate.id, &new_submission, &hashes(&form_id))
        .await
        .unwrap();
    assert!(outcome.created);

    let needing = db.submissions.list_needing_text(1000).await.unwrap();
    assert!(needing.iter().any(|s| s.submission_id == outcome.id));

    db.submissions
        .set_resume_text(outcome.id, "Rust and PostgreSQL experience")
        .await
        .unwrap();
    let stored = db.submissions.get(outcome.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Parsed);
    assert_eq!(
        stored.resume_text_hash.as_deref(),
        Some(text_hash("Rust and PostgreSQL experience").as_str())
    );

    // Same resume link keeps the text; a new link clears it.
    db.submissions
        .upsert_from_form(candidate.id, &new_submission, &hashes(&form_id))
        .await
        .unwrap();
    assert!(db.submissions.get(outcome.id).await.unwrap().unwrap().has_text());

    let relinked = NewSubmission {
        resume_url: Some("https://files.example.com/cv-v2.pdf".into()),
        ..new_submission
    };
    let again = db
        .submissions
        .upsert_from_form(candidate.id, &relinked, &hashes(&form_id))
        .await
        .unwrap();
    assert!(!again.created);
    let stored = db.submissions.get(outcome.id).await.unwrap().unwrap();
    assert!(!stored.has_text());
    assert_eq!(stored.status, SubmissionStatus::Submitted);
}

#[tokio::test]
#[ignore]
async fn test_stale_sources_track_text_changes() {
    let db = connect_test_database().await;
    let candidate = db.candidates.upsert_by_email(&sample_candidate()).await.unwrap();
    let form_id = format!("sub-{}", unique_suffix());
    let sub = db
        .submissions
        .upsert_from_form(
            candidate.id,
            &NewSubmission {
                form_submission_id: form_id.clone(),
                ..Default::default()
            },
            &hashes(&form_id),
        )
        .await
        .unwrap();
    db.submissions.set_resume_text(sub.id, "version one").await.unwrap();

    let source_id = sub.id.to_string();
    let stale = db.embedding_metadata.stale_sources(SourceType::Resume).await.unwrap();
    let entry = stale.iter().find(|s| s.source_id == source_id).unwrap();
    assert!(entry.existing_document_id.is_none());

    let document_id = format!("resume_{}_{}", source_id, &unique_suffix()[..8]);
    db.embedding_metadata
        .upsert(&NewEmbeddingMetadata {
            source_type: SourceType::Resume,
            source_id: source_id.clone(),
            document_id: document_id.clone(),
            collection_name: "resume_embeddings".into(),
            text_content: "version one".into(),
            source_text_hash: Some(text_hash("version one")),
            model_name: "nomic-embed-text".into(),
            additional_metadata: None,
        })
        .await
        .unwrap();
    let stale = db.embedding_metadata.stale_sources(SourceType::Resume).await.unwrap();
    assert!(!stale.iter().any(|s| s.source_id == source_id));

    db.submissions.set_resume_text(sub.id, "version two").await.unwrap();
    let stale = db.embedding_metadata.stale_sources(SourceType::Resume).await.unwrap();
    let entry = stale.iter().find(|s| s.source_id == source_id).unwrap();
    assert_eq!(entry.existing_document_id.as_deref(), Some(document_id.as_str()));

    let missing = db
        .embedding_metadata
        .sources_without_embeddings(SourceType::Resume, &[source_id.clone(), "nope".into()])
        .await
        .unwrap();
    assert_eq!(missing, vec!["nope".to_string()]);
}

#[tokio::test]
#[ignore]
async fn test_analysis_insert_is_idempotent_per_batch() {
    let db = connect_test_database().await;
    let company = db.companies.upsert_by_name(&sample_company()).await.unwrap();
    let job = db
        .postings
        .upsert_from_form(
            company.id,
            &NewJobPosting {
                form_submission_id: Some(format!("job-{}", unique_suffix())),
                vacancy_slot: 1,
                title: Some("Data Engineer".into()),
                description: Some("Pipelines in Rust".into()),
                ..Default::default()
            },
            &hashes("job"),
        )
        .await
        .unwrap();
    let candidate = db.candidates.upsert_by_email(&sample_candidate()).await.unwrap();
    let form_id = format!("sub-{}", unique_suffix());
    let sub = db
        .submissions
        .upsert_from_form(
            candidate.id,
            &NewSubmission {
                form_submission_id: form_id.clone(),
                ..Default::default()
            },
            &hashes(&form_id),
        )
        .await
        .unwrap();

    let processed_at = Utc::now();
    let session = NewAnalysisSession {
        session_uuid: Uuid::new_v4(),
        job_id: Some(job.id),
        submission_id: None,
        company_id: Some(company.id),
        analysis_type: "job_to_resumes_rerank".into(),
        search_params: json!({"top_k": 20}),
        reranker_model: "BAAI/bge-reranker-v2-m3".into(),
        started_at: processed_at,
    };
    let session_id = db.analysis.create_session(&session).await.unwrap();
    // Replaying a deferred write reopens the same session.
    assert_eq!(db.analysis.create_session(&session).await.unwrap(), session_id);

    let row = NewAnalysisResult {
        session_id: Some(session_id),
        job_id: job.id,
        submission_id: sub.id,
        original_similarity: 0.8,
        rerank_score: 4.0,
        final_score: 0.3 * 0.8 + 0.7 * 0.7,
        score_improvement: 0.7 - 0.8,
        rank_position: 1,
        search_params: json!({"top_k": 20}),
        reranker_model: "BAAI/bge-reranker-v2-m3".into(),
        workflow_stats: json!({"total_candidates_found": 1}),
        job_title: Some("Data Engineer".into()),
        company_id: Some(company.id),
        candidate_name: Some("Ada Lovelace".into()),
        candidate_email: None,
        total_candidates_found: 1,
        analysis_type: "job_to_resumes_rerank".into(),
        processed_at,
    };

    assert_eq!(db.analysis.insert_results(&[row.clone()]).await.unwrap(), 1);
    assert_eq!(db.analysis.insert_results(&[row.clone()]).await.unwrap(), 0);

    let later = NewAnalysisResult {
        processed_at: processed_at + ChronoDuration::seconds(5),
        ..row
    };
    assert_eq!(db.analysis.insert_results(&[later]).await.unwrap(), 1);

    let latest = db.analysis.get_latest_by_job(job.id).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].rank_position, 1);

    let analytics = db.analysis.get_analytics_by_job(job.id).await.unwrap();
    assert_eq!(analytics.total_analyses, 2);

    db.analysis
        .complete_session(session_id, 1, json!({"reranked": true}))
        .await
        .unwrap();
    let sessions = db.analysis.get_recent_sessions(50).await.unwrap();
    assert!(sessions.iter().any(|s| s.session_id == session_id && s.completed_at.is_some()));
}

#[tokio::test]
#[ignore]
async fn test_task_claim_respects_queue_and_run_after() {
    let db = connect_test_database().await;
    let marker = unique_suffix();

    let deferred = db
        .tasks
        .enqueue(
            NewTask::new(TaskType::CleanupEmbeddings)
                .with_payload(json!({"marker": marker, "deferred": true}))
                .with_priority(100)
                .with_run_after(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();
    let ready = db
        .tasks
        .enqueue(
            NewTask::new(TaskType::CleanupEmbeddings)
                .with_payload(json!({"marker": marker}))
                .with_priority(100),
        )
        .await
        .unwrap();

    let claimed = db
        .tasks
        .claim_next(&[TaskQueue::Embeddings], &[TaskType::CleanupEmbeddings])
        .await
        .unwrap()
        .unwrap();
    assert_ne!(claimed.id, deferred);
    assert_eq!(claimed.id, ready);
    assert_eq!(claimed.status, TaskStatus::Running);

    db.tasks
        .retry_later(claimed.id, "reranker down", Duration::from_secs(60))
        .await
        .unwrap();
    let retried = db.tasks.get(claimed.id).await.unwrap().unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.run_after > Utc::now());

    let dup = db
        .tasks
        .enqueue_deduplicated(
            NewTask::new(TaskType::CleanupEmbeddings).with_payload(json!({"marker": marker})),
        )
        .await
        .unwrap();
    assert!(dup.is_none());

    db.tasks.fail(deferred, "cancelled by test").await.unwrap();
    db.tasks.fail(claimed.id, "cancelled by test").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_vector_store_orders_by_distance() {
    let db = connect_test_database().await;
    let collection = format!("test_{}", unique_suffix());

    db.vectors
        .upsert(
            &collection,
            vec![
                VectorDocument {
                    id: "near".into(),
                    document: "close match".into(),
                    metadata: json!({"source_id": "1"}),
                    embedding: unit_vector(0),
                },
                VectorDocument {
                    id: "far".into(),
                    document: "orthogonal".into(),
                    metadata: json!({"source_id": "2"}),
                    embedding: unit_vector(1),
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(db.vectors.count(&collection).await.unwrap(), 2);

    let response = db
        .vectors
        .query(VectorQuery::by_embedding(&collection, unit_vector(0), 10))
        .await
        .unwrap();
    let hits = response.hits(0);
    assert_eq!(hits[0].id, "near");
    assert!(hits[0].distance.unwrap() < 1e-6);
    assert_eq!(hits[1].id, "far");
    assert!((hits[1].distance.unwrap() - 1.0).abs() < 1e-6);

    let removed = db
        .vectors
        .delete(&collection, &["near".to_string(), "far".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(db
        .vectors
        .query(VectorQuery::by_embedding(&collection, unit_vector(0), 10))
        .await
        .unwrap()
        .is_empty());
}
