//! Form ingestion against a mocked form API and in-memory repositories.

use serde_json::{json, Value as JsonValue};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hrmatch_search::testing::TestStore;
use hrmatch_tasks::{
    DocumentFetcher, Error, FormApiClient, FormApiConfig, IngestReport, Ingestor,
    SubmissionRepository,
};

const RESUME_FORM: &str = "/v1/api/forms/cv-form/submissions";
const JOB_FORM: &str = "/v1/api/forms/job-form/submissions";
const RESUME_UPLOAD: &str = "For us to get to know you better, please upload your resume here:";

fn config(server: &MockServer) -> FormApiConfig {
    FormApiConfig::default()
        .with_base_url(server.uri())
        .with_api_key("test-key")
        .with_resume_form("cv-form")
        .with_job_form("job-form")
}

fn ingestor(store: &TestStore, config: FormApiConfig) -> Ingestor {
    Ingestor::new(
        FormApiClient::new(config),
        store.candidates.clone(),
        store.submissions.clone(),
        store.companies.clone(),
        store.postings.clone(),
    )
}

fn question(name: &str, value: JsonValue) -> JsonValue {
    json!({"id": name.to_lowercase().replace(' ', "_"), "name": name, "value": value})
}

fn resume(id: &str, first: &str, email: &str, position: &str, updated: &str) -> JsonValue {
    json!({
        "submissionId": id,
        "submissionTime": "2024-03-01T10:00:00.000Z",
        "lastUpdatedAt": updated,
        "questions": [
            question("First Name", json!(first)),
            question("Last Name", json!("Example")),
            question("Email", json!(email)),
            question("What position are you applying for?", json!(position)),
            question("Years of Experience", json!("7")),
        ],
    })
}

fn with_upload(mut submission: JsonValue, url: &str) -> JsonValue {
    submission["questions"]
        .as_array_mut()
        .unwrap()
        .push(question(RESUME_UPLOAD, json!([{"url": url, "filename": "cv.pdf"}])));
    submission
}

fn page(responses: Vec<JsonValue>, total: usize, page_count: usize) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "responses": responses,
        "totalResponses": total,
        "pageCount": page_count,
    }))
}

// ============================================================================
// RESUMES
// ============================================================================

#[tokio::test]
async fn test_ingest_resumes_reads_every_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .and(header("authorization", "Bearer test-key"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .respond_with(page(
            vec![
                resume("s1", "Ada", "ada@example.com", "Engineer", "2024-03-01T10:00:00.000Z"),
                resume("s2", "Grace", "grace@example.com", "Architect", "2024-03-01T11:00:00.000Z"),
            ],
            3,
            2,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .and(query_param("offset", "2"))
        .respond_with(page(
            vec![resume("s3", "Alan", "alan@example.com", "Analyst", "2024-03-02T09:30:00.000Z")],
            3,
            2,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let store = TestStore::new();
    let report = ingestor(&store, config(&server).with_page_size(2))
        .ingest_resumes()
        .await
        .unwrap();

    assert_eq!(
        report,
        IngestReport {
            received: 3,
            created: 3,
            ..Default::default()
        }
    );
    assert_eq!(store.candidates.all().len(), 3);
    let submissions = store.submissions.all();
    let ada = submissions
        .iter()
        .find(|s| s.form_submission_id == "s1")
        .unwrap();
    assert_eq!(ada.position.as_deref(), Some("Engineer"));
    assert_eq!(ada.years_experience, Some(7));
}

#[tokio::test]
async fn test_second_run_asks_only_for_newer_submissions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .respond_with(page(
            vec![resume("s1", "Ada", "ada@example.com", "Engineer", "2024-03-02T09:30:00.000Z")],
            1,
            1,
        ))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let ingestor = ingestor(&store, config(&server));
    ingestor.ingest_resumes().await.unwrap();
    assert!(store.submissions.latest_form_update().await.unwrap().is_some());

    server.reset().await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .and(query_param("afterDate", "2024-03-02T09:30:00.000Z"))
        .respond_with(page(
            vec![resume(
                "s1",
                "Ada",
                "ada@example.com",
                "Staff Engineer",
                "2024-03-05T08:00:00.000Z",
            )],
            1,
            1,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let report = ingestor.ingest_resumes().await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);

    let submissions = store.submissions.all();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].position.as_deref(), Some("Staff Engineer"));
    assert_eq!(store.candidates.all().len(), 1);
}

#[tokio::test]
async fn test_redelivered_content_is_skipped_as_duplicate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .respond_with(page(
            vec![
                resume("s1", "Ada", "ada@example.com", "Engineer", "2024-03-01T10:00:00.000Z"),
                // Same answers under a new submission id
                resume("s9", "Ada", "ada@example.com", "Engineer", "2024-03-04T10:00:00.000Z"),
                resume("", "Nobody", "nobody@example.com", "Engineer", "2024-03-04T11:00:00.000Z"),
            ],
            3,
            1,
        ))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let report = ingestor(&store, config(&server))
        .ingest_resumes()
        .await
        .unwrap();

    assert_eq!(report.received, 3);
    assert_eq!(report.created, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(store.submissions.all().len(), 1);
}

#[tokio::test]
async fn test_identical_attachments_are_duplicates() {
    let server = MockServer::start().await;
    let cv = b"%PDF-1.4 same resume bytes".to_vec();
    for file in ["/files/a.pdf", "/files/b.pdf"] {
        Mock::given(method("GET"))
            .and(path(file))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(cv.clone()))
            .mount(&server)
            .await;
    }
    let first = with_upload(
        resume("s1", "Ada", "ada@example.com", "Engineer", "2024-03-01T10:00:00.000Z"),
        &format!("{}/files/a.pdf", server.uri()),
    );
    let second = with_upload(
        resume("s2", "Augusta", "augusta@example.com", "Mathematician", "2024-03-03T10:00:00.000Z"),
        &format!("{}/files/b.pdf", server.uri()),
    );
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .respond_with(page(vec![first, second], 2, 1))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let report = ingestor(&store, config(&server))
        .with_file_hashing(DocumentFetcher::new())
        .ingest_resumes()
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.duplicates, 1);
    let stored = store.submissions.all();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].resume_url.as_deref().unwrap().ends_with("/files/a.pdf"));
}

#[tokio::test]
async fn test_form_api_outage_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let err = ingestor(&store, config(&server))
        .ingest_resumes()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
    assert!(err.is_retryable());
    assert!(store.submissions.all().is_empty());
}

#[tokio::test]
async fn test_rejected_api_key_is_configuration_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESUME_FORM))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let err = ingestor(&store, config(&server))
        .ingest_resumes()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let mut unconfigured = config(&server);
    unconfigured.api_key = None;
    let err = ingestor(&store, unconfigured).ingest_resumes().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ============================================================================
// JOBS
// ============================================================================

fn job_submission(id: &str, company: &str, extra_vacancy: Option<&str>) -> JsonValue {
    let mut questions = vec![
        question("Your company", json!(company)),
        question("Website", json!("https://example.com")),
        question("Main vacancy (required)", json!("Platform Engineer")),
        question("Job Location", json!("Berlin")),
        question("Remote Work Available", json!("Yes")),
        question(
            "Upload job description (PDF or Word) (1)",
            json!([{"url": "https://files.example.com/platform.pdf"}]),
        ),
    ];
    if let Some(title) = extra_vacancy {
        questions.push(question("Second vacancy (optional)", json!(title)));
    }
    json!({
        "submissionId": id,
        "submissionTime": "2024-04-01T09:00:00.000Z",
        "lastUpdatedAt": "2024-04-01T09:00:00.000Z",
        "questions": questions,
    })
}

#[tokio::test]
async fn test_ingest_jobs_stores_each_vacancy_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JOB_FORM))
        .respond_with(page(
            vec![
                job_submission("j1", "Acme", Some("Data Engineer")),
                json!({
                    "submissionId": "j2",
                    "questions": [question("Your company", json!("No Vacancies Ltd"))],
                }),
            ],
            2,
            1,
        ))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let report = ingestor(&store, config(&server)).ingest_jobs().await.unwrap();

    assert_eq!(report.received, 2);
    assert_eq!(report.created, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(store.companies.all().len(), 1);

    let mut postings = store.postings.all();
    postings.sort_by_key(|p| p.job_id);
    assert_eq!(postings.len(), 2);
    assert_eq!(postings[0].title, "Platform Engineer");
    assert_eq!(postings[1].title, "Data Engineer");
    // Extra slots inherit the main vacancy's details
    assert_eq!(postings[1].location.as_deref(), Some("Berlin"));
    assert!(postings[1].remote_work);
    assert_eq!(postings[1].description_url, postings[0].description_url);
    assert!(postings.iter().all(|p| p.is_active));
}

#[tokio::test]
async fn test_reingesting_same_job_submission_is_duplicate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JOB_FORM))
        .respond_with(page(vec![job_submission("j1", "Acme", None)], 1, 1))
        .mount(&server)
        .await;

    let store = TestStore::new();
    let ingestor = ingestor(&store, config(&server));
    let first = ingestor.ingest_jobs().await.unwrap();
    assert_eq!(first.created, 1);

    let second = ingestor.ingest_jobs().await.unwrap();
    assert_eq!(second.received, 1);
    assert_eq!(second.duplicates, 1);
    assert_eq!(store.postings.all().len(), 1);
}

#[tokio::test]
async fn test_missing_job_form_is_configuration_error() {
    let server = MockServer::start().await;
    let store = TestStore::new();
    let mut config = config(&server);
    config.job_form_id = None;

    let err = ingestor(&store, config).ingest_jobs().await.unwrap_err();
    match err {
        Error::Config(message) => assert!(message.contains("JOB_FORM_ID")),
        other => panic!("unexpected error {:?}", other),
    }
}
