//! Handlers for every task type.
//!
//! Handlers share one [`Services`] bundle; [`standard_handlers`] builds the
//! full set a worker registers.

mod embeddings;
mod ingest;
mod matching;
mod orchestration;

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use hrmatch_core::{
    AnalysisRepository, EmbeddingMetadataRepository, JobPostingRepository, SearchType,
    SourceType, SubmissionRepository, TaskRepository,
};
use hrmatch_search::{EmbeddingIndexer, MatchingPipeline};

use crate::extraction::DocumentTextService;
use crate::handler::TaskHandler;
use crate::ingest::Ingestor;

pub use embeddings::{CleanupEmbeddingsHandler, GenerateEmbeddingsHandler};
pub use ingest::{FetchSubmissionsHandler, ParseReport, ParseTextHandler};
pub use matching::{BatchMatchHandler, MatchHandler, PersistAnalysisHandler, RerankHandler};
pub use orchestration::{
    LaunchReport, LaunchRerankingHandler, LaunchScope, RunFullPipelineHandler, FULL_PIPELINE_STAGES,
};

/// Everything the handlers call into.
#[derive(Clone)]
pub struct Services {
    pub ingestor: Arc<Ingestor>,
    pub documents: Arc<DocumentTextService>,
    pub submissions: Arc<dyn SubmissionRepository>,
    pub postings: Arc<dyn JobPostingRepository>,
    pub indexer: Arc<EmbeddingIndexer>,
    pub pipeline: Arc<MatchingPipeline>,
    pub analysis: Arc<dyn AnalysisRepository>,
    pub embedding_metadata: Arc<dyn EmbeddingMetadataRepository>,
    pub tasks: Arc<dyn TaskRepository>,
}

/// One handler per task type.
pub fn standard_handlers(services: &Services) -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(FetchSubmissionsHandler::resumes(services.ingestor.clone())),
        Arc::new(FetchSubmissionsHandler::jobs(services.ingestor.clone())),
        Arc::new(ParseTextHandler::resumes(
            services.documents.clone(),
            services.submissions.clone(),
            services.postings.clone(),
        )),
        Arc::new(ParseTextHandler::jobs(
            services.documents.clone(),
            services.submissions.clone(),
            services.postings.clone(),
        )),
        Arc::new(GenerateEmbeddingsHandler::new(
            SourceType::Resume,
            services.indexer.clone(),
        )),
        Arc::new(GenerateEmbeddingsHandler::new(
            SourceType::JobDescription,
            services.indexer.clone(),
        )),
        Arc::new(CleanupEmbeddingsHandler::new(
            services.indexer.clone(),
            services.tasks.clone(),
        )),
        Arc::new(MatchHandler::new(
            SearchType::JobToResumes,
            services.pipeline.clone(),
        )),
        Arc::new(MatchHandler::new(
            SearchType::ResumeToJobs,
            services.pipeline.clone(),
        )),
        Arc::new(BatchMatchHandler::new(
            SearchType::JobToResumes,
            services.pipeline.clone(),
            services.submissions.clone(),
            services.postings.clone(),
        )),
        Arc::new(BatchMatchHandler::new(
            SearchType::ResumeToJobs,
            services.pipeline.clone(),
            services.submissions.clone(),
            services.postings.clone(),
        )),
        Arc::new(RerankHandler::new(
            SearchType::JobToResumes,
            services.pipeline.clone(),
        )),
        Arc::new(RerankHandler::new(
            SearchType::ResumeToJobs,
            services.pipeline.clone(),
        )),
        Arc::new(PersistAnalysisHandler::new(services.analysis.clone())),
        Arc::new(LaunchRerankingHandler::new(
            services.embedding_metadata.clone(),
            services.tasks.clone(),
        )),
        Arc::new(RunFullPipelineHandler::new(services.tasks.clone())),
    ]
}

/// Payload keys forwarded from an orchestration task to the tasks it creates.
pub(crate) const MATCH_PARAM_KEYS: [&str; 3] = ["top_k", "min_similarity", "min_rerank_score"];

/// The matching parameters present in `payload`.
pub(crate) fn match_params(payload: Option<&JsonValue>) -> Map<String, JsonValue> {
    let mut params = Map::new();
    let Some(payload) = payload else {
        return params;
    };
    for key in MATCH_PARAM_KEYS {
        if let Some(value) = payload.get(key).filter(|v| !v.is_null()) {
            params.insert(key.to_string(), value.clone());
        }
    }
    params
}
