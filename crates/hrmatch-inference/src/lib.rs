//! # hrmatch-inference
//!
//! Model backends for hrmatch:
//!
//! - [`OllamaBackend`]: text embeddings via Ollama's `/api/embed`
//! - [`HttpRerankBackend`]: cross-encoder relevance scores over HTTP
//! - [`mock`]: deterministic backends for tests (feature `mock`)
//!
//! Both real backends report an unreachable service as
//! [`Error::Unavailable`](hrmatch_core::Error::Unavailable) so callers can
//! tell an outage from bad input.

#[cfg(feature = "ollama")]
pub mod ollama;
pub mod reranker;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use hrmatch_core::{EmbeddingBackend, RerankBackend};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;
pub use reranker::HttpRerankBackend;
