//! Vector store contract.
//!
//! A query returns one inner list per query vector, each ordered by
//! ascending distance. Ids are the document ids written at upsert time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::Vector;

/// One stored document.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub id: String,
    pub document: String,
    pub metadata: JsonValue,
    pub embedding: Vector,
}

/// Optional parts of a query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Include {
    Documents,
    Metadatas,
    Distances,
}

/// What to search with.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Embeddings(Vec<Vector>),
    /// Embedded by the store's configured embedding backend.
    Texts(Vec<String>),
}

impl QueryInput {
    pub fn len(&self) -> usize {
        match self {
            QueryInput::Embeddings(v) => v.len(),
            QueryInput::Texts(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Nearest-neighbour query against one collection.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub collection: String,
    pub input: QueryInput,
    pub n_results: usize,
    pub include: Vec<Include>,
}

impl VectorQuery {
    /// Query with one embedding, including documents, metadatas and distances.
    pub fn by_embedding(collection: impl Into<String>, embedding: Vector, n_results: usize) -> Self {
        Self {
            collection: collection.into(),
            input: QueryInput::Embeddings(vec![embedding]),
            n_results,
            include: vec![Include::Documents, Include::Metadatas, Include::Distances],
        }
    }

    /// Query with one text, including documents, metadatas and distances.
    pub fn by_text(collection: impl Into<String>, text: impl Into<String>, n_results: usize) -> Self {
        Self {
            collection: collection.into(),
            input: QueryInput::Texts(vec![text.into()]),
            n_results,
            include: vec![Include::Documents, Include::Metadatas, Include::Distances],
        }
    }

    pub fn includes(&self, part: Include) -> bool {
        self.include.contains(&part)
    }
}

/// Column-oriented query response, one inner list per query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorQueryResponse {
    pub ids: Vec<Vec<String>>,
    pub documents: Option<Vec<Vec<String>>>,
    pub metadatas: Option<Vec<Vec<JsonValue>>>,
    pub distances: Option<Vec<Vec<f32>>>,
}

/// Row view of one neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Option<JsonValue>,
    pub distance: Option<f32>,
}

impl VectorHit {
    /// `source_id` recorded in the document metadata.
    pub fn source_id(&self) -> Option<String> {
        match self.metadata.as_ref()?.get("source_id")? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl VectorQueryResponse {
    /// Neighbours of query `index` as rows.
    pub fn hits(&self, index: usize) -> Vec<VectorHit> {
        let Some(ids) = self.ids.get(index) else {
            return Vec::new();
        };
        let docs = self.documents.as_ref().and_then(|d| d.get(index));
        let metas = self.metadatas.as_ref().and_then(|m| m.get(index));
        let dists = self.distances.as_ref().and_then(|d| d.get(index));

        ids.iter()
            .enumerate()
            .map(|(i, id)| VectorHit {
                id: id.clone(),
                document: docs.and_then(|d| d.get(i)).cloned(),
                metadata: metas.and_then(|m| m.get(i)).cloned(),
                distance: dists.and_then(|d| d.get(i)).copied(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.iter().all(|q| q.is_empty())
    }
}

/// Storage of embeddings grouped into named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace documents by id.
    async fn upsert(&self, collection: &str, documents: Vec<VectorDocument>) -> Result<()>;

    /// Stored embedding of one document.
    async fn get_embedding(&self, collection: &str, id: &str) -> Result<Option<Vector>>;

    /// Nearest neighbours by cosine distance.
    async fn query(&self, query: VectorQuery) -> Result<VectorQueryResponse>;

    /// Delete documents by id, returning how many existed.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64>;

    /// Number of documents in a collection.
    async fn count(&self, collection: &str) -> Result<i64>;

    /// Whether the store is reachable.
    async fn health_check(&self) -> Result<bool>;
}
