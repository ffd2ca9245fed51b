//! Knowledge-base retrieval: embeddings, a persisted vector index and a
//! brute-force cosine retriever.
//!
//! Nothing here is global. Callers build a [`Retriever`] once (usually via
//! [`get_or_build_index`]) and pass it to whatever answers questions.

pub mod embeddings;
pub mod index;
pub mod retriever;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use embeddings::{Embedder, OpenAiEmbedder};
pub use index::VectorIndex;
pub use retriever::{format_context, RetrievalHit, Retriever};
pub use store::{get_or_build_index, IndexStore, KnowledgeBase};

#[derive(Debug, Error)]
pub enum RagError {
    #[error("cannot embed an empty text")]
    EmptyText,

    #[error("knowledge base chunk {index} has empty text")]
    EmptyChunk { index: usize },

    #[error("{items} chunks but {vectors} vectors")]
    LengthMismatch { items: usize, vectors: usize },

    #[error("index must contain at least one non-empty vector")]
    EmptyIndex,

    #[error("vector {index} has dimension {found}, expected {expected}")]
    DimensionMismatch { index: usize, found: usize, expected: usize },

    #[error("index was embedded with {index} but queries use {query}")]
    ModelMismatch { index: String, query: String },

    #[error("no vector index stored at {0}")]
    IndexMissing(String),

    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("embedding API error: {0}")]
    Api(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One knowledge-base chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
