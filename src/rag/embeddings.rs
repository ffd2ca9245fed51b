use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::RagError;
use crate::config::Config;
use crate::logging::{log, obj, v_str, Domain, Level};
use serde_json::json;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model name; an index is only usable with the model that built it.
    fn model(&self) -> &str;

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let q = query.trim();
        if q.is_empty() {
            return Err(RagError::EmptyText);
        }
        let mut vectors = self.embed_texts(&[q.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Api("no embedding returned for query".to_string()))
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    http: Client,
    base: String,
    api_key: String,
    model: String,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            http: Client::new(),
            base: base.into(),
            api_key: api_key.into(),
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, RagError> {
        let key = cfg.openai_api_key.clone().ok_or(RagError::MissingApiKey)?;
        Ok(Self::new(
            cfg.openai_base.clone(),
            key,
            cfg.embedding_model.clone(),
            cfg.embedding_batch,
        ))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let url = format!("{}/embeddings", self.base.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: batch,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RagError::Api(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        let mut parsed: EmbeddingResponse = resp.json().await?;
        if parsed.data.len() != batch.len() {
            return Err(RagError::Api(format!(
                "requested {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|row| row.index);
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let trimmed: Vec<String> = batch.iter().map(|t| t.trim().to_string()).collect();
            if trimmed.iter().any(|t| t.is_empty()) {
                return Err(RagError::EmptyText);
            }
            vectors.extend(self.embed_batch(&trimmed).await?);
        }
        log(
            Level::Debug,
            Domain::Retrieval,
            "embedded",
            obj(&[("model", v_str(&self.model)), ("texts", json!(texts.len()))]),
        );
        Ok(vectors)
    }
}
