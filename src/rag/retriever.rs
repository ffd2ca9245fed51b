use serde::Serialize;
use serde_json::{json, Map, Value};

use super::embeddings::Embedder;
use super::index::{normalized, VectorIndex};
use super::RagError;
use crate::logging::{log, obj, Domain, Level};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub score: f32,
    pub chunk_id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Top-k cosine search over an owned index.
pub struct Retriever {
    index: VectorIndex,
    embedder: Box<dyn Embedder>,
}

impl Retriever {
    pub fn new(index: VectorIndex, embedder: Box<dyn Embedder>) -> Result<Self, RagError> {
        if index.model != embedder.model() {
            return Err(RagError::ModelMismatch {
                index: index.model.clone(),
                query: embedder.model().to_string(),
            });
        }
        Ok(Self { index, embedder })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Best `top_k` chunks by cosine similarity, highest first.
    pub async fn retrieve(&self, query: &str, top_k: i64) -> Result<Vec<RetrievalHit>, RagError> {
        let k = usize::try_from(top_k).unwrap_or(0).min(self.index.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        let q = normalized(self.embedder.embed_query(query).await?);
        if q.len() != self.index.dim() {
            return Err(RagError::DimensionMismatch {
                index: 0,
                found: q.len(),
                expected: self.index.dim(),
            });
        }

        let scores = self.index.scores(&q);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(k);

        let hits: Vec<RetrievalHit> = order
            .into_iter()
            .map(|i| {
                let item = &self.index.items[i];
                RetrievalHit {
                    score: scores[i],
                    chunk_id: item.id.clone(),
                    text: item.text.clone(),
                    metadata: item.metadata.clone(),
                }
            })
            .collect();
        log(
            Level::Debug,
            Domain::Retrieval,
            "retrieved",
            obj(&[
                ("top_k", json!(k)),
                ("best", hits.first().map(|h| json!(h.score)).unwrap_or(Value::Null)),
            ]),
        );
        Ok(hits)
    }

    /// Hits rendered as `[chunk_id=..]\n<text>` blocks for prompt context.
    pub async fn retrieve_context(&self, query: &str, top_k: i64) -> Result<String, RagError> {
        Ok(format_context(&self.retrieve(query, top_k).await?))
    }
}

pub fn format_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .map(|h| format!("[chunk_id={}]\n{}", h.chunk_id, h.text).trim().to_string())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::KbItem;
    use async_trait::async_trait;

    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model(&self) -> &str {
            "keywords"
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("закон").count() as f32,
                        t.matches("статус").count() as f32,
                        t.matches("инн").count() as f32,
                    ]
                })
                .collect())
        }
    }

    fn item(id: &str, text: &str) -> KbItem {
        KbItem {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Map::new(),
        }
    }

    fn retriever() -> Retriever {
        let items = vec![
            item("fz", "закон 44-ФЗ и закон 223-ФЗ"),
            item("status", "статус контракта"),
            item("inn", "ИНН заказчика"),
        ];
        let vectors = vec![vec![2.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        let index = VectorIndex::build(items, vectors, "keywords").unwrap();
        Retriever::new(index, Box::new(KeywordEmbedder)).unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_cosine() {
        let r = retriever();
        let hits = r.retrieve("какой статус у контракта", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "status");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_retrieve_clamps_top_k() {
        let r = retriever();
        assert!(r.retrieve("закон", 0).await.unwrap().is_empty());
        assert!(r.retrieve("закон", -3).await.unwrap().is_empty());
        assert_eq!(r.retrieve("закон", 50).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let r = retriever();
        assert!(matches!(r.retrieve("   ", 2).await, Err(RagError::EmptyText)));
    }

    #[tokio::test]
    async fn test_context_format() {
        let r = retriever();
        let ctx = r.retrieve_context("закон и ИНН", 2).await.unwrap();
        let blocks: Vec<&str> = ctx.split("\n\n---\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.starts_with("[chunk_id=")));
        assert!(ctx.contains("[chunk_id=fz]\nзакон 44-ФЗ и закон 223-ФЗ"));
    }

    #[test]
    fn test_model_mismatch() {
        let index = VectorIndex::build(vec![item("a", "x")], vec![vec![1.0]], "other").unwrap();
        assert!(matches!(
            Retriever::new(index, Box::new(KeywordEmbedder)),
            Err(RagError::ModelMismatch { .. })
        ));
    }
}
