use sha2::{Digest, Sha256};

use super::{KbItem, RagError};

/// Row-normalized embedding matrix plus the chunks it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    pub vectors: Vec<Vec<f32>>,
    pub items: Vec<KbItem>,
    pub model: String,
    /// Fingerprint of the chunk ids and texts the vectors were computed from.
    pub kb_hash: String,
}

impl VectorIndex {
    /// Pair chunks with their embeddings and L2-normalize every row.
    /// Zero-norm rows are kept as is.
    pub fn build(items: Vec<KbItem>, vectors: Vec<Vec<f32>>, model: impl Into<String>) -> Result<Self, RagError> {
        if items.len() != vectors.len() {
            return Err(RagError::LengthMismatch {
                items: items.len(),
                vectors: vectors.len(),
            });
        }
        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        if dim == 0 {
            return Err(RagError::EmptyIndex);
        }
        if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(RagError::DimensionMismatch {
                index,
                found: v.len(),
                expected: dim,
            });
        }
        let kb_hash = knowledge_hash(&items);
        let vectors = vectors.into_iter().map(normalized).collect();
        Ok(Self {
            vectors,
            items,
            model: model.into(),
            kb_hash,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.vectors.first().map(Vec::len).unwrap_or(0)
    }

    /// Cosine similarity of every row against an already-normalized query.
    pub fn scores(&self, query: &[f32]) -> Vec<f32> {
        self.vectors
            .iter()
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum())
            .collect()
    }
}

/// L2-normalize; a zero vector is returned unchanged.
pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// SHA-256 over chunk ids and texts, hex encoded.
pub fn knowledge_hash(items: &[KbItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.text.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn item(id: &str, text: &str) -> KbItem {
        KbItem {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_build_normalizes_rows() {
        let idx = VectorIndex::build(
            vec![item("a", "x"), item("b", "y")],
            vec![vec![3.0, 4.0], vec![0.0, 0.0]],
            "m",
        )
        .unwrap();
        assert_eq!(idx.vectors[0], vec![0.6, 0.8]);
        assert_eq!(idx.vectors[1], vec![0.0, 0.0]);
        assert_eq!(idx.dim(), 2);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn test_build_rejects_bad_shapes() {
        assert!(matches!(
            VectorIndex::build(vec![item("a", "x")], vec![], "m"),
            Err(RagError::LengthMismatch { items: 1, vectors: 0 })
        ));
        assert!(matches!(VectorIndex::build(vec![], vec![], "m"), Err(RagError::EmptyIndex)));
        assert!(matches!(
            VectorIndex::build(vec![item("a", "x"), item("b", "y")], vec![vec![1.0, 0.0], vec![1.0]], "m"),
            Err(RagError::DimensionMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = knowledge_hash(&[item("1", "text")]);
        assert_eq!(a, knowledge_hash(&[item("1", "text")]));
        assert_ne!(a, knowledge_hash(&[item("1", "text2")]));
        assert_ne!(knowledge_hash(&[item("1", "2")]), knowledge_hash(&[item("12", "")]));
    }
}
