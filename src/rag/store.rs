use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::path::Path;

use super::embeddings::Embedder;
use super::index::{knowledge_hash, VectorIndex};
use super::{KbItem, RagError};
use crate::logging::{log, obj, v_str, Domain, Level};

/// The fixed set of chunks the retriever answers from.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    pub items: Vec<KbItem>,
}

impl KnowledgeBase {
    /// Every chunk must carry non-blank text.
    pub fn new(items: Vec<KbItem>) -> Result<Self, RagError> {
        if let Some(index) = items.iter().position(|i| i.text.trim().is_empty()) {
            return Err(RagError::EmptyChunk { index });
        }
        Ok(Self { items })
    }

    /// Load a JSON array of `{id, text, metadata}` objects.
    pub fn load(path: &Path) -> Result<Self, RagError> {
        let raw = std::fs::read_to_string(path)?;
        let items: Vec<KbItem> = serde_json::from_str(&raw)?;
        Self::new(items)
    }

    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|i| i.text.trim().to_string()).collect()
    }

    pub fn hash(&self) -> String {
        knowledge_hash(&self.items)
    }
}

/// SQLite persistence for a [`VectorIndex`].
pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self, RagError> {
        let mut store = Self {
            conn: Connection::open(path)?,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&mut self) -> Result<(), RagError> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                model TEXT NOT NULL,
                dim INTEGER NOT NULL,
                size INTEGER NOT NULL,
                kb_hash TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chunks (
                pos INTEGER PRIMARY KEY,
                chunk_id TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                vector BLOB NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Replace whatever is stored with `index`.
    pub fn save(&mut self, index: &VectorIndex) -> Result<(), RagError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.execute("DELETE FROM meta", [])?;
        tx.execute(
            "INSERT INTO meta (id, model, dim, size, kb_hash) VALUES (1, ?1, ?2, ?3, ?4)",
            params![index.model, index.dim() as i64, index.len() as i64, index.kb_hash],
        )?;
        for (pos, (item, vector)) in index.items.iter().zip(&index.vectors).enumerate() {
            tx.execute(
                "INSERT INTO chunks (pos, chunk_id, text, metadata, vector) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    pos as i64,
                    item.id,
                    item.text,
                    Value::Object(item.metadata.clone()).to_string(),
                    encode_vector(vector)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<VectorIndex>, RagError> {
        let meta: Option<(String, String)> = self
            .conn
            .query_row("SELECT model, kb_hash FROM meta WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let Some((model, kb_hash)) = meta else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT chunk_id, text, metadata, vector FROM chunks ORDER BY pos")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut items = Vec::new();
        let mut vectors = Vec::new();
        for row in rows {
            let (id, text, metadata, blob) = row?;
            let metadata: Map<String, Value> = match serde_json::from_str(&metadata)? {
                Value::Object(m) => m,
                _ => Map::new(),
            };
            items.push(KbItem { id, text, metadata });
            vectors.push(decode_vector(&blob));
        }
        Ok(Some(VectorIndex {
            vectors,
            items,
            model,
            kb_hash,
        }))
    }
}

impl VectorIndex {
    pub fn save(&self, path: &Path) -> Result<(), RagError> {
        IndexStore::open(path)?.save(self)
    }

    pub fn load(path: &Path) -> Result<Self, RagError> {
        if !path.exists() {
            return Err(RagError::IndexMissing(path.display().to_string()));
        }
        IndexStore::open(path)?
            .load()?
            .ok_or_else(|| RagError::IndexMissing(path.display().to_string()))
    }
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Reuse the stored index when it was built by the same model from the same
/// chunks; otherwise embed the knowledge base again and persist the result.
pub async fn get_or_build_index(
    path: &Path,
    kb: &KnowledgeBase,
    embedder: &dyn Embedder,
) -> Result<VectorIndex, RagError> {
    let kb_hash = kb.hash();
    if path.exists() {
        if let Some(index) = IndexStore::open(path)?.load()? {
            if index.model == embedder.model() && index.kb_hash == kb_hash {
                log(
                    Level::Info,
                    Domain::Retrieval,
                    "index_loaded",
                    obj(&[("chunks", json!(index.len())), ("model", v_str(&index.model))]),
                );
                return Ok(index);
            }
            log(
                Level::Warn,
                Domain::Retrieval,
                "index_stale",
                obj(&[("stored_model", v_str(&index.model)), ("model", v_str(embedder.model()))]),
            );
        }
    }

    let vectors = embedder.embed_texts(&kb.texts()).await?;
    let index = VectorIndex::build(kb.items.clone(), vectors, embedder.model())?;
    index.save(path)?;
    log(
        Level::Info,
        Domain::Retrieval,
        "index_built",
        obj(&[
            ("chunks", json!(index.len())),
            ("dim", json!(index.dim())),
            ("model", v_str(&index.model)),
            ("path", v_str(&path.display().to_string())),
        ]),
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_blob_encoding() {
        let v = vec![0.5f32, -1.25, 3.0e-7];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[test]
    fn test_knowledge_base_rejects_blank_chunk() {
        let items = vec![
            KbItem {
                id: "1".to_string(),
                text: "ok".to_string(),
                metadata: Map::new(),
            },
            KbItem {
                id: "2".to_string(),
                text: "  ".to_string(),
                metadata: Map::new(),
            },
        ];
        assert!(matches!(KnowledgeBase::new(items), Err(RagError::EmptyChunk { index: 1 })));
    }
}
