use anyhow::{Context, Result};
use procurelens::config::Config;
use procurelens::rag::{get_or_build_index, KnowledgeBase, OpenAiEmbedder};
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let kb_path = PathBuf::from(env::args().nth(1).unwrap_or_else(|| cfg.kb_path.clone()));
    let index_path = PathBuf::from(env::args().nth(2).unwrap_or_else(|| cfg.rag_index_path.clone()));

    let kb = KnowledgeBase::load(&kb_path).with_context(|| format!("loading {}", kb_path.display()))?;
    let embedder = OpenAiEmbedder::from_config(&cfg)?;
    let index = get_or_build_index(&index_path, &kb, &embedder).await?;

    println!(
        "index {}: {} chunks, dim {}, model {}",
        index_path.display(),
        index.len(),
        index.dim(),
        index.model
    );
    Ok(())
}
