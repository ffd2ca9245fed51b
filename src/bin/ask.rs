use anyhow::{Context, Result};
use procurelens::agent::Agent;
use procurelens::config::{flag_from_env, Config};
use procurelens::damia::DamiaClient;
use procurelens::logging::{log, obj, v_str, Domain, Level};
use procurelens::rag::{get_or_build_index, KnowledgeBase, OpenAiEmbedder, Retriever};
use std::env;
use std::path::Path;

async fn build_retriever(cfg: &Config) -> Result<Retriever> {
    let embedder = OpenAiEmbedder::from_config(cfg)?;
    let kb = KnowledgeBase::load(Path::new(&cfg.kb_path))
        .with_context(|| format!("loading knowledge base {}", cfg.kb_path))?;
    let index = get_or_build_index(Path::new(&cfg.rag_index_path), &kb, &embedder).await?;
    Ok(Retriever::new(index, Box::new(embedder))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let question = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        eprintln!("usage: ask <question>");
        std::process::exit(1);
    }

    let cfg = Config::from_env();
    let source = DamiaClient::from_config(&cfg)?;
    let mut agent = Agent::new(Box::new(source)).with_options(cfg.report_options(), cfg.rag_top_k);
    match build_retriever(&cfg).await {
        Ok(retriever) => agent = agent.with_retriever(retriever),
        Err(err) => log(
            Level::Warn,
            Domain::Retrieval,
            "retriever_unavailable",
            obj(&[("error", v_str(&format!("{:#}", err)))]),
        ),
    }

    let state = agent.run(&question).await?;
    if flag_from_env("ASK_JSON") {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("{}", state.answer);
    }
    Ok(())
}
