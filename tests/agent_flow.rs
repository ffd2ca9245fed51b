//! Dispatcher runs against a canned contracts source.

use async_trait::async_trait;
use procurelens::agent::{Agent, Route, CLARIFY_INN};
use procurelens::damia::{ContractsQuery, ContractsSource};
use procurelens::rag::{Embedder, KbItem, RagError, Retriever, VectorIndex};
use procurelens::report::ReportOptions;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

struct CannedSource {
    payload: Value,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ContractsSource for CannedSource {
    async fn fetch_contracts(&self, query: &ContractsQuery) -> anyhow::Result<Value> {
        self.seen.lock().unwrap().push(query.inn.clone());
        Ok(self.payload.clone())
    }
}

struct FailingSource;

#[async_trait]
impl ContractsSource for FailingSource {
    async fn fetch_contracts(&self, _query: &ContractsQuery) -> anyhow::Result<Value> {
        anyhow::bail!("provider unavailable")
    }
}

struct VowelEmbedder;

#[async_trait]
impl Embedder for VowelEmbedder {
    fn model(&self) -> &str {
        "vowels"
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![
                    t.matches("закон").count() as f32,
                    t.matches("сумм").count() as f32,
                    0.5,
                ]
            })
            .collect())
    }
}

fn payload() -> Value {
    json!({
        "1234567890": {
            "2022": {
                "Исполнение": {
                    "Цена": [{"ВалютаКод": "RUB", "Сумма": 200, "Количество": 2}]
                }
            },
            "2023": {
                "Исполнение": {
                    "Цена": [{"ВалютаКод": "RUB", "Сумма": "1 000,00", "Количество": 1}],
                    "Поставщики": [{
                        "ИНН": "111",
                        "НаимСокр": "ООО Ромашка",
                        "Цена": {"RUB": {"Сумма": 500, "Количество": 1}},
                        "РегНомера": ["REG-1"]
                    }]
                }
            }
        }
    })
}

fn canned() -> (CannedSource, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    (
        CannedSource {
            payload: payload(),
            seen: seen.clone(),
        },
        seen,
    )
}

fn retriever() -> Retriever {
    let items = vec![
        KbItem {
            id: "sum".to_string(),
            text: "Сумма контрактов считается по основной валюте".to_string(),
            metadata: Map::new(),
        },
        KbItem {
            id: "law".to_string(),
            text: "Закон 44-ФЗ регулирует госзакупки".to_string(),
            metadata: Map::new(),
        },
    ];
    let vectors = vec![vec![0.0, 1.0, 0.5], vec![1.0, 0.0, 0.5]];
    Retriever::new(VectorIndex::build(items, vectors, "vowels").unwrap(), Box::new(VowelEmbedder)).unwrap()
}

#[tokio::test]
async fn numeric_question_without_inn_asks_for_it() {
    let (source, seen) = canned();
    let agent = Agent::new(Box::new(source));
    let state = agent.run("Сколько контрактов было в 2023?").await.unwrap();
    assert_eq!(state.route, Route::Clarify);
    assert_eq!(state.answer, CLARIFY_INN);
    assert!(state.report.is_none());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn numeric_question_builds_filtered_report() {
    let (source, seen) = canned();
    let agent = Agent::new(Box::new(source)).with_options(ReportOptions { top_n: 5, reg_limit: 5 }, 2);
    let state = agent
        .run("Какая сумма контрактов у 1234567890 за 2023 год?")
        .await
        .unwrap();

    assert_eq!(state.route, Route::Api);
    assert_eq!(seen.lock().unwrap().as_slice(), ["1234567890".to_string()]);
    assert_eq!(state.query.years, vec![2023]);

    let report = state.report.as_ref().unwrap();
    assert_eq!(report.main_currency.as_deref(), Some("RUB"));
    assert_eq!(report.by_year.len(), 1);
    assert_eq!(report.by_year[0].amount, 1000.0);
    assert_eq!(report.top_suppliers[0].identity.inn.as_deref(), Some("111"));

    assert!(state.answer.contains("1000.00 RUB"));
    assert!(state.answer.contains("ООО Ромашка"));
    assert!(state.rag_context.is_none());
}

#[tokio::test]
async fn explanation_question_uses_knowledge_base_only() {
    let (source, seen) = canned();
    let agent = Agent::new(Box::new(source)).with_retriever(retriever());
    let state = agent.run("Что такое закон 44-ФЗ?").await.unwrap();

    assert_eq!(state.route, Route::Rag);
    assert!(seen.lock().unwrap().is_empty());
    assert!(state.report.is_none());
    assert_eq!(state.rag_hits[0].chunk_id, "law");
    assert!(state.answer.contains("[chunk_id=law]"));
}

#[tokio::test]
async fn mixed_question_gets_numbers_and_context() {
    let (source, _) = canned();
    let agent = Agent::new(Box::new(source)).with_retriever(retriever());
    let state = agent
        .run("Объясни, как считается сумма контрактов 1234567890 по годам")
        .await
        .unwrap();

    assert_eq!(state.route, Route::Both);
    let report = state.report.as_ref().unwrap();
    assert_eq!(report.by_year.len(), 2);
    assert_eq!(state.rag_hits[0].chunk_id, "sum");
    assert!(state.answer.contains("По годам"));
    assert!(state.answer.contains("[chunk_id=sum]"));
}

#[tokio::test]
async fn rag_route_without_retriever_still_answers() {
    let (source, _) = canned();
    let agent = Agent::new(Box::new(source));
    let state = agent.run("Почему закупку отменили?").await.unwrap();
    assert_eq!(state.route, Route::Rag);
    assert!(!state.answer.is_empty());
    assert!(state.rag_hits.is_empty());
}

#[tokio::test]
async fn source_failure_propagates() {
    let agent = Agent::new(Box::new(FailingSource));
    let err = agent.run("топ поставщиков 1234567890").await.unwrap_err();
    assert!(format!("{:#}", err).contains("provider unavailable"));
}

#[tokio::test]
async fn state_serializes_for_json_output() {
    let (source, _) = canned();
    let agent = Agent::new(Box::new(source));
    let state = agent.run("Сумма контрактов 1234567890 за 2022").await.unwrap();
    let v = serde_json::to_value(&state).unwrap();
    assert_eq!(v["route"], "api");
    assert_eq!(v["answer"], state.answer.as_str());
    assert_eq!(v["query"]["subject_inn"], "1234567890");
    assert_eq!(v["report"]["main_currency"], "RUB");
    assert_eq!(v["report"]["by_year"][0]["count"], 2);
}
