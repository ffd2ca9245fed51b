use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use crate::filter::ContractFilters;
use crate::record::CounterpartyRole;
use crate::report::ReportOptions;

#[derive(Clone, Debug)]
pub struct Config {
    pub damia_base: String,
    pub damia_api_key: Option<String>,
    pub damia_timeout_secs: u64,
    pub damia_max_retries: u32,
    pub openai_base: String,
    pub openai_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_batch: usize,
    pub rag_index_path: String,
    pub kb_path: String,
    pub rag_top_k: i64,
    pub top_n: i64,
    pub reg_limit: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            damia_base: std::env::var("DAMIA_BASE").unwrap_or_else(|_| "https://api.damia.ru/zakupki".to_string()),
            damia_api_key: std::env::var("DAMIA_API_KEY").ok().filter(|v| !v.trim().is_empty()),
            damia_timeout_secs: std::env::var("DAMIA_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            damia_max_retries: std::env::var("DAMIA_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(3),
            openai_base: std::env::var("OPENAI_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.trim().is_empty()),
            embedding_model: std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_batch: std::env::var("EMBEDDING_BATCH").ok().and_then(|v| v.parse().ok()).unwrap_or(128),
            rag_index_path: std::env::var("RAG_INDEX_PATH").unwrap_or_else(|_| "./kb_index.sqlite".to_string()),
            kb_path: std::env::var("KB_PATH").unwrap_or_else(|_| "./knowledge_base.json".to_string()),
            rag_top_k: std::env::var("RAG_TOP_K").ok().and_then(|v| v.parse().ok()).unwrap_or(6),
            top_n: std::env::var("TOP_N").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            reg_limit: std::env::var("REG_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            top_n: self.top_n,
            reg_limit: self.reg_limit,
        }
    }

    pub fn damia_timeout(&self) -> Duration {
        Duration::from_secs(self.damia_timeout_secs)
    }
}

/// Report filters from `FILTER_*` variables. Years are comma separated,
/// statuses `;` separated since status labels may contain commas.
pub fn filters_from_env() -> ContractFilters {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    ContractFilters {
        subject_inn: var("FILTER_INN").map(|v| v.trim().to_string()),
        years: var("FILTER_YEARS").map(|v| parse_list(&v, ',')),
        statuses: var("FILTER_STATUSES").map(|v| parse_list(&v, ';')),
        role: var("FILTER_ROLE").and_then(|v| parse_role(&v)),
        min_amount: var("FILTER_MIN_AMOUNT").and_then(|v| v.trim().parse().ok()),
        max_amount: var("FILTER_MAX_AMOUNT").and_then(|v| v.trim().parse().ok()),
    }
}

/// On/off switch such as `PARALLEL` or `ASK_JSON`; only `1` turns it on.
pub fn flag_from_env(name: &str) -> bool {
    parse_flag(std::env::var(name).ok().as_deref())
}

fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(str::trim) == Some("1")
}

fn parse_list<T: FromStr + Ord>(raw: &str, sep: char) -> BTreeSet<T> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn parse_role(raw: &str) -> Option<CounterpartyRole> {
    match raw.trim().to_lowercase().as_str() {
        "customer" | "заказчик" => Some(CounterpartyRole::Customer),
        "supplier" | "поставщик" => Some(CounterpartyRole::Supplier),
        _ => None,
    }
}
