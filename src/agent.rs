//! Question dispatcher: pull filters out of a free-text question, decide
//! whether it needs numbers, explanations or both, then answer from the
//! contracts report and the knowledge base.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::aggregate::CounterpartyRank;
use crate::damia::{ContractsQuery, ContractsSource};
use crate::filter::ContractFilters;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::normalize::normalize_contracts;
use crate::rag::{format_context, RetrievalHit, Retriever};
use crate::record::CounterpartyRole;
use crate::report::{compute_contracts_metrics, ContractsReport, ReportOptions};

pub const CLARIFY_INN: &str = "Укажи ИНН (10 или 12 цифр), по которому смотреть контракты.";

const NUMERIC_KEYWORDS: &[&str] = &[
    "сколько",
    "сумм",
    "объем",
    "объём",
    "динамик",
    "по год",
    "топ",
    "рейтинг",
    "распредел",
    "метрик",
    "контракт",
];

const EXPLAIN_KEYWORDS: &[&str] = &[
    "что такое",
    "почему",
    "как счита",
    "объясни",
    "чем отличается",
    "что значит",
    "правило",
];

/// Rows shown per ranking in a rendered answer.
const ANSWER_TOP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Clarify,
    Api,
    Rag,
    Both,
}

impl Route {
    pub fn needs_report(&self) -> bool {
        matches!(self, Route::Api | Route::Both)
    }

    pub fn needs_context(&self) -> bool {
        matches!(self, Route::Rag | Route::Both)
    }
}

/// Filters recognised in a question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
    pub subject_inn: Option<String>,
    pub years: Vec<i32>,
    pub role: Option<CounterpartyRole>,
    pub statuses: Vec<String>,
}

impl ParsedQuery {
    pub fn filters(&self) -> ContractFilters {
        ContractFilters {
            subject_inn: self.subject_inn.clone(),
            years: (!self.years.is_empty()).then(|| self.years.iter().copied().collect()),
            statuses: (!self.statuses.is_empty()).then(|| self.statuses.iter().cloned().collect()),
            role: self.role,
            min_amount: None,
            max_amount: None,
        }
    }
}

/// Everything accumulated while answering one message.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub user_message: String,
    pub query: ParsedQuery,
    pub route: Route,
    pub clarification_question: Option<String>,
    pub report: Option<ContractsReport>,
    pub rag_hits: Vec<RetrievalHit>,
    pub rag_context: Option<String>,
    pub answer: String,
}

fn inn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{10}\b|\b\d{12}\b").expect("valid inn regex"))
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(20\d{2})\b").expect("valid year regex"))
}

pub fn parse_query(message: &str) -> ParsedQuery {
    let text = message.trim();
    let lower = text.to_lowercase();

    let subject_inn = inn_re().find(text).map(|m| m.as_str().to_string());
    let years: BTreeSet<i32> = year_re()
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();

    let role = if lower.contains("заказчик") {
        Some(CounterpartyRole::Customer)
    } else if lower.contains("поставщик") {
        Some(CounterpartyRole::Supplier)
    } else {
        None
    };

    let mut statuses = Vec::new();
    if lower.contains("подача") && lower.contains("заяв") {
        statuses.push("Подача заявок".to_string());
    }
    if lower.contains("комисс") {
        statuses.push("Работа комиссии".to_string());
    }
    if lower.contains("заверш") {
        statuses.push("Закупка завершена".to_string());
    }
    if lower.contains("отмен") {
        statuses.push("Закупка отменена".to_string());
    }

    ParsedQuery {
        subject_inn,
        years: years.into_iter().collect(),
        role,
        statuses,
    }
}

/// Numeric questions need a subject INN; without one the route is `Clarify`.
pub fn route(message: &str, query: &ParsedQuery) -> Route {
    let t = message.to_lowercase();
    let wants_numbers = NUMERIC_KEYWORDS.iter().any(|k| t.contains(k));
    let wants_explain = EXPLAIN_KEYWORDS.iter().any(|k| t.contains(k));

    if wants_numbers && query.subject_inn.is_none() {
        return Route::Clarify;
    }
    match (wants_numbers, wants_explain) {
        (true, true) => Route::Both,
        (true, false) => Route::Api,
        _ => Route::Rag,
    }
}

pub struct Agent {
    source: Box<dyn ContractsSource>,
    retriever: Option<Retriever>,
    options: ReportOptions,
    rag_top_k: i64,
}

impl Agent {
    pub fn new(source: Box<dyn ContractsSource>) -> Self {
        Self {
            source,
            retriever: None,
            options: ReportOptions::default(),
            rag_top_k: 6,
        }
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_options(mut self, options: ReportOptions, rag_top_k: i64) -> Self {
        self.options = options;
        self.rag_top_k = rag_top_k;
        self
    }

    pub async fn run(&self, message: &str) -> Result<AgentState> {
        let _prof = ProfileScope::new("agent_run");
        let query = parse_query(message);
        let route = route(message, &query);
        log(
            Level::Info,
            Domain::Agent,
            "routed",
            obj(&[
                ("route", json!(route)),
                ("inn", query.subject_inn.as_deref().map(v_str).unwrap_or(serde_json::Value::Null)),
                ("years", json!(query.years)),
            ]),
        );

        let mut state = AgentState {
            user_message: message.to_string(),
            query,
            route,
            clarification_question: None,
            report: None,
            rag_hits: Vec::new(),
            rag_context: None,
            answer: String::new(),
        };

        if route == Route::Clarify {
            state.clarification_question = Some(CLARIFY_INN.to_string());
            state.answer = CLARIFY_INN.to_string();
            return Ok(state);
        }

        if route.needs_report() {
            state.report = Some(self.contracts_report(&state.query).await?);
        }

        if route.needs_context() {
            if let Some(retriever) = &self.retriever {
                let hits = retriever
                    .retrieve(message, self.rag_top_k)
                    .await
                    .context("knowledge base retrieval failed")?;
                state.rag_context = Some(format_context(&hits));
                state.rag_hits = hits;
            } else {
                log(Level::Warn, Domain::Agent, "no_retriever", obj(&[]));
            }
        }

        state.answer = render_answer(&state);
        Ok(state)
    }

    async fn contracts_report(&self, query: &ParsedQuery) -> Result<ContractsReport> {
        let inn = query.subject_inn.clone().context("subject INN is required for contract metrics")?;
        let request = ContractsQuery::new(inn.clone());
        let raw = self
            .source
            .fetch_contracts(&request)
            .await
            .with_context(|| format!("fetching contracts for {}", inn))?;
        let records = normalize_contracts(&raw).context("normalizing contracts payload")?;
        Ok(compute_contracts_metrics(&records, &query.filters(), self.options))
    }
}

fn render_answer(state: &AgentState) -> String {
    let mut out = String::new();

    if let Some(report) = &state.report {
        render_report(&mut out, report);
    }

    match &state.rag_context {
        Some(ctx) if !ctx.is_empty() => {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Справка из базы знаний:\n");
            out.push_str(ctx);
            out.push('\n');
        }
        _ if state.route.needs_context() && state.report.is_none() => {
            out.push_str("База знаний недоступна, ответить на вопрос нечем.\n");
        }
        _ => {}
    }

    out.trim().to_string()
}

fn render_report(out: &mut String, report: &ContractsReport) {
    let inn = report.filters.subject_inn.as_deref().unwrap_or("-");
    let Some(currency) = report.main_currency.as_deref() else {
        let _ = writeln!(out, "По ИНН {} контракты не найдены.", inn);
        return;
    };

    let total = report.summary.by_currency.get(currency).copied().unwrap_or_default();
    let _ = writeln!(
        out,
        "ИНН {}: {} контрактов на сумму {:.2} {}.",
        inn, total.count, total.amount, currency
    );
    if report.summary.currencies.len() > 1 {
        let _ = writeln!(out, "Валюты в выборке: {}.", report.summary.currencies.join(", "));
    }

    if !report.by_year.is_empty() {
        out.push_str("По годам:\n");
        for row in &report.by_year {
            let _ = writeln!(out, "  {}: {:.2} {} ({} шт.)", row.year, row.amount, currency, row.count);
        }
    }

    if !report.by_status.is_empty() {
        out.push_str("По статусам:\n");
        for row in &report.by_status {
            let _ = writeln!(out, "  {}: {:.2} {} ({} шт.)", row.status, row.amount, currency, row.count);
        }
    }

    render_ranking(out, "Крупнейшие заказчики", &report.top_customers);
    render_ranking(out, "Крупнейшие поставщики", &report.top_suppliers);
}

fn render_ranking(out: &mut String, title: &str, rows: &[CounterpartyRank]) {
    if rows.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", title);
    for (i, row) in rows.iter().take(ANSWER_TOP).enumerate() {
        let name = row
            .identity
            .name_short
            .as_deref()
            .or(row.identity.name_full.as_deref())
            .unwrap_or("без названия");
        let inn = row.identity.inn.as_deref().unwrap_or("-");
        let _ = writeln!(
            out,
            "  {}. {} (ИНН {}): {:.2} {} ({} шт.)",
            i + 1,
            name,
            inn,
            row.amount,
            row.currency,
            row.count
        );
    }
}
