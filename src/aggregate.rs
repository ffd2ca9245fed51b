//! Reducers over a filtered record set.
//!
//! Every reducer is a single independent pass; none of them share state,
//! which is what lets the report builder fan them out across threads.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::coerce::{to_float, to_int};
use crate::record::{CounterpartyIdentity, CounterpartyRole, Record, RecordKind, UNKNOWN_INN};

/// Currency preferred as the report denomination whenever present.
pub const PREFERRED_CURRENCY: &str = "RUB";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub amount: f64,
    pub count: i64,
}

impl Totals {
    fn add(&mut self, r: &Record) {
        self.amount += to_float(&r.amount);
        self.count = self.count.saturating_add(to_int(&r.count));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencySummary {
    pub by_currency: BTreeMap<String, Totals>,
    /// Observed currency codes, sorted.
    pub currencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearRow {
    pub year: i32,
    pub currency: String,
    pub amount: f64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub status: String,
    pub currency: String,
    pub amount: f64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearStatusRow {
    pub year: i32,
    pub status: String,
    pub currency: String,
    pub amount: f64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyRank {
    pub counterparty_role: CounterpartyRole,
    pub currency: String,
    #[serde(flatten)]
    pub identity: CounterpartyIdentity,
    pub amount: f64,
    pub count: i64,
    /// Raw number of records folded into this entry.
    pub rows_used: usize,
    /// Union of registry numbers over all rows, sorted.
    pub reg_numbers: BTreeSet<String>,
}

/// Sum totals per currency (`UNKNOWN` when absent).
pub fn summary_totals<'a, I>(records: I) -> CurrencySummary
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut by_currency: BTreeMap<String, Totals> = BTreeMap::new();
    for r in records.into_iter().filter(|r| r.is_total()) {
        by_currency.entry(r.currency_key().to_string()).or_default().add(r);
    }
    let currencies = by_currency.keys().cloned().collect();
    CurrencySummary {
        by_currency,
        currencies,
    }
}

/// `RUB` if observed, otherwise the lexicographically first code.
pub fn pick_main_currency(currencies: &[String]) -> Option<String> {
    if currencies.iter().any(|c| c == PREFERRED_CURRENCY) {
        return Some(PREFERRED_CURRENCY.to_string());
    }
    currencies.iter().min().cloned()
}

fn is_total_in(r: &Record, currency: &str) -> bool {
    r.is_total() && r.currency_key() == currency
}

/// Per-year totals in `currency`, ascending by year. Unknown years are dropped.
pub fn by_year<'a, I>(records: I, currency: &str) -> Vec<YearRow>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut agg: BTreeMap<i32, Totals> = BTreeMap::new();
    for r in records.into_iter().filter(|r| is_total_in(r, currency)) {
        if let Some(year) = r.year {
            agg.entry(year).or_default().add(r);
        }
    }
    agg.into_iter()
        .map(|(year, t)| YearRow {
            year,
            currency: currency.to_string(),
            amount: t.amount,
            count: t.count,
        })
        .collect()
}

/// Per-status totals in `currency`, descending by amount.
pub fn by_status<'a, I>(records: I, currency: &str) -> Vec<StatusRow>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut agg: BTreeMap<String, Totals> = BTreeMap::new();
    for r in records.into_iter().filter(|r| is_total_in(r, currency)) {
        agg.entry(r.status_key().to_string()).or_default().add(r);
    }
    let mut out: Vec<StatusRow> = agg
        .into_iter()
        .map(|(status, t)| StatusRow {
            status,
            currency: currency.to_string(),
            amount: t.amount,
            count: t.count,
        })
        .collect();
    out.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    out
}

/// Per-(year, status) totals in `currency`, ascending by key.
pub fn year_status<'a, I>(records: I, currency: &str) -> Vec<YearStatusRow>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut agg: BTreeMap<(i32, String), Totals> = BTreeMap::new();
    for r in records.into_iter().filter(|r| is_total_in(r, currency)) {
        if let Some(year) = r.year {
            agg.entry((year, r.status_key().to_string())).or_default().add(r);
        }
    }
    agg.into_iter()
        .map(|((year, status), t)| YearStatusRow {
            year,
            status,
            currency: currency.to_string(),
            amount: t.amount,
            count: t.count,
        })
        .collect()
}

/// Largest counterparties of `role` by summed amount in `currency`.
///
/// Rows are grouped by INN (`UNKNOWN_INN` when absent). `top_n <= 0`
/// yields nothing.
pub fn top_counterparties<'a, I>(
    records: I,
    role: CounterpartyRole,
    currency: &str,
    top_n: i64,
) -> Vec<CounterpartyRank>
where
    I: IntoIterator<Item = &'a Record>,
{
    let limit = usize::try_from(top_n).unwrap_or(0);
    if limit == 0 {
        return Vec::new();
    }

    let mut agg: BTreeMap<String, CounterpartyRank> = BTreeMap::new();
    for r in records {
        let RecordKind::Counterparty {
            role: row_role,
            identity,
            reg_numbers,
        } = &r.kind
        else {
            continue;
        };
        if *row_role != role || r.currency_key() != currency {
            continue;
        }
        let key = identity.inn.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| UNKNOWN_INN.to_string());
        let entry = agg.entry(key).or_insert_with(|| CounterpartyRank {
            counterparty_role: role,
            currency: currency.to_string(),
            identity: identity.clone(),
            amount: 0.0,
            count: 0,
            rows_used: 0,
            reg_numbers: BTreeSet::new(),
        });
        entry.amount += to_float(&r.amount);
        entry.count = entry.count.saturating_add(to_int(&r.count));
        entry.rows_used += 1;
        entry
            .reg_numbers
            .extend(reg_numbers.iter().filter(|s| !s.is_empty()).cloned());
    }

    let mut out: Vec<CounterpartyRank> = agg.into_values().collect();
    out.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    out.truncate(limit);
    out
}

/// Distinct registry numbers in first-seen order, at most `limit`.
///
/// Scanning stops as soon as the cap is reached.
pub fn reg_numbers_sample<'a, I>(records: I, role: Option<CounterpartyRole>, limit: i64) -> Vec<String>
where
    I: IntoIterator<Item = &'a Record>,
{
    let limit = usize::try_from(limit).unwrap_or(0);
    let mut out: Vec<String> = Vec::new();
    if limit == 0 {
        return out;
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for r in records {
        let Some(row_role) = r.role() else {
            continue;
        };
        if role.is_some_and(|wanted| wanted != row_role) {
            continue;
        }
        for reg in r.reg_numbers() {
            if reg.is_empty() || !seen.insert(reg.as_str()) {
                continue;
            }
            out.push(reg.clone());
            if out.len() >= limit {
                return out;
            }
        }
    }
    out
}
