//! Contracts report: filter once, fan the reducers out, merge.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::thread;

use crate::aggregate::{
    by_status, by_year, pick_main_currency, reg_numbers_sample, summary_totals, top_counterparties, year_status,
    CounterpartyRank, CurrencySummary, StatusRow, YearRow, YearStatusRow,
};
use crate::filter::{filter_records, ContractFilters};
use crate::logging::{log_report_rows, ProfileScope};
use crate::record::{CounterpartyRole, Record};

/// Ranking and sampling sizes. Non-positive values produce empty sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub top_n: i64,
    pub reg_limit: i64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            reg_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegNumberSamples {
    pub all: Vec<String>,
    pub customers: Vec<String>,
    pub suppliers: Vec<String>,
}

/// Row diagnostics. `total_rows` and `counterparty_rows` are counted
/// independently over the filtered set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub input: usize,
    pub after_filter: usize,
    pub total_rows: usize,
    pub counterparty_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractsReport {
    pub filters: ContractFilters,
    pub summary: CurrencySummary,
    pub main_currency: Option<String>,
    pub by_year: Vec<YearRow>,
    pub by_status: Vec<StatusRow>,
    pub year_status: Vec<YearStatusRow>,
    pub top_customers: Vec<CounterpartyRank>,
    pub top_suppliers: Vec<CounterpartyRank>,
    pub reg_numbers: RegNumberSamples,
    pub rows: RowCounts,
}

impl ContractsReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Currency-denominated sections; empty when no main currency exists.
#[derive(Default)]
struct Sections {
    by_year: Vec<YearRow>,
    by_status: Vec<StatusRow>,
    year_status: Vec<YearStatusRow>,
    top_customers: Vec<CounterpartyRank>,
    top_suppliers: Vec<CounterpartyRank>,
}

pub fn compute_contracts_metrics(
    records: &[Record],
    filters: &ContractFilters,
    opts: ReportOptions,
) -> ContractsReport {
    let _scope = ProfileScope::with_context("compute_contracts_metrics", &[("records", json!(records.len()))]);
    let filtered = filter_records(records, filters);
    let summary = summary_totals(filtered.iter().copied());
    let main_currency = pick_main_currency(&summary.currencies);

    let reg_numbers = RegNumberSamples {
        all: reg_numbers_sample(filtered.iter().copied(), None, opts.reg_limit),
        customers: reg_numbers_sample(filtered.iter().copied(), Some(CounterpartyRole::Customer), opts.reg_limit),
        suppliers: reg_numbers_sample(filtered.iter().copied(), Some(CounterpartyRole::Supplier), opts.reg_limit),
    };
    let sections = match main_currency.as_deref() {
        Some(cur) => Sections {
            by_year: by_year(filtered.iter().copied(), cur),
            by_status: by_status(filtered.iter().copied(), cur),
            year_status: year_status(filtered.iter().copied(), cur),
            top_customers: top_counterparties(filtered.iter().copied(), CounterpartyRole::Customer, cur, opts.top_n),
            top_suppliers: top_counterparties(filtered.iter().copied(), CounterpartyRole::Supplier, cur, opts.top_n),
        },
        None => Sections::default(),
    };

    assemble(records.len(), &filtered, filters, summary, main_currency, sections, reg_numbers)
}

/// Same report as [`compute_contracts_metrics`], with each reducer on its own
/// scoped thread.
pub fn compute_contracts_metrics_parallel(
    records: &[Record],
    filters: &ContractFilters,
    opts: ReportOptions,
) -> ContractsReport {
    let _scope = ProfileScope::with_context("compute_contracts_metrics_parallel", &[("records", json!(records.len()))]);
    let filtered = filter_records(records, filters);
    let summary = summary_totals(filtered.iter().copied());
    let main_currency = pick_main_currency(&summary.currencies);

    let rows = &filtered;
    let (reg_numbers, sections) = thread::scope(|s| {
        let all = s.spawn(move || reg_numbers_sample(rows.iter().copied(), None, opts.reg_limit));
        let customers = s.spawn(move || {
            reg_numbers_sample(rows.iter().copied(), Some(CounterpartyRole::Customer), opts.reg_limit)
        });
        let suppliers = s.spawn(move || {
            reg_numbers_sample(rows.iter().copied(), Some(CounterpartyRole::Supplier), opts.reg_limit)
        });

        let sections = match main_currency.as_deref() {
            Some(cur) => {
                let years = s.spawn(move || by_year(rows.iter().copied(), cur));
                let statuses = s.spawn(move || by_status(rows.iter().copied(), cur));
                let pairs = s.spawn(move || year_status(rows.iter().copied(), cur));
                let top_customers = s.spawn(move || {
                    top_counterparties(rows.iter().copied(), CounterpartyRole::Customer, cur, opts.top_n)
                });
                let top_suppliers = s.spawn(move || {
                    top_counterparties(rows.iter().copied(), CounterpartyRole::Supplier, cur, opts.top_n)
                });
                Sections {
                    by_year: join(years),
                    by_status: join(statuses),
                    year_status: join(pairs),
                    top_customers: join(top_customers),
                    top_suppliers: join(top_suppliers),
                }
            }
            None => Sections::default(),
        };
        let reg_numbers = RegNumberSamples {
            all: join(all),
            customers: join(customers),
            suppliers: join(suppliers),
        };
        (reg_numbers, sections)
    });

    assemble(records.len(), &filtered, filters, summary, main_currency, sections, reg_numbers)
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

fn assemble(
    input: usize,
    filtered: &[&Record],
    filters: &ContractFilters,
    summary: CurrencySummary,
    main_currency: Option<String>,
    sections: Sections,
    reg_numbers: RegNumberSamples,
) -> ContractsReport {
    let rows = RowCounts {
        input,
        after_filter: filtered.len(),
        total_rows: filtered.iter().filter(|r| r.is_total()).count(),
        counterparty_rows: filtered.iter().filter(|r| r.is_counterparty()).count(),
    };
    log_report_rows(rows.input, rows.after_filter, main_currency.as_deref());

    ContractsReport {
        filters: filters.clone(),
        summary,
        main_currency,
        by_year: sections.by_year,
        by_status: sections.by_status,
        year_status: sections.year_status,
        top_customers: sections.top_customers,
        top_suppliers: sections.top_suppliers,
        reg_numbers,
        rows,
    }
}
