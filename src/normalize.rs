//! Flattens the provider's nested contracts payload (format=1) into records.
//!
//! Shape: `subject INN -> year -> status -> payload`, where the payload holds
//! a totals list, a customers list and a suppliers list. Only a non-object
//! top level is fatal; every deeper malformation is skipped or degraded.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::logging::{log, obj, Domain, Level};
use crate::record::{CounterpartyIdentity, CounterpartyRole, Record, RecordKind};

const KEY_PRICE: &str = "Цена";
const KEY_CUSTOMERS: &str = "Заказчики";
const KEY_SUPPLIERS: &str = "Поставщики";
const KEY_CURRENCY_CODE: &str = "ВалютаКод";
const KEY_CURRENCY_NAME: &str = "ВалютаНаим";
const KEY_AMOUNT: &str = "Сумма";
const KEY_COUNT: &str = "Количество";
const KEY_REG_NUMBERS: &str = "РегНомера";

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("contracts payload must be a JSON object at the top level, got {found}")]
    NotAnObject { found: &'static str },

    #[error("contracts payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Counters describing what the normalizer degraded along the way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub totals: usize,
    pub counterparties: usize,
    pub skipped_branches: usize,
    pub unparsable_years: usize,
}

/// Parse raw JSON text and normalize it.
pub fn normalize_contracts_json(text: &str) -> Result<Vec<Record>, NormalizationError> {
    let raw: Value = serde_json::from_str(text)?;
    normalize_contracts(&raw)
}

pub fn normalize_contracts(raw: &Value) -> Result<Vec<Record>, NormalizationError> {
    let subjects = raw.as_object().ok_or(NormalizationError::NotAnObject {
        found: json_kind(raw),
    })?;

    let mut out = Vec::new();
    let mut stats = NormalizeStats::default();

    for (subject_inn, years_block) in subjects {
        let Some(years) = years_block.as_object() else {
            stats.skipped_branches += 1;
            continue;
        };
        for (year_key, statuses_block) in years {
            let Some(statuses) = statuses_block.as_object() else {
                stats.skipped_branches += 1;
                continue;
            };
            let year = year_key.trim().parse::<i32>().ok();
            if year.is_none() {
                stats.unparsable_years += 1;
            }
            for (status, payload) in statuses {
                let Some(payload) = payload.as_object() else {
                    stats.skipped_branches += 1;
                    continue;
                };
                let ctx = RowContext {
                    subject_inn,
                    year,
                    status,
                };
                push_totals(&mut out, &mut stats, &ctx, payload);
                for (key, role) in [
                    (KEY_CUSTOMERS, CounterpartyRole::Customer),
                    (KEY_SUPPLIERS, CounterpartyRole::Supplier),
                ] {
                    if let Some(items) = payload.get(key) {
                        push_counterparties(&mut out, &mut stats, &ctx, role, items);
                    }
                }
            }
        }
    }

    log(
        Level::Info,
        Domain::Ingest,
        "normalized",
        obj(&[
            ("subjects", json!(subjects.len())),
            ("records", json!(out.len())),
            ("totals", json!(stats.totals)),
            ("counterparties", json!(stats.counterparties)),
            ("skipped_branches", json!(stats.skipped_branches)),
            ("unparsable_years", json!(stats.unparsable_years)),
        ]),
    );
    Ok(out)
}

struct RowContext<'a> {
    subject_inn: &'a str,
    year: Option<i32>,
    status: &'a str,
}

impl RowContext<'_> {
    fn record(&self, currency: Option<String>, amount: Value, count: Value, kind: RecordKind) -> Record {
        Record {
            subject_inn: self.subject_inn.to_string(),
            year: self.year,
            status: self.status.to_string(),
            currency,
            amount,
            count,
            kind,
        }
    }
}

fn push_totals(out: &mut Vec<Record>, stats: &mut NormalizeStats, ctx: &RowContext, payload: &Map<String, Value>) {
    let Some(entries) = payload.get(KEY_PRICE).and_then(Value::as_array) else {
        return;
    };
    for entry in entries {
        let Some(entry) = entry.as_object() else {
            stats.skipped_branches += 1;
            continue;
        };
        out.push(ctx.record(
            scalar_text(entry.get(KEY_CURRENCY_CODE)),
            raw_field(entry, KEY_AMOUNT),
            raw_field(entry, KEY_COUNT),
            RecordKind::Total {
                currency_name: scalar_text(entry.get(KEY_CURRENCY_NAME)),
            },
        ));
        stats.totals += 1;
    }
}

fn push_counterparties(
    out: &mut Vec<Record>,
    stats: &mut NormalizeStats,
    ctx: &RowContext,
    role: CounterpartyRole,
    items: &Value,
) {
    let Some(items) = items.as_array() else {
        stats.skipped_branches += 1;
        return;
    };
    for item in items {
        let Some(cp) = item.as_object() else {
            stats.skipped_branches += 1;
            continue;
        };
        let identity = identity_of(cp);
        let reg_numbers = reg_numbers_of(cp.get(KEY_REG_NUMBERS));

        let mut prices = price_rows(cp.get(KEY_PRICE));
        if prices.is_empty() {
            // keep identity and registry numbers even without a price breakdown
            prices.push((None, Value::Null, Value::Null));
        }
        for (currency, amount, count) in prices {
            out.push(ctx.record(
                currency,
                amount,
                count,
                RecordKind::Counterparty {
                    role,
                    identity: identity.clone(),
                    reg_numbers: reg_numbers.clone(),
                },
            ));
            stats.counterparties += 1;
        }
    }
}

fn identity_of(cp: &Map<String, Value>) -> CounterpartyIdentity {
    CounterpartyIdentity {
        inn: scalar_text(cp.get("ИНН")),
        ogrn: scalar_text(cp.get("ОГРН")),
        name_full: scalar_text(cp.get("НаимПолн")),
        name_short: scalar_text(cp.get("НаимСокр")),
        address: scalar_text(cp.get("АдресПолн")),
        head_fio: scalar_text(cp.get("РукФИО")),
        head_innfl: scalar_text(cp.get("РукИННФЛ")),
        phone: scalar_text(cp.get("Телефон")),
        email: scalar_text(cp.get("Email")),
    }
}

/// Currency code -> `{Сумма, Количество}` flattened into rows.
fn price_rows(price: Option<&Value>) -> Vec<(Option<String>, Value, Value)> {
    let Some(price) = price.and_then(Value::as_object) else {
        return Vec::new();
    };
    price
        .iter()
        .map(|(currency, v)| match v.as_object() {
            Some(o) => (Some(currency.clone()), raw_field(o, KEY_AMOUNT), raw_field(o, KEY_COUNT)),
            None => (Some(currency.clone()), Value::Null, Value::Null),
        })
        .collect()
}

fn reg_numbers_of(raw: Option<&Value>) -> Vec<String> {
    let Some(list) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::with_capacity(list.len());
    for reg in list.iter().filter_map(|v| scalar_text(Some(v))) {
        if !reg.is_empty() && !out.contains(&reg) {
            out.push(reg);
        }
    }
    out
}

fn raw_field(o: &Map<String, Value>, key: &str) -> Value {
    o.get(key).cloned().unwrap_or(Value::Null)
}

/// Strings pass through, numbers keep their decimal text, anything else is absent.
fn scalar_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "1234567890": {
                "2023": {
                    "Исполнение": {
                        "Цена": [
                            {"ВалютаКод": "RUB", "ВалютаНаим": "Российский рубль", "Сумма": "1 000,00", "Количество": 1},
                            "garbage"
                        ],
                        "Заказчики": [
                            {"ИНН": "222", "НаимПолн": "ООО Заказчик", "РегНомера": ["A", "A", "B"]}
                        ],
                        "Поставщики": [
                            {
                                "ИНН": "111",
                                "Цена": {"RUB": {"Сумма": 500, "Количество": 1}, "USD": {"Сумма": 7, "Количество": 2}},
                                "РегНомера": "not-a-list"
                            }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_rejects_non_object_top_level() {
        let err = normalize_contracts(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, NormalizationError::NotAnObject { found: "array" }));
        assert!(normalize_contracts(&Value::Null).is_err());
    }

    #[test]
    fn test_empty_object_yields_nothing() {
        assert!(normalize_contracts(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_totals_are_carried_uncoerced() {
        let records = normalize_contracts(&sample()).unwrap();
        let totals: Vec<_> = records.iter().filter(|r| r.is_total()).collect();
        assert_eq!(totals.len(), 1);
        let t = totals[0];
        assert_eq!(t.amount, json!("1 000,00"));
        assert_eq!(t.count, json!(1));
        assert_eq!(t.year, Some(2023));
        assert_eq!(t.status, "Исполнение");
        assert_eq!(
            t.kind,
            RecordKind::Total {
                currency_name: Some("Российский рубль".to_string())
            }
        );
    }

    #[test]
    fn test_priceless_counterparty_keeps_identity() {
        let records = normalize_contracts(&sample()).unwrap();
        let customers: Vec<_> = records
            .iter()
            .filter(|r| r.role() == Some(CounterpartyRole::Customer))
            .collect();
        assert_eq!(customers.len(), 1);
        let c = customers[0];
        assert_eq!(c.currency, None);
        assert_eq!(c.amount, Value::Null);
        assert_eq!(c.count, Value::Null);
        assert_eq!(c.reg_numbers(), ["A".to_string(), "B".to_string()]);
        match &c.kind {
            RecordKind::Counterparty { identity, .. } => {
                assert_eq!(identity.inn.as_deref(), Some("222"));
                assert_eq!(identity.name_full.as_deref(), Some("ООО Заказчик"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_counterparty_flattened_per_currency() {
        let records = normalize_contracts(&sample()).unwrap();
        let mut suppliers: Vec<_> = records
            .iter()
            .filter(|r| r.role() == Some(CounterpartyRole::Supplier))
            .collect();
        suppliers.sort_by(|a, b| a.currency.cmp(&b.currency));
        assert_eq!(suppliers.len(), 2);
        assert_eq!(suppliers[0].currency.as_deref(), Some("RUB"));
        assert_eq!(suppliers[0].amount, json!(500));
        assert_eq!(suppliers[1].currency.as_deref(), Some("USD"));
        assert_eq!(suppliers[1].count, json!(2));
        assert!(suppliers.iter().all(|r| r.reg_numbers().is_empty()));
    }

    #[test]
    fn test_malformed_year_degrades_to_absent() {
        let raw = json!({
            "1": {
                "20x3": {"S": {"Цена": [{"ВалютаКод": "RUB", "Сумма": 1}]}},
                "2024": {"S": {"Цена": [{"ВалютаКод": "RUB", "Сумма": 2}]}}
            }
        });
        let records = normalize_contracts(&raw).unwrap();
        assert_eq!(records.len(), 2);
        let years: Vec<_> = records.iter().map(|r| r.year).collect();
        assert!(years.contains(&None));
        assert!(years.contains(&Some(2024)));
    }

    #[test]
    fn test_non_object_levels_are_skipped() {
        let raw = json!({
            "1": "oops",
            "2": {"2024": 5},
            "3": {"2024": {"S": []}},
            "4": {"2024": {"S": {"Цена": "x", "Поставщики": {"not": "a list"}}}}
        });
        assert!(normalize_contracts(&raw).unwrap().is_empty());
    }

    #[test]
    fn test_non_object_price_value_keeps_currency() {
        let raw = json!({"1": {"2024": {"S": {"Поставщики": [{"ИНН": 42, "Цена": {"EUR": "?"}}]}}}});
        let records = normalize_contracts(&raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].currency.as_deref(), Some("EUR"));
        assert_eq!(records[0].amount, Value::Null);
        match &records[0].kind {
            RecordKind::Counterparty { identity, .. } => assert_eq!(identity.inn.as_deref(), Some("42")),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_json_text_entry_point() {
        assert!(matches!(
            normalize_contracts_json("{not json"),
            Err(NormalizationError::InvalidJson(_))
        ));
        assert!(normalize_contracts_json("{}").unwrap().is_empty());
    }
}
