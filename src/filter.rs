//! Conjunctive record filters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::coerce::to_float;
use crate::record::{CounterpartyRole, Record};

/// Optional predicates; an absent field places no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_inn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<BTreeSet<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<BTreeSet<String>>,
    /// Only constrains counterparty rows; totals always pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CounterpartyRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
}

impl ContractFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, r: &Record) -> bool {
        if let Some(inn) = &self.subject_inn {
            if r.subject_inn != *inn {
                return false;
            }
        }
        if let Some(years) = &self.years {
            match r.year {
                Some(y) if years.contains(&y) => {}
                _ => return false,
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&r.status) {
                return false;
            }
        }
        if self.min_amount.is_some() || self.max_amount.is_some() {
            let amount = to_float(&r.amount);
            if self.min_amount.is_some_and(|min| amount < min) {
                return false;
            }
            if self.max_amount.is_some_and(|max| amount > max) {
                return false;
            }
        }
        if let (Some(wanted), Some(role)) = (self.role, r.role()) {
            if wanted != role {
                return false;
            }
        }
        true
    }
}

/// Keep records satisfying every provided predicate, in input order.
pub fn filter_records<'a, I>(records: I, filters: &ContractFilters) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    records.into_iter().filter(|r| filters.matches(r)).collect()
}
