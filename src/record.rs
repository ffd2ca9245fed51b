//! Canonical contract records produced by the normalizer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Side of the deal a counterparty sits on relative to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterpartyRole {
    Customer,
    Supplier,
}

impl CounterpartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterpartyRole::Customer => "customer",
            CounterpartyRole::Supplier => "supplier",
        }
    }
}

impl fmt::Display for CounterpartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity metadata of a counterparty, carried through as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyIdentity {
    #[serde(rename = "counterparty_inn")]
    pub inn: Option<String>,
    #[serde(rename = "counterparty_ogrn")]
    pub ogrn: Option<String>,
    #[serde(rename = "counterparty_name_full")]
    pub name_full: Option<String>,
    #[serde(rename = "counterparty_name_short")]
    pub name_short: Option<String>,
    #[serde(rename = "counterparty_address")]
    pub address: Option<String>,
    #[serde(rename = "counterparty_head_fio")]
    pub head_fio: Option<String>,
    #[serde(rename = "counterparty_head_innfl")]
    pub head_innfl: Option<String>,
    #[serde(rename = "counterparty_phone")]
    pub phone: Option<String>,
    #[serde(rename = "counterparty_email")]
    pub email: Option<String>,
}

/// Variant-specific part of a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum RecordKind {
    /// Aggregate figure already computed upstream for one
    /// (subject, year, status, currency) tuple.
    Total { currency_name: Option<String> },
    /// One identified customer or supplier row.
    Counterparty {
        #[serde(rename = "counterparty_role")]
        role: CounterpartyRole,
        #[serde(flatten)]
        identity: CounterpartyIdentity,
        reg_numbers: Vec<String>,
    },
}

/// One normalized line item.
///
/// `amount` and `count` stay raw; consumers coerce them with
/// [`crate::coerce`] at aggregation time. `Value::Null` means absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub subject_inn: String,
    pub year: Option<i32>,
    pub status: String,
    pub currency: Option<String>,
    pub amount: Value,
    pub count: Value,
    #[serde(flatten)]
    pub kind: RecordKind,
}

impl Record {
    pub fn is_total(&self) -> bool {
        matches!(self.kind, RecordKind::Total { .. })
    }

    pub fn is_counterparty(&self) -> bool {
        matches!(self.kind, RecordKind::Counterparty { .. })
    }

    /// Role of a counterparty row; `None` for totals.
    pub fn role(&self) -> Option<CounterpartyRole> {
        match &self.kind {
            RecordKind::Counterparty { role, .. } => Some(*role),
            RecordKind::Total { .. } => None,
        }
    }

    pub fn reg_numbers(&self) -> &[String] {
        match &self.kind {
            RecordKind::Counterparty { reg_numbers, .. } => reg_numbers,
            RecordKind::Total { .. } => &[],
        }
    }

    /// Currency code with the `UNKNOWN` sentinel applied.
    pub fn currency_key(&self) -> &str {
        match self.currency.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => UNKNOWN,
        }
    }

    /// Status label with the `UNKNOWN` sentinel applied.
    pub fn status_key(&self) -> &str {
        if self.status.is_empty() {
            UNKNOWN
        } else {
            &self.status
        }
    }
}

/// Grouping sentinel for absent currency or status.
pub const UNKNOWN: &str = "UNKNOWN";

/// Grouping sentinel for counterparties without an INN.
pub const UNKNOWN_INN: &str = "UNKNOWN_INN";
