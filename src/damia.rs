//! Client for the DaMIA procurement API (`/zakupki/*`).
//!
//! Validates request parameters the way the provider documents them,
//! drops absent parameters, appends the API key and returns the JSON body
//! untouched. Interpreting the body is the normalizer's job.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::logging::log_http;
use crate::retry::{is_retryable_http_error, is_retryable_network_error, retry_async, RetryConfig};

const FZ_CODES: [&str; 3] = ["44", "223", "615"];
const ZSEARCH_STATUSES: [&str; 4] = ["1", "2", "3", "4"];
const BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum DamiaError {
    /// Transport failure. The request URL carries the API key, so it is
    /// stripped before the error is stored.
    #[error("network error: {0}")]
    Network(reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("empty response from API")]
    EmptyResponse,

    #[error("response is not JSON: {body}")]
    NotJson { body: String },

    #[error("invalid parameter: {0}")]
    Validation(String),

    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for DamiaError {
    fn from(e: reqwest::Error) -> Self {
        DamiaError::Network(e.without_url())
    }
}

impl DamiaError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DamiaError::Network(e) => is_retryable_network_error(e),
            DamiaError::Http { status, .. } => is_retryable_http_error(*status),
            _ => false,
        }
    }
}

fn invalid(msg: impl Into<String>) -> DamiaError {
    DamiaError::Validation(msg.into())
}

// =============================================================================
// Request parameters
// =============================================================================

/// Parameters of the `contracts` / `zakupki` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractsQuery {
    pub inn: String,
    /// Procurement law: "44", "223" or "615".
    pub fz: String,
    /// 0 = subject as customer, 1 = subject as supplier.
    pub role: u8,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub format: u8,
}

impl ContractsQuery {
    pub fn new(inn: impl Into<String>) -> Self {
        Self {
            inn: inn.into(),
            fz: "44".to_string(),
            role: 0,
            from_date: None,
            to_date: None,
            format: 1,
        }
    }

    pub fn validate(&self) -> Result<(), DamiaError> {
        validate_inn(&self.inn)?;
        validate_fz(&self.fz)?;
        if self.role > 1 {
            return Err(invalid("role must be 0 or 1"));
        }
        validate_date("from_date", self.from_date.as_deref())?;
        validate_date("to_date", self.to_date.as_deref())
    }

    fn params(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("inn", Some(self.inn.clone())),
            ("fz", Some(self.fz.clone())),
            ("role", Some(self.role.to_string())),
            ("from_date", self.from_date.clone()),
            ("to_date", self.to_date.clone()),
            ("format", Some(self.format.to_string())),
        ]
    }
}

/// Parameters of the `zsearch` full-text tender search.
#[derive(Debug, Clone, PartialEq)]
pub struct ZSearchQuery {
    pub q: String,
    pub region: Option<String>,
    pub okpd: Option<String>,
    pub cust_inn: Option<String>,
    pub status: Option<String>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub smp: u8,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub placing: String,
    pub etp: String,
    pub fz: Option<u16>,
    pub page: u32,
}

impl ZSearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            region: None,
            okpd: None,
            cust_inn: None,
            status: None,
            min_price: None,
            max_price: None,
            smp: 2,
            from_date: None,
            to_date: None,
            placing: "1,2,3,4,5,99".to_string(),
            etp: "1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,99".to_string(),
            fz: None,
            page: 1,
        }
    }

    pub fn validate(&self) -> Result<(), DamiaError> {
        if self.q.trim().is_empty() {
            return Err(invalid("q: comma-separated keywords are required"));
        }
        if self.region.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(invalid("region must be a subject code when given"));
        }
        if self.okpd.as_deref().is_some_and(|o| o.trim().is_empty()) {
            return Err(invalid("okpd must be an OKPD2 code when given"));
        }
        if let Some(status) = self.status.as_deref() {
            if !ZSEARCH_STATUSES.contains(&status) {
                return Err(invalid("status must be one of 1, 2, 3, 4"));
            }
        }
        if let Some(inn) = self.cust_inn.as_deref() {
            validate_inn(inn)?;
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(invalid("min_price cannot exceed max_price"));
            }
        }
        if let Some(fz) = self.fz {
            if !matches!(fz, 44 | 223 | 615) {
                return Err(invalid("fz must be 44, 223 or 615"));
            }
        }
        if self.page < 1 {
            return Err(invalid("page must be >= 1"));
        }
        validate_date("from_date", self.from_date.as_deref())?;
        validate_date("to_date", self.to_date.as_deref())
    }

    fn params(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("q", Some(self.q.clone())),
            ("region", self.region.clone()),
            ("okpd", self.okpd.clone()),
            ("status", self.status.clone()),
            ("cust_inn", self.cust_inn.clone()),
            ("min_price", self.min_price.map(|v| v.to_string())),
            ("max_price", self.max_price.map(|v| v.to_string())),
            ("smp", Some(self.smp.to_string())),
            ("from_date", self.from_date.clone()),
            ("to_date", self.to_date.clone()),
            ("placing", Some(self.placing.clone())),
            ("etp", Some(self.etp.clone())),
            ("fz", self.fz.map(|v| v.to_string())),
            ("page", Some(self.page.to_string())),
        ]
    }
}

fn validate_inn(inn: &str) -> Result<(), DamiaError> {
    if inn.trim().is_empty() {
        return Err(invalid("inn is required"));
    }
    Ok(())
}

fn validate_fz(fz: &str) -> Result<(), DamiaError> {
    if !FZ_CODES.contains(&fz) {
        return Err(invalid("fz must be 44, 223 or 615"));
    }
    Ok(())
}

fn validate_req(req: &str) -> Result<(), DamiaError> {
    if req.trim().is_empty() {
        return Err(invalid("req: customer INN or OGRN is required"));
    }
    Ok(())
}

fn validate_flag(name: &str, value: u8) -> Result<(), DamiaError> {
    if value > 1 {
        return Err(invalid(format!("{} must be 0 or 1", name)));
    }
    Ok(())
}

/// Dates must be exactly `YYYY-MM-DD`.
fn validate_date(name: &str, value: Option<&str>) -> Result<(), DamiaError> {
    let Some(v) = value else {
        return Ok(());
    };
    let well_formed = v.len() == 10 && NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok();
    if !well_formed {
        return Err(invalid(format!("{} must be formatted as YYYY-MM-DD", name)));
    }
    Ok(())
}

// =============================================================================
// Client
// =============================================================================

pub struct DamiaClient {
    http: Client,
    base: String,
    api_key: String,
    retry: RetryConfig,
}

impl DamiaClient {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, DamiaError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base: base.into(),
            api_key: api_key.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, DamiaError> {
        let key = cfg
            .damia_api_key
            .clone()
            .ok_or_else(|| invalid("DAMIA_API_KEY is not set"))?;
        let retry = RetryConfig {
            max_retries: cfg.damia_max_retries,
            ..RetryConfig::default()
        };
        Ok(Self::new(cfg.damia_base.clone(), key, cfg.damia_timeout())?.with_retry(retry))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `{base}/{method}?<present params>&key=<api key>`
    pub fn request_url(&self, method: &str, params: &[(&str, Option<String>)]) -> Result<Url, DamiaError> {
        let mut url = Url::parse(&format!("{}/{}", self.base.trim_end_matches('/'), method))?;
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in params {
                if let Some(v) = v {
                    query.append_pair(k, v);
                }
            }
            query.append_pair("key", &self.api_key);
        }
        Ok(url)
    }

    async fn get(&self, method: &str, params: Vec<(&'static str, Option<String>)>) -> Result<Value, DamiaError> {
        let url = self.request_url(method, &params)?;
        let body = retry_async(&self.retry, method, DamiaError::is_retryable, || self.fetch_once(method, url.clone())).await?;
        parse_body(&body)
    }

    async fn fetch_once(&self, method: &str, url: Url) -> Result<String, DamiaError> {
        let started = Instant::now();
        let resp = self.http.get(url).send().await?;
        let status = resp.status().as_u16();
        log_http(method, status, started.elapsed().as_secs_f64() * 1000.0);
        let body = resp.text().await?;
        if status != 200 {
            return Err(DamiaError::Http {
                status,
                body: preview(&body),
            });
        }
        Ok(body)
    }

    /// Contracts of a subject, grouped by year and status (format=1 is what
    /// the normalizer reads).
    pub async fn get_contracts(&self, query: &ContractsQuery) -> Result<Value, DamiaError> {
        query.validate()?;
        self.get("contracts", query.params()).await
    }

    /// Tenders of a subject.
    pub async fn get_zakupki(&self, query: &ContractsQuery) -> Result<Value, DamiaError> {
        query.validate()?;
        self.get("zakupki", query.params()).await
    }

    /// Tender notice by its EIS registry number.
    pub async fn get_zakupka(&self, regn: &str, actual: u8) -> Result<Value, DamiaError> {
        if regn.trim().is_empty() {
            return Err(invalid("regn: tender notice number is required"));
        }
        validate_flag("actual", actual)?;
        self.get("zakupka", vec![("regn", Some(regn.to_string())), ("actual", Some(actual.to_string()))])
            .await
    }

    /// Contract by registry number (44-FZ) or agreement id (223-FZ).
    pub async fn get_contract(&self, regn: &str) -> Result<Value, DamiaError> {
        if regn.trim().is_empty() {
            return Err(invalid("regn: contract registry number is required"));
        }
        self.get("contract", vec![("regn", Some(regn.to_string()))]).await
    }

    pub async fn get_zsearch(&self, query: &ZSearchQuery) -> Result<Value, DamiaError> {
        query.validate()?;
        self.get("zsearch", query.params()).await
    }

    pub async fn get_customer(&self, req: &str) -> Result<Value, DamiaError> {
        validate_req(req)?;
        self.get("customer", vec![("req", Some(req.to_string()))]).await
    }

    /// Unified register of procurement participants.
    pub async fn get_eruz(&self, req: &str) -> Result<Value, DamiaError> {
        validate_req(req)?;
        self.get("eruz", vec![("req", Some(req.to_string()))]).await
    }

    /// Antimonopoly complaints.
    pub async fn get_zfas(&self, inn: &str, page: u32) -> Result<Value, DamiaError> {
        validate_inn(inn)?;
        self.get("zfas", vec![("inn", Some(inn.to_string())), ("page", Some(page.to_string()))])
            .await
    }

    /// Register of unscrupulous suppliers.
    pub async fn get_rnp(&self, inn: &str) -> Result<Value, DamiaError> {
        validate_inn(inn)?;
        self.get("rnp", vec![("inn", Some(inn.to_string()))]).await
    }

    /// Self-regulatory organization membership.
    pub async fn get_sro(&self, req: &str) -> Result<Value, DamiaError> {
        validate_req(req)?;
        self.get("sro", vec![("req", Some(req.to_string()))]).await
    }
}

fn parse_body(body: &str) -> Result<Value, DamiaError> {
    if body.trim().is_empty() {
        return Err(DamiaError::EmptyResponse);
    }
    serde_json::from_str(body).map_err(|_| DamiaError::NotJson { body: preview(body) })
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

// =============================================================================
// Source seam
// =============================================================================

/// Anything that can produce a raw contracts payload for a subject.
#[async_trait]
pub trait ContractsSource: Send + Sync {
    async fn fetch_contracts(&self, query: &ContractsQuery) -> anyhow::Result<Value>;
}

#[async_trait]
impl ContractsSource for DamiaClient {
    async fn fetch_contracts(&self, query: &ContractsQuery) -> anyhow::Result<Value> {
        Ok(self.get_contracts(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> DamiaClient {
        DamiaClient::new("https://api.example.test/zakupki/", "secret", Duration::from_secs(1))
            .unwrap()
            .with_retry(RetryConfig::none())
    }

    #[test]
    fn test_request_url_drops_absent_params_and_appends_key() {
        let q = ContractsQuery {
            from_date: Some("2024-01-01".to_string()),
            ..ContractsQuery::new("7803046541")
        };
        let url = client().request_url("contracts", &q.params()).unwrap();
        assert_eq!(url.path(), "/zakupki/contracts");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["inn", "fz", "role", "from_date", "format", "key"]);
        assert!(pairs.contains(&("key".to_string(), "secret".to_string())));
    }

    #[test]
    fn test_contracts_query_validation() {
        assert!(ContractsQuery::new("7803046541").validate().is_ok());
        assert!(ContractsQuery::new("  ").validate().is_err());
        let bad_fz = ContractsQuery {
            fz: "99".to_string(),
            ..ContractsQuery::new("1")
        };
        assert!(bad_fz.validate().is_err());
        let bad_role = ContractsQuery {
            role: 2,
            ..ContractsQuery::new("1")
        };
        assert!(bad_role.validate().is_err());
        for date in ["2024-1-01", "01.01.2024", "2024-02-30", "2024-01-01T00:00"] {
            let q = ContractsQuery {
                to_date: Some(date.to_string()),
                ..ContractsQuery::new("1")
            };
            assert!(q.validate().is_err(), "accepted {}", date);
        }
    }

    #[test]
    fn test_zsearch_validation() {
        assert!(ZSearchQuery::new("бумага, картридж").validate().is_ok());
        assert!(ZSearchQuery::new(" ").validate().is_err());
        let inverted = ZSearchQuery {
            min_price: Some(10),
            max_price: Some(5),
            ..ZSearchQuery::new("x")
        };
        assert!(inverted.validate().is_err());
        let bad_status = ZSearchQuery {
            status: Some("5".to_string()),
            ..ZSearchQuery::new("x")
        };
        assert!(bad_status.validate().is_err());
        let bad_page = ZSearchQuery {
            page: 0,
            ..ZSearchQuery::new("x")
        };
        assert!(bad_page.validate().is_err());
        let bad_fz = ZSearchQuery {
            fz: Some(45),
            ..ZSearchQuery::new("x")
        };
        assert!(bad_fz.validate().is_err());
    }

    #[test]
    fn test_body_classification() {
        assert!(matches!(parse_body("  \n"), Err(DamiaError::EmptyResponse)));
        assert!(matches!(parse_body("<html>"), Err(DamiaError::NotJson { .. })));
        assert_eq!(parse_body("{\"a\": 1}").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_retry_classification() {
        let e = DamiaError::Http {
            status: 503,
            body: String::new(),
        };
        assert!(e.is_retryable());
        let e = DamiaError::Http {
            status: 403,
            body: String::new(),
        };
        assert!(!e.is_retryable());
        assert!(!DamiaError::EmptyResponse.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_network() {
        let c = client();
        assert!(matches!(c.get_contract(" ").await, Err(DamiaError::Validation(_))));
        assert!(matches!(c.get_zakupka("123", 3).await, Err(DamiaError::Validation(_))));
        assert!(matches!(c.get_customer("").await, Err(DamiaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_network_error_hides_api_key() {
        let c = DamiaClient::new("http://127.0.0.1:1/zakupki", "SUPERSECRET", Duration::from_secs(1))
            .unwrap()
            .with_retry(RetryConfig::none());
        let err = c.get_contracts(&ContractsQuery::new("7803046541")).await.unwrap_err();
        assert!(matches!(err, DamiaError::Network(_)));
        assert!(err.is_retryable());
        let text = format!("{} {:?}", err, err);
        assert!(!text.contains("SUPERSECRET"), "{}", text);
        assert!(!text.contains("key="), "{}", text);
    }
}
