use anyhow::{Context, Result};
use procurelens::config::{filters_from_env, flag_from_env, Config};
use procurelens::damia::{ContractsQuery, DamiaClient};
use procurelens::logging::{log, obj, v_str, Domain, Level};
use procurelens::normalize::normalize_contracts;
use procurelens::report::{compute_contracts_metrics, compute_contracts_metrics_parallel};
use serde_json::Value;
use std::env;
use std::fs;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let filters = filters_from_env();
    let parallel = flag_from_env("PARALLEL");

    let raw: Value = match env::args().nth(1) {
        Some(path) => {
            let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path))?
        }
        None => {
            let inn = env::var("CONTRACTS_INN")
                .context("usage: procurelens <payload.json>, or set CONTRACTS_INN to fetch")?;
            let mut query = ContractsQuery::new(inn);
            if let Ok(fz) = env::var("CONTRACTS_FZ") {
                query.fz = fz;
            }
            query.from_date = env::var("CONTRACTS_FROM").ok();
            query.to_date = env::var("CONTRACTS_TO").ok();
            DamiaClient::from_config(&cfg)?.get_contracts(&query).await?
        }
    };

    let records = normalize_contracts(&raw)?;
    let opts = cfg.report_options();
    let report = if parallel {
        compute_contracts_metrics_parallel(&records, &filters, opts)
    } else {
        compute_contracts_metrics(&records, &filters, opts)
    };
    log(
        Level::Info,
        Domain::System,
        "report_ready",
        obj(&[(
            "main_currency",
            report.main_currency.as_deref().map(v_str).unwrap_or(Value::Null),
        )]),
    );
    println!("{}", report.to_json());
    Ok(())
}
