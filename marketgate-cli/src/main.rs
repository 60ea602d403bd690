//! marketgate CLI: fetch, validate and summarise market data.
//!
//! Commands:
//! - `fetch`: fetch identifiers through retry and the quality gate
//! - `rate`: resolve the risk-free rate through its fallback chain
//! - `market`: resolve market benchmark returns
//! - `portfolio`: portfolio returns and correlation for a set of holdings
//! - `health`: probe every acquisition path
//! - `config`: print the effective configuration as TOML

mod logging;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use logging::{init_logging, LogFormat};
use marketgate_core::analytics::CorrelationMatrix;
use marketgate_core::clock::FixedClock;
use marketgate_core::health::OverallStatus;
use marketgate_core::{
    portfolio_returns, AcquisitionPipeline, HealthMonitor, Period, PipelineConfig, PortfolioSpec,
};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "marketgate",
    about = "marketgate: resilient market-data acquisition and validation"
)]
struct Cli {
    /// TOML config file. Flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// FRED API key.
    #[arg(long, env = "FRED_API_KEY", global = true, hide_env_values = true)]
    fred_api_key: Option<String>,

    /// Alpha Vantage API key, used as the last market-benchmark source.
    #[arg(long, env = "ALPHA_VANTAGE_API_KEY", global = true, hide_env_values = true)]
    alpha_vantage_key: Option<String>,

    /// Read series from `<DIR>/<ID>.csv` instead of Yahoo Finance.
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,

    /// Treat this date (YYYY-MM-DD) as today.
    #[arg(long, global = true)]
    as_of: Option<String>,

    /// Log format: pretty, json or compact.
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    /// Print machine-readable JSON on stdout.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch identifiers through retry and the quality gate.
    Fetch {
        #[arg(required = true)]
        identifiers: Vec<String>,

        /// Lookback: 1mo, 3mo, 6mo, 1y, 2y or 5y.
        #[arg(long, default_value = "1y")]
        period: String,

        /// Skip the quality gate.
        #[arg(long, default_value_t = false)]
        no_validate: bool,

        /// Fetch identifiers concurrently.
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// Resolve the annual risk-free rate.
    Rate,
    /// Resolve daily market benchmark returns.
    Market {
        #[arg(long, default_value = "1y")]
        period: String,
    },
    /// Portfolio returns and correlation matrix.
    Portfolio {
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Comma-separated weights in ticker order. Equal weights if omitted.
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,

        #[arg(long, default_value = "1y")]
        period: String,
    },
    /// Probe every acquisition path.
    Health,
    /// Print the effective configuration as TOML (credentials redacted).
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let config = load_config(&cli)?;
    if let Commands::Config = cli.command {
        return print_config(&config);
    }

    let mut pipeline =
        AcquisitionPipeline::from_config(config).context("failed to build source clients")?;
    if let Some(date) = cli.as_of.as_deref() {
        let today = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of date '{date}'"))?;
        pipeline = pipeline.with_clock(FixedClock(today));
    }

    match cli.command {
        Commands::Fetch {
            identifiers,
            period,
            no_validate,
            ..
        } => run_fetch(&pipeline, &identifiers, &period, !no_validate, cli.json),
        Commands::Rate => run_rate(&pipeline, cli.json),
        Commands::Market { period } => run_market(&pipeline, &period, cli.json),
        Commands::Portfolio {
            tickers,
            weights,
            period,
        } => run_portfolio(&pipeline, &tickers, weights.as_deref(), &period, cli.json),
        Commands::Health => run_health(&pipeline, cli.json),
        Commands::Config => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(key) = &cli.fred_api_key {
        config.economic_data_credential = Some(key.clone());
    }
    if let Some(key) = &cli.alpha_vantage_key {
        config.secondary_credential = Some(key.clone());
    }
    if let Some(dir) = &cli.csv_dir {
        config.csv_dir = Some(dir.clone());
    }
    if let Commands::Fetch { parallel: true, .. } = cli.command {
        config.parallel = true;
    }
    config.validate()?;
    Ok(config)
}

fn print_config(config: &PipelineConfig) -> Result<()> {
    let redacted = PipelineConfig {
        economic_data_credential: config.economic_data_credential.as_ref().map(|_| "***".into()),
        secondary_credential: config.secondary_credential.as_ref().map(|_| "***".into()),
        ..config.clone()
    };
    print!("{}", redacted.to_toml()?);
    Ok(())
}

fn run_fetch(
    pipeline: &AcquisitionPipeline,
    identifiers: &[String],
    period: &str,
    validate: bool,
    as_json: bool,
) -> Result<()> {
    let period = Period::from_label(period);
    let batch = pipeline.fetch_many(identifiers, period, validate)?;

    if as_json {
        let failures: serde_json::Map<String, serde_json::Value> = batch
            .rejections
            .iter()
            .map(|(id, reason)| {
                (
                    id.clone(),
                    json!({ "kind": reason.kind(), "reason": reason.to_string() }),
                )
            })
            .collect();
        let tables: serde_json::Map<String, serde_json::Value> = batch
            .tables
            .iter()
            .map(|(id, table)| {
                (
                    id.clone(),
                    json!({
                        "rows": table.len(),
                        "first_date": table.first_date(),
                        "last_date": table.last_date(),
                    }),
                )
            })
            .collect();
        let out = json!({
            "period": period,
            "accepted": tables,
            "failed": failures,
            "diagnostics": batch.diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{:<10} {:<8} {:<12} {:<12} {:>8}", "ID", "Rows", "First", "Last", "Attempts");
    println!("{}", "-".repeat(54));
    for diag in &batch.diagnostics {
        match batch.tables.get(&diag.identifier) {
            Some(table) => println!(
                "{:<10} {:<8} {:<12} {:<12} {:>8}{}",
                diag.identifier,
                table.len(),
                fmt_date(table.first_date()),
                fmt_date(table.last_date()),
                diag.attempts,
                if diag.from_cache { " (cached)" } else { "" }
            ),
            None => {
                let reason = batch
                    .rejections
                    .get(&diag.identifier)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("{:<10} FAILED   {reason}", diag.identifier);
            }
        }
        for warning in &diag.warnings {
            println!("           warning: {warning}");
        }
    }
    Ok(())
}

fn run_rate(pipeline: &AcquisitionPipeline, as_json: bool) -> Result<()> {
    let resolved = pipeline.risk_free_rate()?;
    if as_json {
        let out = json!({
            "rate": resolved.value,
            "source": resolved.source,
            "attempts": resolved.log,
            "warnings": resolved.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Risk-free rate: {:.4} ({:.2}%) via {}",
            resolved.value,
            resolved.value * 100.0,
            resolved.source
        );
        if !resolved.log.is_empty() {
            println!("Attempts: {}", resolved.log);
        }
    }
    Ok(())
}

fn run_market(pipeline: &AcquisitionPipeline, period: &str, as_json: bool) -> Result<()> {
    let period = Period::from_label(period);
    let resolved = pipeline.market_returns(period)?;
    let returns = &resolved.value;
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);

    if as_json {
        let out = json!({
            "period": period,
            "source": resolved.source,
            "returns": returns,
            "mean_daily": mean,
            "stdev_daily": var.sqrt(),
            "attempts": resolved.log,
            "warnings": resolved.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Market returns ({period}): {} daily returns via {}",
            returns.len(),
            resolved.source
        );
        println!("Mean daily: {:.5}  Stdev daily: {:.5}", mean, var.sqrt());
        for warning in &resolved.warnings {
            println!("warning: {warning}");
        }
    }
    Ok(())
}

fn run_portfolio(
    pipeline: &AcquisitionPipeline,
    tickers: &[String],
    weights: Option<&[f64]>,
    period: &str,
    as_json: bool,
) -> Result<()> {
    let period = Period::from_label(period);
    let holdings = match weights {
        Some(w) => Some(PortfolioSpec::from_parts(tickers, w)?),
        None => None,
    };

    let batch = pipeline.fetch_many(tickers, period, true)?;
    if !batch.failed.is_empty() {
        bail!(
            "cannot build portfolio, failed to fetch: {}",
            batch.failed.join(", ")
        );
    }

    let returns = portfolio_returns(&batch.tables, holdings.as_ref())?;
    let corr = CorrelationMatrix::from_portfolio(&returns)?;

    if as_json {
        let out = json!({
            "period": period,
            "tickers": returns.tickers,
            "weights": returns.weights,
            "observations": returns.portfolio.len(),
            "portfolio_returns": returns.portfolio,
            "correlation": corr,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let n = returns.portfolio.len() as f64;
    let mean = returns.portfolio.iter().sum::<f64>() / n;
    println!(
        "Portfolio ({period}): {} daily returns, mean {:.5}",
        returns.portfolio.len(),
        mean
    );
    for (ticker, weight) in returns.tickers.iter().zip(&returns.weights) {
        println!("  {ticker:<8} weight {weight:.4}");
    }
    println!();
    print!("{:<8}", "");
    for label in &corr.labels {
        print!(" {label:>8}");
    }
    println!();
    for (label, row) in corr.labels.iter().zip(&corr.values) {
        print!("{label:<8}");
        for v in row {
            print!(" {v:>8.3}");
        }
        println!();
    }
    for warning in &corr.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn run_health(pipeline: &AcquisitionPipeline, as_json: bool) -> Result<()> {
    let report = HealthMonitor::new(pipeline).check();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    if report.overall_status == OverallStatus::Critical {
        std::process::exit(2);
    }
    Ok(())
}

fn fmt_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn weights_split_on_commas() {
        let cli = Cli::try_parse_from([
            "marketgate",
            "portfolio",
            "AAPL",
            "MSFT",
            "--weights",
            "0.6,0.4",
        ])
        .unwrap();
        match cli.command {
            Commands::Portfolio { weights, .. } => assert_eq!(weights, Some(vec![0.6, 0.4])),
            _ => panic!("expected portfolio command"),
        }
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "marketgate",
            "--fred-api-key",
            "abc",
            "--csv-dir",
            "data",
            "fetch",
            "SPY",
            "--parallel",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.economic_credential(), Some("abc"));
        assert_eq!(config.csv_dir, Some(PathBuf::from("data")));
        assert!(config.parallel);
    }
}
