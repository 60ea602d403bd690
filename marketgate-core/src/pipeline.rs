//! Acquisition pipeline: the public entry point that ties sources, retry,
//! the quality gate, fallback chains and the response cache together.
//!
//! Constructed explicitly and shared by reference. Per-identifier failures in
//! a batch are isolated and reported; only a batch with no accepted identifier
//! or an exhausted fallback chain is an error.

use crate::cache::{CacheEntry, CacheKey, CacheLookup, CachedValue, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::data::{
    first_valid, AlphaVantageClient, CsvSeriesSource, EconomicDataSource, FredClient,
    SeriesSource, SourceError, TimeSeriesTable, YahooClient,
};
use crate::error::{ErrorKind, PipelineError};
use crate::fallback::{
    usable_rate, usable_returns, FallbackChain, Resolved, SourceAttemptLog, StrategyFailure,
    StrategyOutput,
};
use crate::fetch::{AttemptError, FetchError, RetryingFetcher};
use crate::quality::{QualityGate, RejectReason};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Rows the primary market benchmark must have before its returns are used.
pub const MIN_BENCHMARK_ROWS: usize = 50;

/// Observations requested per economic-series call.
pub const ECONOMIC_OBSERVATION_LIMIT: usize = 10;

/// Calendar-day window for the latest treasury-bill quote.
pub const QUOTE_WINDOW_DAYS: i64 = 7;

/// Risk-free rate series, tried in this order.
pub const PRIMARY_RATE_SERIES: &str = "DGS3MO";
pub const RATE_QUOTE_SYMBOL: &str = "^IRX";
pub const SECONDARY_RATE_SERIES: &str = "DGS1MO";

pub const PRIMARY_BENCHMARK: &str = "^GSPC";
pub const BACKUP_BENCHMARK: &str = "VTI";

/// Whether an operation may answer from the response cache.
///
/// `Refresh` always runs the sources and still stores accepted results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheUse {
    ReadThrough,
    Refresh,
}

/// Lookback period label. Unknown labels fall back to one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[default]
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Period {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "1mo" => Period::OneMonth,
            "3mo" => Period::ThreeMonths,
            "6mo" => Period::SixMonths,
            "1y" => Period::OneYear,
            "2y" => Period::TwoYears,
            "5y" => Period::FiveYears,
            other => {
                debug!(label = other, "unknown period, using 1y");
                Period::OneYear
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
        }
    }

    /// Calendar days covered by the period.
    pub fn days(&self) -> i64 {
        match self {
            Period::OneMonth => 30,
            Period::ThreeMonths => 90,
            Period::SixMonths => 180,
            Period::OneYear => 365,
            Period::TwoYears => 730,
            Period::FiveYears => 1825,
        }
    }

    /// `[today - days, today]`.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (today - Duration::days(self.days()), today)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened while producing one identifier's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchDiagnostics {
    pub identifier: String,
    pub source: String,
    pub attempts: u32,
    pub warnings: Vec<String>,
    pub from_cache: bool,
}

/// Why an identifier was not accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("quality gate: {0}")]
    Quality(#[from] RejectReason),
}

impl FetchFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchFailure::Fetch(e) => e.kind(),
            FetchFailure::Quality(r) => r.kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Accepted {
        table: TimeSeriesTable,
        diagnostics: FetchDiagnostics,
    },
    Rejected {
        reason: FetchFailure,
        diagnostics: FetchDiagnostics,
    },
}

impl FetchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FetchOutcome::Accepted { .. })
    }

    pub fn diagnostics(&self) -> &FetchDiagnostics {
        match self {
            FetchOutcome::Accepted { diagnostics, .. }
            | FetchOutcome::Rejected { diagnostics, .. } => diagnostics,
        }
    }

    pub fn table(&self) -> Option<&TimeSeriesTable> {
        match self {
            FetchOutcome::Accepted { table, .. } => Some(table),
            FetchOutcome::Rejected { .. } => None,
        }
    }
}

/// Result of a batch fetch with at least one accepted identifier.
#[derive(Debug, Clone, Default)]
pub struct BatchFetch {
    pub tables: BTreeMap<String, TimeSeriesTable>,
    /// Rejected identifiers in input order.
    pub failed: Vec<String>,
    pub rejections: BTreeMap<String, FetchFailure>,
    /// One entry per input identifier, in input order.
    pub diagnostics: Vec<FetchDiagnostics>,
}

pub struct AcquisitionPipeline {
    series: Box<dyn SeriesSource>,
    economic: Box<dyn EconomicDataSource>,
    secondary: Option<Box<dyn SeriesSource>>,
    clock: Box<dyn Clock>,
    fetcher: RetryingFetcher,
    gate: QualityGate,
    cache: Option<ResponseCache>,
    config: PipelineConfig,
}

impl AcquisitionPipeline {
    /// Pipeline over the real providers described by `config`.
    ///
    /// Series come from `csv_dir` when set, otherwise Yahoo Finance. Alpha
    /// Vantage is attached when a secondary credential is present.
    pub fn from_config(config: PipelineConfig) -> Result<Self, SourceError> {
        let timeout = config.request_timeout();
        let series: Box<dyn SeriesSource> = match &config.csv_dir {
            Some(dir) => Box::new(CsvSeriesSource::new(dir.clone())),
            None => Box::new(YahooClient::new(timeout)?),
        };
        let economic = Box::new(FredClient::new(timeout)?);
        let secondary = match config.secondary_credential() {
            Some(key) => {
                let client = AlphaVantageClient::new(key, timeout)?;
                Some(Box::new(client) as Box<dyn SeriesSource>)
            }
            None => None,
        };

        let mut pipeline = Self::from_boxed(series, economic, config);
        pipeline.secondary = secondary;
        Ok(pipeline)
    }

    pub fn new(
        series: impl SeriesSource + 'static,
        economic: impl EconomicDataSource + 'static,
        config: PipelineConfig,
    ) -> Self {
        Self::from_boxed(Box::new(series), Box::new(economic), config)
    }

    fn from_boxed(
        series: Box<dyn SeriesSource>,
        economic: Box<dyn EconomicDataSource>,
        config: PipelineConfig,
    ) -> Self {
        let fetcher = RetryingFetcher::new(config.max_attempts).with_delay(config.retry_delay());
        let cache = config.cache_ttl().map(ResponseCache::new);
        Self {
            series,
            economic,
            secondary: None,
            clock: Box::new(SystemClock),
            fetcher,
            gate: QualityGate::new(),
            cache,
            config,
        }
    }

    /// Last-resort series source for the market benchmark.
    pub fn with_secondary_source(mut self, source: impl SeriesSource + 'static) -> Self {
        self.secondary = Some(Box::new(source));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn series_source(&self) -> &dyn SeriesSource {
        self.series.as_ref()
    }

    pub fn economic_source(&self) -> &dyn EconomicDataSource {
        self.economic.as_ref()
    }

    /// Fetch one identifier over `period`, optionally through the quality gate.
    pub fn fetch_one(&self, identifier: &str, period: Period, validate: bool) -> FetchOutcome {
        self.fetch_one_with(identifier, period, validate, CacheUse::ReadThrough)
    }

    fn fetch_one_with(
        &self,
        identifier: &str,
        period: Period,
        validate: bool,
        cache_use: CacheUse,
    ) -> FetchOutcome {
        let today = self.today();
        let key = CacheKey::new("series", format!("{identifier}|{period}|{validate}"));
        let source = self.series.name().to_string();

        if let Some((entry, warning)) = self.cached(&key, cache_use) {
            if let CachedValue::Table(table) = entry.value {
                return FetchOutcome::Accepted {
                    table,
                    diagnostics: FetchDiagnostics {
                        identifier: identifier.to_string(),
                        source: entry.source,
                        attempts: 0,
                        warnings: warning.into_iter().collect(),
                        from_cache: true,
                    },
                };
            }
        }

        let (start, end) = period.window(today);
        let mut diagnostics = FetchDiagnostics {
            identifier: identifier.to_string(),
            source,
            attempts: 0,
            warnings: Vec::new(),
            from_cache: false,
        };

        let fetched = match self
            .fetcher
            .fetch_with_retry(identifier, today, || self.series.fetch(identifier, start, end))
        {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(identifier, error = %e, "fetch failed");
                diagnostics.attempts = e.attempts;
                return FetchOutcome::Rejected {
                    reason: e.into(),
                    diagnostics,
                };
            }
        };
        diagnostics.attempts = fetched.attempts;
        diagnostics.warnings = fetched.warnings;
        let table = fetched.value;

        if validate {
            let verdict = self.gate.validate_as_of(&table, identifier, today);
            diagnostics.warnings.extend(verdict.warnings);
            if let Some(reason) = verdict.rejection {
                return FetchOutcome::Rejected {
                    reason: reason.into(),
                    diagnostics,
                };
            }
        }

        info!(identifier, rows = table.len(), source = %diagnostics.source, "series accepted");
        if let Some(cache) = &self.cache {
            cache.put(key, CachedValue::Table(table.clone()), diagnostics.source.clone());
        }
        FetchOutcome::Accepted { table, diagnostics }
    }

    /// Fetch every identifier independently. Fails only if none is accepted.
    pub fn fetch_many<S>(
        &self,
        identifiers: &[S],
        period: Period,
        validate: bool,
    ) -> Result<BatchFetch, PipelineError>
    where
        S: AsRef<str> + Sync,
    {
        self.fetch_batch(identifiers, period, validate, CacheUse::ReadThrough)
    }

    pub(crate) fn fetch_batch<S>(
        &self,
        identifiers: &[S],
        period: Period,
        validate: bool,
        cache_use: CacheUse,
    ) -> Result<BatchFetch, PipelineError>
    where
        S: AsRef<str> + Sync,
    {
        let outcomes: Vec<FetchOutcome> = if self.config.parallel {
            identifiers
                .par_iter()
                .map(|id| self.fetch_one_with(id.as_ref(), period, validate, cache_use))
                .collect()
        } else {
            identifiers
                .iter()
                .map(|id| self.fetch_one_with(id.as_ref(), period, validate, cache_use))
                .collect()
        };

        let mut batch = BatchFetch::default();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                FetchOutcome::Accepted { table, diagnostics } => {
                    batch.tables.insert(diagnostics.identifier.clone(), table);
                    batch.diagnostics.push(diagnostics);
                }
                FetchOutcome::Rejected {
                    reason,
                    diagnostics,
                } => {
                    let id = diagnostics.identifier.clone();
                    failures.push((id.clone(), reason.to_string()));
                    batch.failed.push(id.clone());
                    batch.rejections.insert(id, reason);
                    batch.diagnostics.push(diagnostics);
                }
            }
        }

        if batch.tables.is_empty() {
            warn!(requested = identifiers.len(), "no identifiers succeeded");
            return Err(PipelineError::NoIdentifiersSucceeded { failures });
        }
        if !batch.failed.is_empty() {
            warn!(failed = ?batch.failed, "some identifiers failed");
        }
        info!(
            accepted = batch.tables.len(),
            requested = identifiers.len(),
            "batch fetched"
        );
        Ok(batch)
    }

    /// Annual risk-free rate as a fraction (0.045 = 4.5%).
    pub fn risk_free_rate(&self) -> Result<Resolved<f64>, PipelineError> {
        self.resolve_risk_free_rate(CacheUse::ReadThrough)
    }

    pub(crate) fn resolve_risk_free_rate(
        &self,
        cache_use: CacheUse,
    ) -> Result<Resolved<f64>, PipelineError> {
        let key = CacheKey::new("risk_free_rate", "");
        if let Some((entry, warning)) = self.cached(&key, cache_use) {
            if let CachedValue::Rate(rate) = entry.value {
                return Ok(cached_resolved(rate, entry.source, warning));
            }
        }

        let resolved = self.risk_free_chain().resolve()?;
        info!(rate = resolved.value, source = %resolved.source, "risk-free rate resolved");
        if let Some(cache) = &self.cache {
            cache.put(key, CachedValue::Rate(resolved.value), resolved.source.clone());
        }
        Ok(resolved)
    }

    /// Daily simple returns of the market benchmark over `period`.
    pub fn market_returns(&self, period: Period) -> Result<Resolved<Vec<f64>>, PipelineError> {
        self.resolve_market_returns(period, CacheUse::ReadThrough)
    }

    pub(crate) fn resolve_market_returns(
        &self,
        period: Period,
        cache_use: CacheUse,
    ) -> Result<Resolved<Vec<f64>>, PipelineError> {
        let key = CacheKey::new("market_returns", period.as_str());
        if let Some((entry, warning)) = self.cached(&key, cache_use) {
            if let CachedValue::Returns(returns) = entry.value {
                return Ok(cached_resolved(returns, entry.source, warning));
            }
        }

        let resolved = self.market_chain(period).resolve()?;
        info!(returns = resolved.value.len(), source = %resolved.source, "market returns resolved");
        if let Some(cache) = &self.cache {
            cache.put(
                key,
                CachedValue::Returns(resolved.value.clone()),
                resolved.source.clone(),
            );
        }
        Ok(resolved)
    }

    pub(crate) fn risk_free_chain(&self) -> FallbackChain<'_, f64> {
        let economic = self.economic.name();
        let series = self.series.name();
        FallbackChain::new("risk_free_rate", usable_rate)
            .strategy(format!("{economic}:{PRIMARY_RATE_SERIES}"), move || {
                self.economic_rate(PRIMARY_RATE_SERIES)
            })
            .strategy(format!("{series}:{RATE_QUOTE_SYMBOL}"), move || {
                self.quoted_rate(RATE_QUOTE_SYMBOL)
            })
            .strategy(format!("{economic}:{SECONDARY_RATE_SERIES}"), move || {
                self.economic_rate(SECONDARY_RATE_SERIES)
            })
    }

    pub(crate) fn market_chain(&self, period: Period) -> FallbackChain<'_, Vec<f64>> {
        let series = self.series.name();
        let secondary = self
            .secondary
            .as_ref()
            .map_or("alpha_vantage", |s| s.name());
        FallbackChain::new("market_returns", |r: &Vec<f64>| usable_returns(r))
            .strategy(format!("{series}:{PRIMARY_BENCHMARK}"), move || {
                self.benchmark_returns(
                    self.series.as_ref(),
                    PRIMARY_BENCHMARK,
                    period,
                    MIN_BENCHMARK_ROWS,
                )
            })
            .strategy(format!("{series}:{BACKUP_BENCHMARK}"), move || {
                self.benchmark_returns(self.series.as_ref(), BACKUP_BENCHMARK, period, 0)
            })
            .strategy(format!("{secondary}:{BACKUP_BENCHMARK}"), move || {
                match &self.secondary {
                    Some(source) => {
                        self.benchmark_returns(source.as_ref(), BACKUP_BENCHMARK, period, 0)
                    }
                    None => Err(StrategyFailure::new(
                        ErrorKind::MissingCredential,
                        format!("missing credential for {secondary}"),
                        0,
                    )),
                }
            })
    }

    /// Latest valid observation of an economic series, percent to fraction.
    pub(crate) fn economic_rate(
        &self,
        series_id: &str,
    ) -> Result<StrategyOutput<f64>, StrategyFailure> {
        let Some(credential) = self.config.economic_credential() else {
            let err = SourceError::MissingCredential {
                provider: self.economic.name().to_string(),
            };
            return Err(StrategyFailure::new(err.kind(), err.to_string(), 0));
        };

        let fetched = self.fetcher.retry(series_id, || {
            let observations = self.economic.fetch(
                series_id,
                credential,
                ECONOMIC_OBSERVATION_LIMIT,
                true,
            )?;
            first_valid(&observations).ok_or_else(|| {
                AttemptError::from(SourceError::EmptyResult {
                    identifier: series_id.to_string(),
                })
            })
        })?;
        Ok(StrategyOutput::new(fetched.value / 100.0, fetched.attempts))
    }

    /// Last close of a rate quote over a short window, percent to fraction.
    fn quoted_rate(&self, symbol: &str) -> Result<StrategyOutput<f64>, StrategyFailure> {
        let today = self.today();
        let start = today - Duration::days(QUOTE_WINDOW_DAYS);
        let fetched = self.fetcher.retry(symbol, || {
            let table = self.series.fetch(symbol, start, today)?;
            table.closes().last().copied().ok_or_else(|| {
                AttemptError::from(SourceError::EmptyResult {
                    identifier: symbol.to_string(),
                })
            })
        })?;
        Ok(StrategyOutput::new(fetched.value / 100.0, fetched.attempts))
    }

    fn benchmark_returns(
        &self,
        source: &dyn SeriesSource,
        symbol: &str,
        period: Period,
        min_rows: usize,
    ) -> Result<StrategyOutput<Vec<f64>>, StrategyFailure> {
        let today = self.today();
        let (start, end) = period.window(today);
        let fetched = self
            .fetcher
            .fetch_with_retry(symbol, today, || source.fetch(symbol, start, end))?;
        let table = fetched.value;

        let verdict = self.gate.validate_as_of(&table, symbol, today);
        if let Some(reason) = verdict.rejection {
            return Err(StrategyFailure::new(
                reason.kind(),
                format!("{symbol}: {reason}"),
                fetched.attempts,
            ));
        }
        if table.len() < min_rows {
            return Err(StrategyFailure::new(
                ErrorKind::InsufficientObservations,
                format!(
                    "{symbol}: insufficient market data ({} rows, need {min_rows})",
                    table.len()
                ),
                fetched.attempts,
            ));
        }

        let mut warnings = fetched.warnings;
        warnings.extend(verdict.warnings);
        Ok(StrategyOutput {
            value: table.close_returns(),
            attempts: fetched.attempts,
            warnings,
        })
    }

    fn cached(
        &self,
        key: &CacheKey,
        cache_use: CacheUse,
    ) -> Option<(CacheEntry, Option<String>)> {
        if cache_use == CacheUse::Refresh {
            return None;
        }
        match self.cache.as_ref()?.get(key) {
            CacheLookup::Fresh(entry) => Some((entry, None)),
            CacheLookup::Stale { entry, age } if self.config.serve_stale_cache => {
                let warning = format!(
                    "served expired cache entry for {} {} ({}s old)",
                    key.operation,
                    key.params,
                    age.as_secs()
                );
                warn!(
                    operation = key.operation,
                    params = %key.params,
                    age_secs = age.as_secs(),
                    "serving stale cache entry"
                );
                Some((entry, Some(warning)))
            }
            CacheLookup::Stale { .. } | CacheLookup::Miss => None,
        }
    }
}

fn cached_resolved<T>(value: T, source: String, warning: Option<String>) -> Resolved<T> {
    Resolved {
        value,
        source,
        log: SourceAttemptLog::default(),
        warnings: warning.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_table() {
        let cases = [
            ("1mo", 30),
            ("3mo", 90),
            ("6mo", 180),
            ("1y", 365),
            ("2y", 730),
            ("5y", 1825),
            ("10y", 365),
            ("", 365),
        ];
        for (label, days) in cases {
            assert_eq!(Period::from_label(label).days(), days, "{label}");
        }
    }

    #[test]
    fn period_window_ends_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let (start, end) = Period::OneMonth.window(today);
        assert_eq!(end, today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn period_labels_roundtrip_through_serde() {
        let json = serde_json::to_string(&Period::SixMonths).unwrap();
        assert_eq!(json, "\"6mo\"");
        let back: Period = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Period::SixMonths);
    }
}
