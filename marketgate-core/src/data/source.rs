//! Source client traits and structured error types.
//!
//! `SeriesSource` abstracts over price-series providers (Yahoo Finance, Alpha
//! Vantage, CSV directories) and `EconomicDataSource` over scalar
//! economic-series providers (FRED), so the pipeline can swap implementations
//! and tests can plug in fakes. Clients perform exactly one request per call;
//! retrying is the fetcher's job.

use super::table::TimeSeriesTable;
use crate::error::ErrorKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Sentinel FRED uses for "no observation on this date".
pub const MISSING_SENTINEL: &str = ".";

/// Errors from a single provider request.
///
/// Displayable in both CLI output and health reports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("empty result for '{identifier}'")]
    EmptyResult { identifier: String },

    #[error("missing credential for {provider}")]
    MissingCredential { provider: String },

    #[error("authentication rejected: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),
}

impl SourceError {
    /// Whether another attempt against the same source could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport(_)
            | SourceError::EmptyResult { .. }
            | SourceError::ResponseFormatChanged(_) => true,
            SourceError::MissingCredential { .. }
            | SourceError::AuthenticationRequired(_)
            | SourceError::SymbolNotFound { .. } => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Transport(_) | SourceError::AuthenticationRequired(_) => {
                ErrorKind::TransportFailure
            }
            SourceError::EmptyResult { .. } => ErrorKind::EmptyResult,
            SourceError::MissingCredential { .. } => ErrorKind::MissingCredential,
            SourceError::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            SourceError::ResponseFormatChanged(_) => ErrorKind::ResponseFormatChanged,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::ResponseFormatChanged(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Map a non-success HTTP status to a source error.
pub(crate) fn status_error(status: reqwest::StatusCode, identifier: &str) -> SourceError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::AuthenticationRequired(format!("HTTP {status} for {identifier}"))
        }
        StatusCode::NOT_FOUND => SourceError::SymbolNotFound {
            symbol: identifier.to_string(),
        },
        _ => SourceError::Transport(format!("HTTP {status} for {identifier}")),
    }
}

/// One observation of a named economic series, as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarObservation {
    pub date: Option<NaiveDate>,
    pub raw: String,
}

impl ScalarObservation {
    pub fn new(date: Option<NaiveDate>, raw: impl Into<String>) -> Self {
        Self {
            date,
            raw: raw.into(),
        }
    }

    /// Parsed value; `None` for the missing sentinel or anything non-numeric.
    pub fn value(&self) -> Option<f64> {
        let raw = self.raw.trim();
        if raw == MISSING_SENTINEL {
            return None;
        }
        raw.parse::<f64>().ok().filter(|v| !v.is_nan())
    }
}

/// First non-missing value in the provider's order (most recent first).
pub fn first_valid(observations: &[ScalarObservation]) -> Option<f64> {
    observations.iter().find_map(ScalarObservation::value)
}

/// Price-series provider returning daily rows for one identifier.
pub trait SeriesSource: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch rows for `identifier` with dates in `[start, end]`.
    ///
    /// A successful response with no rows must be reported as
    /// `SourceError::EmptyResult`, never as an empty table.
    fn fetch(
        &self,
        identifier: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError>;
}

/// Economic-data provider returning recent observations of a named series.
pub trait EconomicDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch up to `limit` observations of `series_id`.
    fn fetch(
        &self,
        series_id: &str,
        credential: &str,
        limit: usize,
        most_recent_first: bool,
    ) -> Result<Vec<ScalarObservation>, SourceError>;
}

impl<S: SeriesSource + ?Sized> SeriesSource for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        identifier: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError> {
        (**self).fetch(identifier, start, end)
    }
}

impl<E: EconomicDataSource + ?Sized> EconomicDataSource for Arc<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        series_id: &str,
        credential: &str,
        limit: usize,
        most_recent_first: bool,
    ) -> Result<Vec<ScalarObservation>, SourceError> {
        (**self).fetch(series_id, credential, limit, most_recent_first)
    }
}
