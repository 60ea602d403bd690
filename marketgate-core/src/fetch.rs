//! Bounded retry around a single source call.
//!
//! `max_attempts` counts total calls, not extra retries: with the default of
//! three, a source is called at most three times. Each series attempt also
//! drops incomplete rows and requires at least `MIN_OBSERVATIONS` to remain.
//! An attempt that comes up short is retried like a transport failure.

use crate::data::{SourceError, TimeSeriesTable};
use crate::error::ErrorKind;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Complete rows a fetched series must keep after incomplete rows are dropped.
pub const MIN_OBSERVATIONS: usize = 20;

/// Fetch-time freshness warning threshold. The quality gate uses its own,
/// looser threshold (`quality::STALENESS_WARN_DAYS`).
pub const FETCH_STALENESS_WARN_DAYS: i64 = 7;

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("insufficient observations: {count} complete rows (need {required})")]
    InsufficientObservations { count: usize, required: usize },
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Source(e) => e.is_retryable(),
            AttemptError::InsufficientObservations { .. } => true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AttemptError::Source(e) => e.kind(),
            AttemptError::InsufficientObservations { .. } => ErrorKind::InsufficientObservations,
        }
    }
}

/// The last failure once the attempt budget is spent, tagged with the
/// identifier and how many calls were made.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("'{identifier}' failed after {attempts} attempt(s): {last}")]
pub struct FetchError {
    pub identifier: String,
    pub attempts: u32,
    pub last: AttemptError,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        self.last.kind()
    }
}

/// A successful call plus what it took to get it.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryingFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryingFetcher {
    /// A fetcher making at most `max_attempts` calls (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
        }
    }

    /// Fixed pause between attempts. Zero by default.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Call `call` until it succeeds, fails non-retryably, or the budget runs out.
    pub fn retry<T, F>(&self, identifier: &str, mut call: F) -> Result<Fetched<T>, FetchError>
    where
        F: FnMut() -> Result<T, AttemptError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call() {
                Ok(value) => {
                    return Ok(Fetched {
                        value,
                        attempts: attempt,
                        warnings: Vec::new(),
                    })
                }
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => {
                    return Err(FetchError {
                        identifier: identifier.to_string(),
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    warn!(
                        identifier,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
    }

    /// Fetch a series with retry, then apply the always-on fetch checks.
    ///
    /// Returns the table with incomplete rows removed. A last row older than
    /// `FETCH_STALENESS_WARN_DAYS` relative to `today` adds a warning but
    /// never fails the fetch.
    pub fn fetch_with_retry<F>(
        &self,
        identifier: &str,
        today: NaiveDate,
        mut source_call: F,
    ) -> Result<Fetched<TimeSeriesTable>, FetchError>
    where
        F: FnMut() -> Result<TimeSeriesTable, SourceError>,
    {
        let mut fetched = self.retry(identifier, || {
            let table = source_call()?;
            if table.is_empty() {
                return Err(SourceError::EmptyResult {
                    identifier: identifier.to_string(),
                }
                .into());
            }
            let cleaned = table.drop_incomplete_rows();
            if cleaned.len() < MIN_OBSERVATIONS {
                return Err(AttemptError::InsufficientObservations {
                    count: cleaned.len(),
                    required: MIN_OBSERVATIONS,
                });
            }
            Ok(cleaned)
        })?;

        if let Some(age) = fetched.value.age_days(today) {
            if age > FETCH_STALENESS_WARN_DAYS {
                warn!(identifier, age_days = age, "fetched data is stale");
                fetched
                    .warnings
                    .push(format!("{identifier} data is {age} days old"));
            }
        }
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Field, Row};
    use std::cell::Cell;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn series(rows: usize, last: NaiveDate) -> TimeSeriesTable {
        let start = last - chrono::Duration::days(rows as i64 - 1);
        let closes: Vec<f64> = (0..rows).map(|i| 100.0 + i as f64).collect();
        TimeSeriesTable::from_closes(start, &closes)
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let calls = Cell::new(0);
        let fetcher = RetryingFetcher::new(3);
        let fetched = fetcher
            .fetch_with_retry("AAA", today(), || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(SourceError::Transport("connection reset".into()))
                } else {
                    Ok(series(30, today()))
                }
            })
            .unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(fetched.attempts, 3);
        assert_eq!(fetched.value.len(), 30);
        assert!(fetched.warnings.is_empty());
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let calls = Cell::new(0);
        let err = RetryingFetcher::new(3)
            .fetch_with_retry("AAA", today(), || {
                calls.set(calls.get() + 1);
                Err(SourceError::Transport("timeout".into()))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.identifier, "AAA");
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn non_retryable_error_stops_immediately() {
        let calls = Cell::new(0);
        let err = RetryingFetcher::new(3)
            .fetch_with_retry("ZZZ", today(), || {
                calls.set(calls.get() + 1);
                Err(SourceError::SymbolNotFound {
                    symbol: "ZZZ".into(),
                })
            })
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn empty_table_counts_as_failed_attempt() {
        let calls = Cell::new(0);
        let err = RetryingFetcher::new(2)
            .fetch_with_retry("AAA", today(), || {
                calls.set(calls.get() + 1);
                Ok(TimeSeriesTable::empty(vec![Field::Close]))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 2);
        assert_eq!(err.kind(), ErrorKind::EmptyResult);
    }

    #[test]
    fn incomplete_rows_are_dropped_before_count_check() {
        let mut rows: Vec<Row> = series(25, today())
            .rows()
            .iter()
            .map(|r| Row::new(r.date, vec![r.values[0], Some(1.0)]))
            .collect();
        for row in rows.iter_mut().take(6) {
            row.values[1] = None;
        }
        let table = TimeSeriesTable::new(vec![Field::Close, Field::Volume], rows).unwrap();

        let err = RetryingFetcher::new(1)
            .fetch_with_retry("AAA", today(), || Ok(table.clone()))
            .unwrap_err();
        assert_eq!(
            err.last,
            AttemptError::InsufficientObservations {
                count: 19,
                required: MIN_OBSERVATIONS
            }
        );
    }

    #[test]
    fn stale_series_warns_but_succeeds() {
        let last = today() - chrono::Duration::days(8);
        let fetched = RetryingFetcher::default()
            .fetch_with_retry("OLD", today(), || Ok(series(30, last)))
            .unwrap();
        assert_eq!(fetched.warnings, vec!["OLD data is 8 days old".to_string()]);
    }

    #[test]
    fn seven_days_is_not_stale_at_fetch_time() {
        let last = today() - chrono::Duration::days(7);
        let fetched = RetryingFetcher::default()
            .fetch_with_retry("OK", today(), || Ok(series(30, last)))
            .unwrap();
        assert!(fetched.warnings.is_empty());
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryingFetcher::new(0).max_attempts(), 1);
    }
}
