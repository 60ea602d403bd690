//! In-memory sources for tests and offline demos.
//!
//! Each identifier has a script of responses; call `n` gets response `n`, and
//! once the script runs out the last response repeats. Unknown identifiers
//! answer `SymbolNotFound`. Every call is counted.

use crate::data::{
    EconomicDataSource, ScalarObservation, SeriesSource, SourceError, TimeSeriesTable,
};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::Mutex;

type SeriesResponse = Result<TimeSeriesTable, SourceError>;
type ObservationResponse = Result<Vec<ScalarObservation>, SourceError>;

#[derive(Debug, Default)]
struct CallCounter(Mutex<HashMap<String, u32>>);

impl CallCounter {
    /// Record a call and return its zero-based index.
    fn record(&self, id: &str) -> usize {
        let mut calls = self.0.lock().unwrap_or_else(|p| p.into_inner());
        let n = calls.entry(id.to_string()).or_insert(0);
        *n += 1;
        (*n - 1) as usize
    }

    fn get(&self, id: &str) -> u32 {
        let calls = self.0.lock().unwrap_or_else(|p| p.into_inner());
        calls.get(id).copied().unwrap_or(0)
    }

    fn total(&self) -> u32 {
        let calls = self.0.lock().unwrap_or_else(|p| p.into_inner());
        calls.values().sum()
    }
}

fn scripted<T: Clone>(script: &[T], call: usize) -> Option<T> {
    script.get(call).or_else(|| script.last()).cloned()
}

#[derive(Debug)]
pub struct FakeSeriesSource {
    name: String,
    scripts: HashMap<String, Vec<SeriesResponse>>,
    calls: CallCounter,
}

impl FakeSeriesSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: HashMap::new(),
            calls: CallCounter::default(),
        }
    }

    /// Always serve `table`, restricted to the requested window.
    pub fn with_series(self, identifier: &str, table: TimeSeriesTable) -> Self {
        self.with_script(identifier, vec![Ok(table)])
    }

    pub fn with_error(self, identifier: &str, error: SourceError) -> Self {
        self.with_script(identifier, vec![Err(error)])
    }

    pub fn with_script(mut self, identifier: &str, script: Vec<SeriesResponse>) -> Self {
        self.scripts.insert(identifier.to_string(), script);
        self
    }

    pub fn calls(&self, identifier: &str) -> u32 {
        self.calls.get(identifier)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.total()
    }
}

impl SeriesSource for FakeSeriesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(
        &self,
        identifier: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError> {
        let call = self.calls.record(identifier);
        let response = self
            .scripts
            .get(identifier)
            .and_then(|script| scripted(script, call))
            .unwrap_or_else(|| {
                Err(SourceError::SymbolNotFound {
                    symbol: identifier.to_string(),
                })
            })?;

        let table = response.restrict(start, end);
        if table.is_empty() {
            return Err(SourceError::EmptyResult {
                identifier: identifier.to_string(),
            });
        }
        Ok(table)
    }
}

#[derive(Debug)]
pub struct FakeEconomicSource {
    name: String,
    scripts: HashMap<String, Vec<ObservationResponse>>,
    calls: CallCounter,
}

impl FakeEconomicSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: HashMap::new(),
            calls: CallCounter::default(),
        }
    }

    /// Serve raw values, most recent first. `"."` is the missing sentinel.
    pub fn with_values(self, series_id: &str, raw: &[&str]) -> Self {
        let observations = raw.iter().map(|v| ScalarObservation::new(None, *v)).collect();
        self.with_script(series_id, vec![Ok(observations)])
    }

    pub fn with_error(self, series_id: &str, error: SourceError) -> Self {
        self.with_script(series_id, vec![Err(error)])
    }

    pub fn with_script(mut self, series_id: &str, script: Vec<ObservationResponse>) -> Self {
        self.scripts.insert(series_id.to_string(), script);
        self
    }

    pub fn calls(&self, series_id: &str) -> u32 {
        self.calls.get(series_id)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.total()
    }
}

impl EconomicDataSource for FakeEconomicSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(
        &self,
        series_id: &str,
        credential: &str,
        limit: usize,
        _most_recent_first: bool,
    ) -> Result<Vec<ScalarObservation>, SourceError> {
        let call = self.calls.record(series_id);
        if credential.is_empty() {
            return Err(SourceError::MissingCredential {
                provider: self.name.clone(),
            });
        }
        let mut observations = self
            .scripts
            .get(series_id)
            .and_then(|script| scripted(script, call))
            .unwrap_or_else(|| {
                Err(SourceError::SymbolNotFound {
                    symbol: series_id.to_string(),
                })
            })?;
        observations.truncate(limit);
        if observations.is_empty() {
            return Err(SourceError::EmptyResult {
                identifier: series_id.to_string(),
            });
        }
        Ok(observations)
    }
}

/// Close-only table of consecutive days ending on `last`.
pub fn closes_ending(last: NaiveDate, closes: &[f64]) -> TimeSeriesTable {
    let start = last - Duration::days(closes.len() as i64 - 1);
    TimeSeriesTable::from_closes(start, closes)
}

/// `n` closes ending on `last`, rising by 0.1% a day from 100.
pub fn steady_closes(last: NaiveDate, n: usize) -> TimeSeriesTable {
    let closes: Vec<f64> = (0..n).map(|i| 100.0 * 1.001f64.powi(i as i32)).collect();
    closes_ending(last, &closes)
}
