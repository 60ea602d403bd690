//! Alpha Vantage daily series client.
//!
//! Uses `TIME_SERIES_DAILY`. The API key is fixed at construction. Alpha
//! Vantage reports throttling and bad symbols inside a 200 response, under
//! `Note`/`Information` and `Error Message` respectively.

use super::source::{status_error, SeriesSource, SourceError};
use super::table::{Field, Row, TimeSeriesTable};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const QUERY_URL: &str = "https://www.alphavantage.co/query";

/// Compact output holds the latest 100 data points.
const COMPACT_WINDOW_DAYS: i64 = 100;

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyEntry>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyEntry {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

pub struct AlphaVantageClient {
    client: reqwest::blocking::Client,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    fn output_size(start: NaiveDate, end: NaiveDate) -> &'static str {
        if (end - start).num_days() > COMPACT_WINDOW_DAYS {
            "full"
        } else {
            "compact"
        }
    }

    fn parse_response(
        identifier: &str,
        resp: DailyResponse,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError> {
        if let Some(msg) = resp.error_message {
            tracing::debug!(identifier, %msg, "alpha vantage rejected symbol");
            return Err(SourceError::SymbolNotFound {
                symbol: identifier.to_string(),
            });
        }
        if let Some(msg) = resp.note.or(resp.information) {
            return Err(SourceError::Transport(format!("alpha vantage throttled: {msg}")));
        }
        let series = resp.series.ok_or_else(|| {
            SourceError::ResponseFormatChanged("missing 'Time Series (Daily)'".into())
        })?;

        let mut rows = Vec::with_capacity(series.len());
        for (date, entry) in series {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                SourceError::ResponseFormatChanged(format!("invalid date '{date}': {e}"))
            })?;
            if date < start || date > end {
                continue;
            }
            let values = [&entry.open, &entry.high, &entry.low, &entry.close, &entry.volume]
                .iter()
                .map(|v| v.trim().parse::<f64>().ok())
                .collect();
            rows.push(Row::new(date, values));
        }

        if rows.is_empty() {
            return Err(SourceError::EmptyResult {
                identifier: identifier.to_string(),
            });
        }
        TimeSeriesTable::from_unsorted(Field::OHLCV.to_vec(), rows)
            .map_err(|e| SourceError::ResponseFormatChanged(e.to_string()))
    }
}

impl SeriesSource for AlphaVantageClient {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    fn fetch(
        &self,
        identifier: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError> {
        let resp = self
            .client
            .get(QUERY_URL)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", identifier),
                ("outputsize", Self::output_size(start, end)),
                ("apikey", self.api_key.as_str()),
            ])
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, identifier));
        }

        let body: DailyResponse = resp.json().map_err(|e| {
            SourceError::ResponseFormatChanged(format!(
                "failed to parse response for {identifier}: {e}"
            ))
        })?;
        Self::parse_response(identifier, body, start, end)
    }
}
