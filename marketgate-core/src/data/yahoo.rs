//! Yahoo Finance series client.
//!
//! Fetches daily OHLCV rows from Yahoo's v8 chart API. One HTTP request per
//! call: retries, freshness checks and validation happen above this layer.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes, which surface as `SourceError::ResponseFormatChanged`.

use super::source::{status_error, SeriesSource, SourceError};
use super::table::{Field, Row, TimeSeriesTable};
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance series client.
pub struct YahooClient {
    client: reqwest::blocking::Client,
}

impl YahooClient {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Build the chart API URL for an identifier and date range.
    fn chart_url(identifier: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = (end + chrono::Duration::days(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp()
            - 1;
        format!("{CHART_URL}/{identifier}?period1={start_ts}&period2={end_ts}&interval=1d")
    }

    /// Parse the chart API response into a table.
    fn parse_response(
        identifier: &str,
        resp: ChartResponse,
    ) -> Result<TimeSeriesTable, SourceError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => SourceError::SymbolNotFound {
                symbol: identifier.to_string(),
            },
            Some(err) => {
                SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => SourceError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = match result.into_iter().next() {
            Some(data) => data,
            None => {
                return Err(SourceError::EmptyResult {
                    identifier: identifier.to_string(),
                })
            }
        };

        // A valid symbol with no trading days in the window has no timestamps.
        let timestamps = data.timestamp.unwrap_or_default();

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::ResponseFormatChanged("no quote data".into()))?;

        let mut rows = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| {
                    SourceError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let values = vec![
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
                quote.volume.get(i).copied().flatten(),
            ];

            // Skip rows where everything is absent (holidays/non-trading days)
            if values.iter().all(Option::is_none) {
                continue;
            }
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

impl SeriesSource for YahooClient {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        identifier: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError> {
        let url = Self::chart_url(identifier, start, end);
        let resp = self.client.get(&url).send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, identifier));
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            SourceError::ResponseFormatChanged(format!(
                "failed to parse response for {identifier}: {e}"
            ))
        })?;
        Self::parse_response(identifier, chart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<TimeSeriesTable, SourceError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooClient::parse_response("SPY", resp)
    }

    #[test]
    fn parses_rows_and_skips_empty_days() {
        let table = parse(
            r#"{"chart":{"result":[{"timestamp":[1704205800,1704292200,1704378600],
            "indicators":{"quote":[{
              "open":[470.0,null,472.0],"high":[473.0,null,474.0],
              "low":[469.0,null,470.5],"close":[472.6,null,473.1],
              "volume":[123456,null,98765]}]}}],"error":null}}"#,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.fields(), &Field::OHLCV);
        assert_eq!(table.closes(), vec![472.6, 473.1]);
        assert_eq!(table.value(1, Field::Volume), Some(98765.0));
    }

    #[test]
    fn no_timestamps_is_empty_result() {
        let err = parse(r#"{"chart":{"result":[{"indicators":{"quote":[{}]}}],"error":null}}"#)
            .unwrap_err();
        assert!(matches!(err, SourceError::EmptyResult { .. }));
    }

    #[test]
    fn not_found_error_maps_to_symbol_not_found() {
        let err = parse(
            r#"{"chart":{"result":null,
            "error":{"code":"Not Found","description":"No data found"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::SymbolNotFound { .. }));
    }

    #[test]
    fn chart_url_covers_whole_end_day() {
        let url = YahooClient::chart_url(
            "^GSPC",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        assert!(url.contains("period1=1704067200"));
        assert!(url.contains("period2=1704153599"));
    }
}
