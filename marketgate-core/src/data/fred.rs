//! FRED (Federal Reserve Economic Data) observations client.
//!
//! Wraps `series/observations`. Values arrive as strings; `"."` marks a date
//! with no observation and is preserved as-is for the caller to skip.

use super::source::{status_error, EconomicDataSource, ScalarObservation, SourceError};
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

const OBSERVATIONS_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

pub struct FredClient {
    client: reqwest::blocking::Client,
}

impl FredClient {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// FRED answers 400 for a rejected `api_key`, which no retry can fix.
    fn status_error(status: StatusCode, series_id: &str) -> SourceError {
        if status == StatusCode::BAD_REQUEST {
            return SourceError::AuthenticationRequired(format!(
                "HTTP {status} for {series_id} (invalid api_key or series)"
            ));
        }
        status_error(status, series_id)
    }

    fn parse_response(resp: ObservationsResponse) -> Vec<ScalarObservation> {
        resp.observations
            .into_iter()
            .map(|o| {
                let date = NaiveDate::parse_from_str(&o.date, "%Y-%m-%d").ok();
                ScalarObservation::new(date, o.value)
            })
            .collect()
    }
}

impl EconomicDataSource for FredClient {
    fn name(&self) -> &str {
        "fred"
    }

    fn fetch(
        &self,
        series_id: &str,
        credential: &str,
        limit: usize,
        most_recent_first: bool,
    ) -> Result<Vec<ScalarObservation>, SourceError> {
        if credential.is_empty() {
            return Err(SourceError::MissingCredential {
                provider: "fred".into(),
            });
        }

        let limit = limit.to_string();
        let sort_order = if most_recent_first { "desc" } else { "asc" };
        let resp = self
            .client
            .get(OBSERVATIONS_URL)
            .query(&[
                ("series_id", series_id),
                ("api_key", credential),
                ("file_type", "json"),
                ("limit", limit.as_str()),
                ("sort_order", sort_order),
            ])
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::status_error(status, series_id));
        }

        let body: ObservationsResponse = resp.json().map_err(|e| {
            SourceError::ResponseFormatChanged(format!(
                "failed to parse observations for {series_id}: {e}"
            ))
        })?;

        let observations = Self::parse_response(body);
        if observations.is_empty() {
            return Err(SourceError::EmptyResult {
                identifier: series_id.to_string(),
            });
        }
        Ok(observations)
    }
}
