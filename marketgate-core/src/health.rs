//! End-to-end health probe over every acquisition path.
//!
//! Never fails: each probe's error is rendered into its status string. Every
//! check hits the sources even when the response cache holds a fresh answer.

use crate::data::{first_valid, SourceError};
use crate::pipeline::{AcquisitionPipeline, CacheUse, Period, PRIMARY_RATE_SERIES};
use chrono::{DateTime, Duration, Local};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Window for the primary series probe.
pub const PROBE_WINDOW_DAYS: i64 = 7;

/// Sample identifiers with more rows than this are healthy.
pub const SAMPLE_HEALTHY_ROWS: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    Healthy,
    NoData,
    NoCredential,
    LimitedData,
    Failed,
    Error(String),
}

impl ProbeStatus {
    pub fn is_healthy(&self) -> bool {
        *self == ProbeStatus::Healthy
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Healthy => f.write_str("HEALTHY"),
            ProbeStatus::NoData => f.write_str("NO DATA"),
            ProbeStatus::NoCredential => f.write_str("NO CREDENTIAL"),
            ProbeStatus::LimitedData => f.write_str("LIMITED DATA"),
            ProbeStatus::Failed => f.write_str("FAILED"),
            ProbeStatus::Error(msg) => write!(f, "ERROR: {msg}"),
        }
    }
}

impl Serialize for ProbeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Critical,
}

impl OverallStatus {
    /// Healthy if every probe that ran succeeded, degraded if some did.
    pub fn from_probes<'a>(probes: impl IntoIterator<Item = &'a ProbeStatus>) -> Self {
        let (mut ran, mut healthy) = (0usize, 0usize);
        for probe in probes {
            if *probe == ProbeStatus::NoCredential {
                continue;
            }
            ran += 1;
            if probe.is_healthy() {
                healthy += 1;
            }
        }
        if ran > 0 && healthy == ran {
            OverallStatus::Healthy
        } else if healthy > 0 {
            OverallStatus::Degraded
        } else {
            OverallStatus::Critical
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverallStatus::Healthy => "HEALTHY",
            OverallStatus::Degraded => "DEGRADED",
            OverallStatus::Critical => "CRITICAL",
        })
    }
}

impl Serialize for OverallStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Per-identifier sample status, or the batch error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SampleQuality {
    PerIdentifier(BTreeMap<String, ProbeStatus>),
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Local>,
    pub data_sources: BTreeMap<String, ProbeStatus>,
    pub sample_data_quality: SampleQuality,
    pub risk_free_rate: String,
    pub market_data: String,
    pub overall_status: OverallStatus,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "System health report ({})", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Overall status: {}", self.overall_status)?;
        writeln!(f, "Data sources:")?;
        for (name, status) in &self.data_sources {
            writeln!(f, "  {name}: {status}")?;
        }
        writeln!(f, "Risk-free rate: {}", self.risk_free_rate)?;
        writeln!(f, "Market data: {}", self.market_data)?;
        match &self.sample_data_quality {
            SampleQuality::PerIdentifier(statuses) => {
                writeln!(f, "Sample data quality:")?;
                for (id, status) in statuses {
                    writeln!(f, "  {id}: {status}")?;
                }
            }
            SampleQuality::Error(msg) => writeln!(f, "Sample data quality: {msg}")?,
        }
        Ok(())
    }
}

pub struct HealthMonitor<'a> {
    pipeline: &'a AcquisitionPipeline,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(pipeline: &'a AcquisitionPipeline) -> Self {
        Self { pipeline }
    }

    pub fn check(&self) -> HealthReport {
        let mut data_sources = BTreeMap::new();
        data_sources.insert(
            self.pipeline.series_source().name().to_string(),
            self.probe_series(),
        );
        data_sources.insert(
            self.pipeline.economic_source().name().to_string(),
            self.probe_economic(),
        );

        let risk_free_rate = match self.pipeline.resolve_risk_free_rate(CacheUse::Refresh) {
            Ok(r) => format!(
                "{:.4} ({:.2}%) via {}",
                r.value,
                r.value * 100.0,
                r.source
            ),
            Err(e) => format!("ERROR: {e}"),
        };

        let market_data = match self
            .pipeline
            .resolve_market_returns(Period::OneMonth, CacheUse::Refresh)
        {
            Ok(r) => format!("{} returns via {}", r.value.len(), r.source),
            Err(e) => format!("ERROR: {e}"),
        };

        let sample_data_quality = self.probe_sample();
        let overall_status = OverallStatus::from_probes(data_sources.values());
        info!(%overall_status, "health check complete");

        HealthReport {
            timestamp: Local::now(),
            data_sources,
            sample_data_quality,
            risk_free_rate,
            market_data,
            overall_status,
        }
    }

    fn probe_identifiers(&self) -> &[String] {
        &self.pipeline.config().probe_identifiers
    }

    /// One call for the first probe identifier over the last week.
    fn probe_series(&self) -> ProbeStatus {
        let identifier = self
            .probe_identifiers()
            .first()
            .map_or("AAPL", String::as_str);
        let today = self.pipeline.today();
        let start = today - Duration::days(PROBE_WINDOW_DAYS);
        match self.pipeline.series_source().fetch(identifier, start, today) {
            Ok(table) if !table.is_empty() => ProbeStatus::Healthy,
            Ok(_) | Err(SourceError::EmptyResult { .. }) => ProbeStatus::NoData,
            Err(e) => ProbeStatus::Error(e.to_string()),
        }
    }

    /// Latest observation of the primary rate series, single call.
    fn probe_economic(&self) -> ProbeStatus {
        let Some(credential) = self.pipeline.config().economic_credential() else {
            return ProbeStatus::NoCredential;
        };
        match self
            .pipeline
            .economic_source()
            .fetch(PRIMARY_RATE_SERIES, credential, 1, true)
        {
            Ok(observations) if first_valid(&observations).is_some() => ProbeStatus::Healthy,
            Ok(_) | Err(SourceError::EmptyResult { .. }) => ProbeStatus::NoData,
            Err(e) => ProbeStatus::Error(e.to_string()),
        }
    }

    fn probe_sample(&self) -> SampleQuality {
        let ids = self.probe_identifiers();
        match self
            .pipeline
            .fetch_batch(ids, Period::OneMonth, true, CacheUse::Refresh)
        {
            Ok(batch) => SampleQuality::PerIdentifier(
                ids.iter()
                    .map(|id| {
                        let status = match batch.tables.get(id) {
                            Some(t) if t.len() > SAMPLE_HEALTHY_ROWS => ProbeStatus::Healthy,
                            Some(_) => ProbeStatus::LimitedData,
                            None => ProbeStatus::Failed,
                        };
                        (id.clone(), status)
                    })
                    .collect(),
            ),
            Err(e) => SampleQuality::Error(format!("ERROR: {e}")),
        }
    }
}
