//! Health check over fake sources: per-probe statuses and the overall rollup.

use chrono::NaiveDate;
use marketgate_core::clock::FixedClock;
use marketgate_core::health::{OverallStatus, ProbeStatus, SampleQuality};
use marketgate_core::testing::{steady_closes, FakeEconomicSource, FakeSeriesSource};
use marketgate_core::{AcquisitionPipeline, HealthMonitor, PipelineConfig};
use std::sync::Arc;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
}

fn healthy_series() -> FakeSeriesSource {
    ["AAPL", "MSFT", "GOOGL", "^GSPC", "VTI"]
        .into_iter()
        .fold(FakeSeriesSource::new("yahoo_finance"), |source, id| {
            source.with_series(id, steady_closes(today(), 30))
        })
}

fn build(
    series: FakeSeriesSource,
    economic: FakeEconomicSource,
    credential: Option<&str>,
) -> AcquisitionPipeline {
    let config = PipelineConfig {
        economic_data_credential: credential.map(String::from),
        ..Default::default()
    };
    AcquisitionPipeline::new(series, economic, config).with_clock(FixedClock(today()))
}

#[test]
fn all_probes_healthy() {
    let pipeline = build(
        healthy_series(),
        FakeEconomicSource::new("fred").with_values("DGS3MO", &["5.0"]),
        Some("key"),
    );
    let report = HealthMonitor::new(&pipeline).check();

    assert_eq!(report.data_sources["yahoo_finance"], ProbeStatus::Healthy);
    assert_eq!(report.data_sources["fred"], ProbeStatus::Healthy);
    assert_eq!(report.overall_status, OverallStatus::Healthy);
    assert_eq!(report.risk_free_rate, "0.0500 (5.00%) via fred:DGS3MO");
    // A one-month ^GSPC window can never reach 50 rows, so VTI answers.
    assert_eq!(report.market_data, "29 returns via yahoo_finance:VTI");
    match &report.sample_data_quality {
        SampleQuality::PerIdentifier(statuses) => {
            assert_eq!(statuses.len(), 3);
            assert!(statuses.values().all(ProbeStatus::is_healthy));
        }
        other => panic!("unexpected sample quality: {other:?}"),
    }
}

#[test]
fn missing_credential_is_excluded_from_rollup() {
    let series = healthy_series().with_series(
        "^IRX",
        marketgate_core::testing::closes_ending(today(), &[4.5]),
    );
    let pipeline = build(series, FakeEconomicSource::new("fred"), None);
    let report = HealthMonitor::new(&pipeline).check();

    assert_eq!(report.data_sources["fred"], ProbeStatus::NoCredential);
    assert_eq!(report.overall_status, OverallStatus::Healthy);
    assert_eq!(report.risk_free_rate, "0.0450 (4.50%) via yahoo_finance:^IRX");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["data_sources"]["fred"], "NO CREDENTIAL");
    assert_eq!(json["overall_status"], "HEALTHY");
    assert_eq!(json["sample_data_quality"]["AAPL"], "HEALTHY");
}

#[test]
fn failing_primary_probe_degrades() {
    let series = ["MSFT", "GOOGL", "VTI"]
        .into_iter()
        .fold(FakeSeriesSource::new("yahoo_finance"), |source, id| {
            source.with_series(id, steady_closes(today(), 30))
        });
    let pipeline = build(
        series,
        FakeEconomicSource::new("fred").with_values("DGS3MO", &["5.0"]),
        Some("key"),
    );
    let report = HealthMonitor::new(&pipeline).check();

    assert!(matches!(
        report.data_sources["yahoo_finance"],
        ProbeStatus::Error(_)
    ));
    assert_eq!(report.overall_status, OverallStatus::Degraded);
    match &report.sample_data_quality {
        SampleQuality::PerIdentifier(statuses) => {
            assert_eq!(statuses["AAPL"], ProbeStatus::Failed);
            assert_eq!(statuses["MSFT"], ProbeStatus::Healthy);
        }
        other => panic!("unexpected sample quality: {other:?}"),
    }
}

#[test]
fn nothing_reachable_is_critical_and_never_errors() {
    let pipeline = build(
        FakeSeriesSource::new("yahoo_finance"),
        FakeEconomicSource::new("fred"),
        None,
    );
    let report = HealthMonitor::new(&pipeline).check();

    assert_eq!(report.overall_status, OverallStatus::Critical);
    assert!(report.risk_free_rate.starts_with("ERROR: all sources exhausted"));
    assert!(report.market_data.starts_with("ERROR: all sources exhausted"));
    match &report.sample_data_quality {
        SampleQuality::Error(msg) => assert!(msg.starts_with("ERROR: no identifiers succeeded")),
        other => panic!("unexpected sample quality: {other:?}"),
    }

    let text = report.to_string();
    assert!(text.contains("Overall status: CRITICAL"));
}

#[test]
fn warm_cache_does_not_short_circuit_a_check() {
    let series = Arc::new(healthy_series());
    let economic = Arc::new(FakeEconomicSource::new("fred").with_values("DGS3MO", &["5.0"]));
    let config = PipelineConfig {
        economic_data_credential: Some("key".into()),
        cache_ttl_secs: Some(300),
        ..Default::default()
    };
    let pipeline = AcquisitionPipeline::new(series.clone(), economic.clone(), config)
        .with_clock(FixedClock(today()));

    let first = HealthMonitor::new(&pipeline).check();
    assert_eq!(series.calls("VTI"), 1);
    assert_eq!(series.calls("MSFT"), 1);
    // One direct probe plus one risk-free chain call.
    assert_eq!(economic.calls("DGS3MO"), 2);

    let second = HealthMonitor::new(&pipeline).check();
    assert_eq!(series.calls("VTI"), 2);
    assert_eq!(series.calls("MSFT"), 2);
    assert_eq!(economic.calls("DGS3MO"), 4);
    assert_eq!(second.risk_free_rate, first.risk_free_rate);
    assert_eq!(second.market_data, first.market_data);

    // Checks still populate the cache for ordinary callers.
    let rate = pipeline.risk_free_rate().unwrap();
    assert!(rate.log.is_empty());
    assert_eq!(economic.calls("DGS3MO"), 4);
}
