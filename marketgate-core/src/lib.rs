//! marketgate core: resilient acquisition and validation of financial series.
//!
//! - Source clients for Yahoo Finance, FRED, Alpha Vantage and CSV directories
//! - Bounded retry around a single source call
//! - Data-quality gate with ordered hard checks and staleness warnings
//! - Ordered fallback chains for the risk-free rate and the market benchmark
//! - Acquisition pipeline with per-identifier isolation and an optional cache
//! - Health check over every acquisition path
//! - Portfolio returns and correlation over accepted tables

pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod fallback;
pub mod fetch;
pub mod health;
pub mod pipeline;
pub mod quality;
pub mod testing;

pub use analytics::{correlation_matrix, portfolio_returns, CorrelationMatrix, PortfolioSpec};
pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError};
pub use fallback::{FallbackChain, Resolved, SourceAttemptLog};
pub use fetch::RetryingFetcher;
pub use health::{HealthMonitor, HealthReport};
pub use pipeline::{AcquisitionPipeline, BatchFetch, FetchDiagnostics, FetchOutcome, Period};
pub use quality::{QualityGate, QualityVerdict, RejectReason};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the pipeline and everything it hands out can cross
    /// threads, so batches can fan out on the rayon pool.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<AcquisitionPipeline>();
        require_sync::<AcquisitionPipeline>();
        require_send::<data::TimeSeriesTable>();
        require_sync::<data::TimeSeriesTable>();
        require_send::<FetchOutcome>();
        require_sync::<FetchOutcome>();
        require_send::<PipelineError>();
        require_sync::<PipelineError>();
        require_send::<cache::ResponseCache>();
        require_sync::<cache::ResponseCache>();
        require_send::<testing::FakeSeriesSource>();
        require_sync::<testing::FakeSeriesSource>();
        require_send::<testing::FakeEconomicSource>();
        require_sync::<testing::FakeEconomicSource>();
    }

    /// Series sources are usable as trait objects.
    #[test]
    fn sources_are_object_safe() {
        fn _boxed(
            series: Box<dyn data::SeriesSource>,
            economic: Box<dyn data::EconomicDataSource>,
        ) -> (String, String) {
            (series.name().to_string(), economic.name().to_string())
        }
    }
}
