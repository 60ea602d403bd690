//! Data-quality gate for fetched series.
//!
//! Hard checks run in a fixed order and the first failure rejects:
//! 1. empty table
//! 2. fewer than 20 rows
//! 3. more than 10% of cells missing
//! 4. closes: none valid, any non-positive, or more than 2% of daily moves
//!    beyond +/-50%
//!
//! Staleness beyond 10 days is a warning only. The extreme-move rule is a
//! circuit breaker against corrupted feeds; the thresholds are heuristics kept
//! for compatibility.

use crate::clock::{Clock, SystemClock};
use crate::data::{Field, TimeSeriesTable};
use crate::error::ErrorKind;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const MIN_OBSERVATIONS: usize = crate::fetch::MIN_OBSERVATIONS;
pub const MAX_MISSING_FRACTION: f64 = 0.10;
pub const EXTREME_MOVE: f64 = 0.50;
pub const MAX_EXTREME_MOVE_FRACTION: f64 = 0.02;
pub const STALENESS_WARN_DAYS: i64 = 10;

/// Why the gate refused a series.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum RejectReason {
    #[error("no data")]
    NoData,

    #[error("insufficient observations ({count})")]
    InsufficientObservations { count: usize },

    #[error("excessive missing data ({:.1}%)", .fraction * 100.0)]
    ExcessiveMissingData { fraction: f64 },

    #[error("no valid closing prices")]
    NoValidClosingPrices,

    #[error("invalid non-positive price ({count} closes <= 0)")]
    InvalidPrice { count: usize },

    #[error("suspicious extreme-move pattern ({extreme_moves} of {moves} daily moves beyond 50%)")]
    SuspiciousVolatilityPattern { extreme_moves: usize, moves: usize },
}

impl RejectReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RejectReason::NoData => ErrorKind::EmptyResult,
            RejectReason::InsufficientObservations { .. } => ErrorKind::InsufficientObservations,
            RejectReason::ExcessiveMissingData { .. } => ErrorKind::ExcessiveMissingData,
            RejectReason::NoValidClosingPrices | RejectReason::InvalidPrice { .. } => {
                ErrorKind::InvalidPrice
            }
            RejectReason::SuspiciousVolatilityPattern { .. } => {
                ErrorKind::SuspiciousVolatilityPattern
            }
        }
    }
}

/// Outcome of validating one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityVerdict {
    pub identifier: String,
    pub rejection: Option<RejectReason>,
    pub warnings: Vec<String>,
}

impl QualityVerdict {
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Stateless validator; the same table always yields the same verdict for a
/// given reference date.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate;

impl QualityGate {
    pub fn new() -> Self {
        Self
    }

    /// Validate against the host's current date.
    pub fn validate(&self, table: &TimeSeriesTable, identifier: &str) -> QualityVerdict {
        self.validate_as_of(table, identifier, SystemClock.today())
    }

    pub fn validate_as_of(
        &self,
        table: &TimeSeriesTable,
        identifier: &str,
        today: NaiveDate,
    ) -> QualityVerdict {
        let rejection = Self::hard_checks(table);
        if let Some(reason) = &rejection {
            warn!(identifier, %reason, "quality gate rejected series");
            return QualityVerdict {
                identifier: identifier.to_string(),
                rejection,
                warnings: Vec::new(),
            };
        }

        let mut warnings = Vec::new();
        if let Some(age) = table.age_days(today) {
            if age > STALENESS_WARN_DAYS {
                warn!(identifier, age_days = age, "stale data");
                warnings.push(format!("{identifier}: stale data ({age} days old)"));
            }
        }

        debug!(identifier, rows = table.len(), "quality gate accepted series");
        QualityVerdict {
            identifier: identifier.to_string(),
            rejection: None,
            warnings,
        }
    }

    fn hard_checks(table: &TimeSeriesTable) -> Option<RejectReason> {
        if table.is_empty() {
            return Some(RejectReason::NoData);
        }

        if table.len() < MIN_OBSERVATIONS {
            return Some(RejectReason::InsufficientObservations { count: table.len() });
        }

        let fraction = table.missing_fraction();
        if fraction > MAX_MISSING_FRACTION {
            return Some(RejectReason::ExcessiveMissingData { fraction });
        }

        if table.has_field(Field::Close) {
            let closes = table.closes();
            if closes.is_empty() {
                return Some(RejectReason::NoValidClosingPrices);
            }

            let non_positive = closes.iter().filter(|c| **c <= 0.0).count();
            if non_positive > 0 {
                return Some(RejectReason::InvalidPrice {
                    count: non_positive,
                });
            }

            let moves = table.close_returns();
            let extreme_moves = moves.iter().filter(|r| r.abs() > EXTREME_MOVE).count();
            if extreme_moves as f64 > moves.len() as f64 * MAX_EXTREME_MOVE_FRACTION {
                return Some(RejectReason::SuspiciousVolatilityPattern {
                    extreme_moves,
                    moves: moves.len(),
                });
            }
        }

        None
    }
}
