//! Portfolio returns and correlation over accepted tables.
//!
//! Pure transforms: no fetching, no logging beyond warnings the caller can
//! also read from the returned value.

use crate::data::TimeSeriesTable;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

pub const WEIGHT_TOLERANCE: f64 = 1e-6;
pub const MIN_ALIGNED_ROWS: usize = 20;
pub const MIN_CORRELATION_OBSERVATIONS: usize = 30;
pub const EIGENVALUE_FLOOR: f64 = -1e-8;

const JACOBI_MAX_SWEEPS: usize = 100;
const JACOBI_TOLERANCE: f64 = 1e-22;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    #[error("portfolio has no holdings")]
    EmptyPortfolio,

    #[error("weights length ({weights}) doesn't match tickers ({tickers})")]
    WeightCountMismatch { weights: usize, tickers: usize },

    #[error("weights don't sum to 1.0: {sum}")]
    WeightsDoNotSumToOne { sum: f64 },

    #[error("weight for {0} is not finite")]
    NonFiniteWeight(String),

    #[error("{0} is listed more than once")]
    DuplicateTicker(String),

    #[error("no table for {0}")]
    MissingTicker(String),

    #[error("insufficient aligned data: {count} observations")]
    InsufficientAlignedData { count: usize },

    #[error("{labels} labels for {columns} columns")]
    LabelCountMismatch { labels: usize, columns: usize },

    #[error("column {label} has {actual} values, expected {expected}")]
    ColumnLengthMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Ordered holdings with weights summing to one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSpec {
    holdings: Vec<(String, f64)>,
}

impl PortfolioSpec {
    pub fn new(holdings: Vec<(String, f64)>) -> Result<Self, AnalyticsError> {
        if holdings.is_empty() {
            return Err(AnalyticsError::EmptyPortfolio);
        }
        if let Some((ticker, _)) = holdings.iter().find(|(_, w)| !w.is_finite()) {
            return Err(AnalyticsError::NonFiniteWeight(ticker.clone()));
        }
        let mut seen = BTreeSet::new();
        if let Some((ticker, _)) = holdings.iter().find(|(t, _)| !seen.insert(t.as_str())) {
            return Err(AnalyticsError::DuplicateTicker(ticker.clone()));
        }
        let sum: f64 = holdings.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(AnalyticsError::WeightsDoNotSumToOne { sum });
        }
        Ok(Self { holdings })
    }

    /// Pair tickers with weights positionally.
    pub fn from_parts(tickers: &[String], weights: &[f64]) -> Result<Self, AnalyticsError> {
        if tickers.len() != weights.len() {
            return Err(AnalyticsError::WeightCountMismatch {
                weights: weights.len(),
                tickers: tickers.len(),
            });
        }
        Self::new(tickers.iter().cloned().zip(weights.iter().copied()).collect())
    }

    pub fn equal_weight(tickers: &[String]) -> Result<Self, AnalyticsError> {
        if tickers.is_empty() {
            return Err(AnalyticsError::EmptyPortfolio);
        }
        let w = 1.0 / tickers.len() as f64;
        Self::new(tickers.iter().map(|t| (t.clone(), w)).collect())
    }

    pub fn tickers(&self) -> Vec<&str> {
        self.holdings.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.holdings.iter().map(|(_, w)| *w).collect()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioReturns {
    pub tickers: Vec<String>,
    pub weights: Vec<f64>,
    /// Date of each return row (the later date of each pair).
    pub dates: Vec<NaiveDate>,
    /// Per-ticker simple returns, outer index follows `tickers`.
    pub asset_returns: Vec<Vec<f64>>,
    pub portfolio: Vec<f64>,
}

/// Weighted daily returns over the dates every holding has a close for.
///
/// Without explicit holdings every table gets an equal weight. With one, it must name
/// exactly as many tickers as there are tables, each present in `tables`.
pub fn portfolio_returns(
    tables: &BTreeMap<String, TimeSeriesTable>,
    holdings: Option<&PortfolioSpec>,
) -> Result<PortfolioReturns, AnalyticsError> {
    let holdings = match holdings {
        Some(holdings) => {
            if holdings.len() != tables.len() {
                return Err(AnalyticsError::WeightCountMismatch {
                    weights: holdings.len(),
                    tickers: tables.len(),
                });
            }
            holdings.clone()
        }
        None => PortfolioSpec::equal_weight(&tables.keys().cloned().collect::<Vec<_>>())?,
    };

    let mut closes: Vec<BTreeMap<NaiveDate, f64>> = Vec::with_capacity(holdings.len());
    for ticker in holdings.tickers() {
        let table = tables
            .get(ticker)
            .ok_or_else(|| AnalyticsError::MissingTicker(ticker.to_string()))?;
        closes.push(table.dated_closes().into_iter().collect());
    }

    let dates = common_dates(&closes);
    if dates.len() < MIN_ALIGNED_ROWS {
        return Err(AnalyticsError::InsufficientAlignedData { count: dates.len() });
    }

    let asset_returns: Vec<Vec<f64>> = closes
        .iter()
        .map(|by_date| {
            let prices: Vec<f64> = dates.iter().map(|d| by_date[d]).collect();
            crate::data::simple_returns(&prices)
        })
        .collect();

    let weights = holdings.weights();
    let portfolio: Vec<f64> = (0..dates.len() - 1)
        .map(|row| {
            asset_returns
                .iter()
                .zip(&weights)
                .map(|(returns, w)| returns[row] * w)
                .sum::<f64>()
        })
        .collect();

    Ok(PortfolioReturns {
        tickers: holdings.tickers().into_iter().map(String::from).collect(),
        weights,
        dates: dates[1..].to_vec(),
        asset_returns,
        portfolio,
    })
}

fn common_dates(series: &[BTreeMap<NaiveDate, f64>]) -> Vec<NaiveDate> {
    let Some((first, rest)) = series.split_first() else {
        return Vec::new();
    };
    let mut dates: BTreeSet<NaiveDate> = first.keys().copied().collect();
    for other in rest {
        dates.retain(|d| other.contains_key(d));
    }
    dates.into_iter().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
    /// Rows where every column had a finite value.
    pub observations: usize,
    pub warnings: Vec<String>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == a)?;
        let j = self.labels.iter().position(|l| l == b)?;
        Some(self.values[i][j])
    }

    pub fn from_portfolio(returns: &PortfolioReturns) -> Result<Self, AnalyticsError> {
        correlation_matrix(&returns.tickers, &returns.asset_returns)
    }
}

/// Pearson correlation over the rows where every column is finite.
///
/// Undefined entries (constant columns, too few rows) become 0 with a
/// warning. Also warns on thin samples and on a matrix that is not positive
/// semi-definite.
pub fn correlation_matrix(
    labels: &[String],
    columns: &[Vec<f64>],
) -> Result<CorrelationMatrix, AnalyticsError> {
    if labels.len() != columns.len() {
        return Err(AnalyticsError::LabelCountMismatch {
            labels: labels.len(),
            columns: columns.len(),
        });
    }
    let len = columns.first().map_or(0, Vec::len);
    for (label, column) in labels.iter().zip(columns) {
        if column.len() != len {
            return Err(AnalyticsError::ColumnLengthMismatch {
                label: label.clone(),
                expected: len,
                actual: column.len(),
            });
        }
    }

    let complete: Vec<usize> = (0..len)
        .filter(|&row| columns.iter().all(|c| c[row].is_finite()))
        .collect();
    let data: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| complete.iter().map(|&row| c[row]).collect())
        .collect();

    let mut warnings = Vec::new();
    if complete.len() < MIN_CORRELATION_OBSERVATIONS {
        warnings.push(format!(
            "limited data for correlation ({} observations)",
            complete.len()
        ));
    }

    let n = columns.len();
    let mut values = vec![vec![0.0; n]; n];
    let mut undefined = false;
    for i in 0..n {
        for j in i..n {
            let r = pearson(&data[i], &data[j]);
            let r = if r.is_nan() {
                undefined = true;
                0.0
            } else {
                r
            };
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    if undefined {
        warnings.push("undefined correlations replaced with 0".to_string());
    }

    if n > 0 && !is_positive_semidefinite(&values) {
        warnings.push("correlation matrix is not positive semi-definite".to_string());
    }

    for w in &warnings {
        warn!(warning = %w, "correlation");
    }

    Ok(CorrelationMatrix {
        labels: labels.to_vec(),
        values,
        observations: complete.len(),
        warnings,
    })
}

/// NaN when either side is constant or there are fewer than two points.
fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

pub fn is_positive_semidefinite(matrix: &[Vec<f64>]) -> bool {
    symmetric_eigenvalues(matrix)
        .iter()
        .all(|&l| l >= EIGENVALUE_FLOOR)
}

/// Eigenvalues of a symmetric matrix by cyclic Jacobi rotation, unsorted.
pub fn symmetric_eigenvalues(matrix: &[Vec<f64>]) -> Vec<f64> {
    let n = matrix.len();
    let mut a = matrix.to_vec();

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < JACOBI_TOLERANCE {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                if a[p][q] == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let (kp, kq) = (row[p], row[q]);
                    row[p] = c * kp - s * kq;
                    row[q] = s * kp + c * kq;
                }
                for k in 0..n {
                    let (pk, qk) = (a[p][k], a[q][k]);
                    a[p][k] = c * pk - s * qk;
                    a[q][k] = s * pk + c * qk;
                }
            }
        }
    }

    (0..n).map(|i| a[i][i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn growing(n: usize, rate: f64) -> Vec<f64> {
        (0..n).map(|i| 100.0 * (1.0 + rate).powi(i as i32)).collect()
    }

    fn tables(entries: &[(&str, Vec<f64>)]) -> BTreeMap<String, TimeSeriesTable> {
        entries
            .iter()
            .map(|(t, closes)| (t.to_string(), TimeSeriesTable::from_closes(start(), closes)))
            .collect()
    }

    fn sorted(mut v: Vec<f64>) -> Vec<f64> {
        v.sort_by(|a, b| a.partial_cmp(b).unwrap());
        v
    }

    #[test]
    fn portfolio_weights_are_validated() {
        assert!(PortfolioSpec::new(vec![("A".into(), 0.5), ("B".into(), 0.5)]).is_ok());
        assert!(matches!(
            PortfolioSpec::new(vec![("A".into(), 0.5), ("B".into(), 0.4)]),
            Err(AnalyticsError::WeightsDoNotSumToOne { .. })
        ));
        assert_eq!(
            PortfolioSpec::from_parts(&["A".into()], &[0.5, 0.5]),
            Err(AnalyticsError::WeightCountMismatch {
                weights: 2,
                tickers: 1
            })
        );
        assert_eq!(PortfolioSpec::new(vec![]), Err(AnalyticsError::EmptyPortfolio));
        let thirds = PortfolioSpec::equal_weight(&["A".into(), "B".into(), "C".into()]).unwrap();
        assert_eq!(thirds.len(), 3);
    }

    #[test]
    fn duplicate_tickers_are_rejected() {
        assert_eq!(
            PortfolioSpec::new(vec![("AAA".into(), 0.5), ("AAA".into(), 0.5)]),
            Err(AnalyticsError::DuplicateTicker("AAA".into()))
        );
        assert_eq!(
            PortfolioSpec::from_parts(
                &["AAA".into(), "BBB".into(), "AAA".into()],
                &[0.2, 0.3, 0.5]
            ),
            Err(AnalyticsError::DuplicateTicker("AAA".into()))
        );
        assert_eq!(
            PortfolioSpec::equal_weight(&["AAA".into(), "AAA".into()]),
            Err(AnalyticsError::DuplicateTicker("AAA".into()))
        );
    }

    #[test]
    fn equal_weight_portfolio_averages_returns() {
        let t = tables(&[("A", growing(30, 0.01)), ("B", growing(30, 0.03))]);
        let result = portfolio_returns(&t, None).unwrap();
        assert_eq!(result.portfolio.len(), 29);
        assert_eq!(result.dates.len(), 29);
        for r in &result.portfolio {
            assert!((r - 0.02).abs() < 1e-12);
        }
    }

    #[test]
    fn explicit_weights_apply_in_holding_order() {
        let t = tables(&[("A", growing(25, 0.01)), ("B", growing(25, 0.03))]);
        let holdings = PortfolioSpec::new(vec![("B".into(), 0.25), ("A".into(), 0.75)]).unwrap();
        let result = portfolio_returns(&t, Some(&holdings)).unwrap();
        assert_eq!(result.tickers, vec!["B".to_string(), "A".to_string()]);
        assert!((result.portfolio[0] - (0.25 * 0.03 + 0.75 * 0.01)).abs() < 1e-12);
    }

    #[test]
    fn holdings_must_cover_every_table() {
        let t = tables(&[("A", growing(25, 0.01)), ("B", growing(25, 0.01))]);
        let holdings = PortfolioSpec::new(vec![("A".into(), 1.0)]).unwrap();
        assert!(matches!(
            portfolio_returns(&t, Some(&holdings)),
            Err(AnalyticsError::WeightCountMismatch { .. })
        ));

        let holdings = PortfolioSpec::new(vec![("A".into(), 0.5), ("Z".into(), 0.5)]).unwrap();
        assert_eq!(
            portfolio_returns(&t, Some(&holdings)),
            Err(AnalyticsError::MissingTicker("Z".into()))
        );
    }

    #[test]
    fn alignment_keeps_only_common_dates() {
        let mut t = tables(&[("A", growing(40, 0.01))]);
        // B starts 25 days later, leaving 15 common dates
        let b_start = start() + chrono::Duration::days(25);
        t.insert("B".into(), TimeSeriesTable::from_closes(b_start, &growing(40, 0.01)));
        assert_eq!(
            portfolio_returns(&t, None),
            Err(AnalyticsError::InsufficientAlignedData { count: 15 })
        );
    }

    #[test]
    fn perfectly_correlated_series() {
        let a = vec![0.01, -0.02, 0.03, 0.00, 0.015];
        let b: Vec<f64> = a.iter().map(|x| 2.0 * x + 0.001).collect();
        let m = correlation_matrix(&["A".into(), "B".into()], &[a, b]).unwrap();
        assert!((m.get("A", "B").unwrap() - 1.0).abs() < 1e-12);
        assert!((m.get("A", "A").unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(m.observations, 5);
        assert!(m.warnings.iter().any(|w| w.contains("limited data")));
    }

    #[test]
    fn constant_column_becomes_zero_with_warning() {
        let a: Vec<f64> = (0..40).map(|i| (i as f64).sin()).collect();
        let flat = vec![0.0; 40];
        let m = correlation_matrix(&["A".into(), "F".into()], &[a, flat]).unwrap();
        assert_eq!(m.get("A", "F"), Some(0.0));
        assert!(m
            .warnings
            .iter()
            .any(|w| w.contains("replaced with 0")));
    }

    #[test]
    fn rows_with_missing_values_are_excluded() {
        let a = vec![0.01, f64::NAN, 0.02, 0.03];
        let b = vec![0.02, 0.05, 0.04, 0.06];
        let m = correlation_matrix(&["A".into(), "B".into()], &[a, b]).unwrap();
        assert_eq!(m.observations, 3);
    }

    #[test]
    fn mismatched_inputs_rejected() {
        assert!(matches!(
            correlation_matrix(&["A".into()], &[]),
            Err(AnalyticsError::LabelCountMismatch { .. })
        ));
        assert!(matches!(
            correlation_matrix(&["A".into(), "B".into()], &[vec![1.0], vec![1.0, 2.0]]),
            Err(AnalyticsError::ColumnLengthMismatch { .. })
        ));
    }

    #[test]
    fn jacobi_eigenvalues_of_known_matrices() {
        let eig = sorted(symmetric_eigenvalues(&[vec![2.0, 1.0], vec![1.0, 2.0]]));
        assert!((eig[0] - 1.0).abs() < 1e-10);
        assert!((eig[1] - 3.0).abs() < 1e-10);

        let eig = sorted(symmetric_eigenvalues(&[
            vec![4.0, 1.0, 0.0],
            vec![1.0, 3.0, 1.0],
            vec![0.0, 1.0, 2.0],
        ]));
        let expected = [3.0 - 3f64.sqrt(), 3.0, 3.0 + 3f64.sqrt()];
        for (got, want) in eig.iter().zip(expected) {
            assert!((got - want).abs() < 1e-10, "{got} vs {want}");
        }
    }

    #[test]
    fn inconsistent_correlations_are_not_psd() {
        let m = vec![
            vec![1.0, 0.9, -0.9],
            vec![0.9, 1.0, 0.9],
            vec![-0.9, 0.9, 1.0],
        ];
        assert!(!is_positive_semidefinite(&m));
        assert!(is_positive_semidefinite(&[vec![1.0, 0.5], vec![0.5, 1.0]]));
    }
}
