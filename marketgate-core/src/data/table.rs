//! Time-indexed tables of daily observations.
//!
//! A `TimeSeriesTable` declares which fields it carries and holds one row per
//! date, sorted ascending with no duplicate dates. Missing cells are `None`;
//! NaN values coming from a provider are normalised to `None` on construction
//! so every consumer sees one notion of "missing".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A numeric column a table may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    /// The full daily bar layout, in provider order.
    pub const OHLCV: [Field; 5] = [
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dated row. `values` is parallel to the owning table's `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

impl Row {
    pub fn new(date: NaiveDate, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect();
        Self { date, values }
    }

    /// True when no cell in the row is missing.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Structural problems detected while building a table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("row for {date} has {actual} values, expected {expected}")]
    RowWidth {
        date: NaiveDate,
        expected: usize,
        actual: usize,
    },

    #[error("rows not strictly increasing: {previous} followed by {next}")]
    OutOfOrder { previous: NaiveDate, next: NaiveDate },

    #[error("field '{0}' declared twice")]
    DuplicateField(Field),
}

/// Ordered, date-keyed table of numeric observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesTable {
    fields: Vec<Field>,
    rows: Vec<Row>,
}

impl TimeSeriesTable {
    /// Build a table from rows that are already strictly increasing by date.
    pub fn new(fields: Vec<Field>, rows: Vec<Row>) -> Result<Self, TableError> {
        check_fields(&fields)?;
        check_widths(fields.len(), &rows)?;
        for pair in rows.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(TableError::OutOfOrder {
                    previous: pair[0].date,
                    next: pair[1].date,
                });
            }
        }
        Ok(Self { fields, rows })
    }

    /// Build a table from provider rows in any order.
    ///
    /// Rows are sorted by date; when a date repeats, the last row seen wins.
    pub fn from_unsorted(fields: Vec<Field>, mut rows: Vec<Row>) -> Result<Self, TableError> {
        check_fields(&fields)?;
        check_widths(fields.len(), &rows)?;
        rows.sort_by_key(|r| r.date);

        let mut deduped: Vec<Row> = Vec::with_capacity(rows.len());
        for row in rows {
            match deduped.last_mut() {
                Some(last) if last.date == row.date => *last = row,
                _ => deduped.push(row),
            }
        }
        Ok(Self {
            fields,
            rows: deduped,
        })
    }

    /// A table with the given layout and no rows.
    pub fn empty(fields: Vec<Field>) -> Self {
        Self {
            fields,
            rows: Vec::new(),
        }
    }

    /// Close-only table with one row per consecutive calendar day from `start`.
    pub fn from_closes(start: NaiveDate, closes: &[f64]) -> Self {
        let rows = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Row::new(start + chrono::Duration::days(i as i64), vec![Some(c)]))
            .collect();
        Self {
            fields: vec![Field::Close],
            rows,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    fn field_index(&self, field: Field) -> Option<usize> {
        self.fields.iter().position(|f| *f == field)
    }

    /// Value of `field` in row `row`, `None` when missing or absent.
    pub fn value(&self, row: usize, field: Field) -> Option<f64> {
        let idx = self.field_index(field)?;
        self.rows.get(row).and_then(|r| r.values[idx])
    }

    /// Full column for `field`, or `None` if the table does not carry it.
    pub fn column(&self, field: Field) -> Option<Vec<Option<f64>>> {
        let idx = self.field_index(field)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Non-missing closes paired with their dates, in date order.
    pub fn dated_closes(&self) -> Vec<(NaiveDate, f64)> {
        match self.field_index(Field::Close) {
            Some(idx) => self
                .rows
                .iter()
                .filter_map(|r| r.values[idx].map(|c| (r.date, c)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Non-missing closes in date order.
    pub fn closes(&self) -> Vec<f64> {
        self.dated_closes().into_iter().map(|(_, c)| c).collect()
    }

    /// Day-over-day simple returns of the non-missing closes.
    pub fn close_returns(&self) -> Vec<f64> {
        simple_returns(&self.closes())
    }

    /// Copy of the table without any row that has a missing cell.
    pub fn drop_incomplete_rows(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| r.is_complete())
                .cloned()
                .collect(),
        }
    }

    /// Missing cells over all cells (rows x fields); zero for an empty table.
    pub fn missing_fraction(&self) -> f64 {
        let cells = self.rows.len() * self.fields.len();
        if cells == 0 {
            return 0.0;
        }
        let missing: usize = self.rows.iter().map(Row::missing_count).sum();
        missing as f64 / cells as f64
    }

    /// Days between the last row and `today`.
    pub fn age_days(&self, today: NaiveDate) -> Option<i64> {
        self.last_date().map(|d| (today - d).num_days())
    }

    /// Rows with `start <= date <= end`.
    pub fn restrict(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            fields: self.fields.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| r.date >= start && r.date <= end)
                .cloned()
                .collect(),
        }
    }
}

/// Simple returns `p[i] / p[i-1] - 1`; one shorter than the input.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

fn check_fields(fields: &[Field]) -> Result<(), TableError> {
    for (i, f) in fields.iter().enumerate() {
        if fields[..i].contains(f) {
            return Err(TableError::DuplicateField(*f));
        }
    }
    Ok(())
}

fn check_widths(expected: usize, rows: &[Row]) -> Result<(), TableError> {
    match rows.iter().find(|r| r.values.len() != expected) {
        Some(r) => Err(TableError::RowWidth {
            date: r.date,
            expected,
            actual: r.values.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ohlc_row(date: &str, close: Option<f64>) -> Row {
        Row::new(d(date), vec![Some(1.0), Some(2.0), Some(0.5), close])
    }

    const OHLC: [Field; 4] = [Field::Open, Field::High, Field::Low, Field::Close];

    #[test]
    fn new_rejects_out_of_order_rows() {
        let rows = vec![ohlc_row("2024-01-03", Some(1.0)), ohlc_row("2024-01-02", Some(1.0))];
        let err = TimeSeriesTable::new(OHLC.to_vec(), rows).unwrap_err();
        assert!(matches!(err, TableError::OutOfOrder { .. }));
    }

    #[test]
    fn new_rejects_duplicate_dates() {
        let rows = vec![ohlc_row("2024-01-02", Some(1.0)), ohlc_row("2024-01-02", Some(2.0))];
        assert!(TimeSeriesTable::new(OHLC.to_vec(), rows).is_err());
    }

    #[test]
    fn new_rejects_ragged_rows() {
        let rows = vec![Row::new(d("2024-01-02"), vec![Some(1.0)])];
        let err = TimeSeriesTable::new(OHLC.to_vec(), rows).unwrap_err();
        assert_eq!(
            err,
            TableError::RowWidth {
                date: d("2024-01-02"),
                expected: 4,
                actual: 1
            }
        );
    }

    #[test]
    fn from_unsorted_sorts_and_keeps_last_duplicate() {
        let rows = vec![
            ohlc_row("2024-01-04", Some(4.0)),
            ohlc_row("2024-01-02", Some(2.0)),
            ohlc_row("2024-01-04", Some(5.0)),
        ];
        let table = TimeSeriesTable::from_unsorted(OHLC.to_vec(), rows).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.closes(), vec![2.0, 5.0]);
    }

    #[test]
    fn nan_is_treated_as_missing() {
        let row = Row::new(d("2024-01-02"), vec![Some(f64::NAN), Some(1.0)]);
        assert_eq!(row.missing_count(), 1);
        assert!(!row.is_complete());
    }

    #[test]
    fn missing_fraction_counts_all_cells() {
        let rows = vec![
            ohlc_row("2024-01-02", None),
            ohlc_row("2024-01-03", Some(1.0)),
        ];
        let table = TimeSeriesTable::new(OHLC.to_vec(), rows).unwrap();
        assert!((table.missing_fraction() - 1.0 / 8.0).abs() < 1e-12);
        assert_eq!(table.drop_incomplete_rows().len(), 1);
    }

    #[test]
    fn empty_table_is_valid_and_has_no_missing_cells() {
        let table = TimeSeriesTable::empty(OHLC.to_vec());
        assert!(table.is_empty());
        assert_eq!(table.missing_fraction(), 0.0);
        assert_eq!(table.last_date(), None);
    }

    #[test]
    fn close_returns_skip_missing_closes() {
        let rows = vec![
            ohlc_row("2024-01-02", Some(100.0)),
            ohlc_row("2024-01-03", None),
            ohlc_row("2024-01-04", Some(110.0)),
        ];
        let table = TimeSeriesTable::new(OHLC.to_vec(), rows).unwrap();
        let returns = table.close_returns();
        assert_eq!(returns.len(), 1);
        assert!((returns[0] - 0.10).abs() < 1e-12);
    }

    #[test]
    fn age_and_restrict() {
        let table = TimeSeriesTable::from_closes(d("2024-01-01"), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.age_days(d("2024-01-14")), Some(10));
        let window = table.restrict(d("2024-01-02"), d("2024-01-03"));
        assert_eq!(window.closes(), vec![2.0, 3.0]);
    }

    #[test]
    fn column_absent_field_is_none() {
        let table = TimeSeriesTable::from_closes(d("2024-01-01"), &[1.0]);
        assert!(table.column(Field::Volume).is_none());
        assert_eq!(table.column(Field::Close), Some(vec![Some(1.0)]));
    }
}
