//! Offline series source backed by a directory of CSV files.
//!
//! Layout: `{dir}/{IDENTIFIER}.csv` with a header row. `date` and `close` are
//! required; `open`, `high`, `low` and `volume` are optional columns, and the
//! table carries exactly the columns the file has. Empty cells are missing.

use super::source::{SeriesSource, SourceError};
use super::table::{Field, Row, TimeSeriesTable};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CsvRecord {
    date: NaiveDate,
    #[serde(default)]
    open: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default)]
    low: Option<f64>,
    #[serde(default)]
    close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

impl CsvRecord {
    fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Open => self.open,
            Field::High => self.high,
            Field::Low => self.low,
            Field::Close => self.close,
            Field::Volume => self.volume,
        }
    }
}

pub struct CsvSeriesSource {
    dir: PathBuf,
}

impl CsvSeriesSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.csv"))
    }

    fn read_table(path: &Path) -> Result<TimeSeriesTable, SourceError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| SourceError::Transport(format!("open {}: {e}", path.display())))?;

        let headers = reader
            .headers()
            .map_err(|e| SourceError::ResponseFormatChanged(format!("read header: {e}")))?
            .clone();
        if !headers.iter().any(|h| h == "date") || !headers.iter().any(|h| h == "close") {
            return Err(SourceError::ResponseFormatChanged(format!(
                "{} must have 'date' and 'close' columns",
                path.display()
            )));
        }
        let fields: Vec<Field> = Field::OHLCV
            .into_iter()
            .filter(|f| headers.iter().any(|h| h == f.as_str()))
            .collect();

        let mut rows = Vec::new();
        for record in reader.deserialize::<CsvRecord>() {
            let record = record.map_err(|e| {
                SourceError::ResponseFormatChanged(format!("{}: {e}", path.display()))
            })?;
            let values = fields.iter().map(|f| record.get(*f)).collect();
            rows.push(Row::new(record.date, values));
        }

        TimeSeriesTable::from_unsorted(fields, rows)
            .map_err(|e| SourceError::ResponseFormatChanged(e.to_string()))
    }
}

impl SeriesSource for CsvSeriesSource {
    fn name(&self) -> &str {
        "csv_import"
    }

    fn fetch(
        &self,
        identifier: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeriesTable, SourceError> {
        let path = self.file_path(identifier);
        if !path.exists() {
            return Err(SourceError::SymbolNotFound {
                symbol: identifier.to_string(),
            });
        }

        let table = Self::read_table(&path)?.restrict(start, end);
        if table.is_empty() {
            return Err(SourceError::EmptyResult {
                identifier: identifier.to_string(),
            });
        }
        Ok(table)
    }
}
