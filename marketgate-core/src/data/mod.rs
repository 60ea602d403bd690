//! Data model and source clients

pub mod alpha_vantage;
pub mod csv_source;
pub mod fred;
pub mod source;
pub mod table;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageClient;
pub use csv_source::CsvSeriesSource;
pub use fred::FredClient;
pub use source::{
    first_valid, EconomicDataSource, ScalarObservation, SeriesSource, SourceError,
    MISSING_SENTINEL,
};
pub use table::{simple_returns, Field, Row, TableError, TimeSeriesTable};
pub use yahoo::YahooClient;
