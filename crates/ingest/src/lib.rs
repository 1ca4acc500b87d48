//! Row ingestion: turn a local CSV file into an ordered sequence of rows.

pub mod error;
pub mod rows;

pub use error::IngestError;
pub use rows::{parse_rows, IngestedFile, Row, RowIngestor, EXTRA_FIELDS_KEY};
