use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::IngestError;

/// Column holding values past the last header, joined with `,`.
pub const EXTRA_FIELDS_KEY: &str = "_extra";

/// One data row: `(column, value)` pairs in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when `column` is absent or blank.
    pub fn lacks(&self, column: &str) -> bool {
        self.get(column).map_or(true, |v| v.trim().is_empty())
    }
}

/// Parsed content of one file.
#[derive(Debug, Clone, Default)]
pub struct IngestedFile {
    /// Header names in file order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Rows missing the required field. They are kept in `rows`.
    pub missing_required: usize,
    /// Lowercase hex SHA-256 of the raw file bytes.
    pub digest: String,
}

impl IngestedFile {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parse CSV bytes with a header row into rows.
///
/// Zero data rows is not an error. A short row carries only the columns it
/// has; values past the last header go under [`EXTRA_FIELDS_KEY`]. Invalid
/// UTF-8 and other syntax failures are [`IngestError::Parse`].
pub fn parse_rows(data: &[u8]) -> Result<(Vec<String>, Vec<Row>), IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields: Vec<(String, String)> = columns
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();

        if record.len() != columns.len() {
            debug!(
                row = idx + 1,
                expected = columns.len(),
                found = record.len(),
                "ragged row"
            );
        }
        if record.len() > columns.len() {
            let extra: Vec<&str> = record.iter().skip(columns.len()).collect();
            fields.push((EXTRA_FIELDS_KEY.to_string(), extra.join(",")));
        }
        rows.push(Row { fields });
    }

    Ok((columns, rows))
}

/// Reads local files and checks each row for the required business key.
#[derive(Debug, Clone)]
pub struct RowIngestor {
    required_field: String,
}

impl RowIngestor {
    pub fn new(required_field: impl Into<String>) -> Self {
        Self {
            required_field: required_field.into(),
        }
    }

    pub fn required_field(&self) -> &str {
        &self.required_field
    }

    pub async fn ingest(&self, path: &Path) -> Result<IngestedFile, IngestError> {
        debug!(path = %path.display(), "reading CSV file");
        let data = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestError::NotFound(path.to_path_buf()),
            _ => IngestError::Io(e),
        })?;

        let digest = Sha256::digest(&data)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let (columns, rows) = parse_rows(&data)?;
        let missing_required = rows.iter().filter(|r| r.lacks(&self.required_field)).count();

        if missing_required > 0 {
            warn!(
                path = %path.display(),
                field = %self.required_field,
                rows = missing_required,
                "rows missing required field; publishing them unchanged"
            );
        }

        Ok(IngestedFile {
            columns,
            rows,
            missing_required,
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_csv(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir()
            .join(format!("enqueuer-ingest-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_rows_in_order() {
        let (columns, rows) = parse_rows(b"Email,Name\na@x.com,Ann\nb@x.com,Bob\n").unwrap();
        assert_eq!(columns, vec!["Email", "Name"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Email"), Some("a@x.com"));
        assert_eq!(rows[1].get("Name"), Some("Bob"));
        let pairs: Vec<_> = rows[1].iter().collect();
        assert_eq!(pairs, vec![("Email", "b@x.com"), ("Name", "Bob")]);
    }

    #[test]
    fn test_header_only_is_empty_not_error() {
        let (columns, rows) = parse_rows(b"Email\n").unwrap();
        assert_eq!(columns, vec!["Email"]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_empty_input_is_empty() {
        let (columns, rows) = parse_rows(b"").unwrap();
        assert!(columns.is_empty());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_quoted_fields() {
        let (_, rows) = parse_rows(b"Email,Note\na@x.com,\"hello, world\"\n").unwrap();
        assert_eq!(rows[0].get("Note"), Some("hello, world"));
    }

    #[test]
    fn test_short_row_keeps_present_columns() {
        let (_, rows) = parse_rows(b"Email,Name\na@x.com,Ann\nb@x.com\nc@x.com,Cy\n").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].get("Email"), Some("b@x.com"));
        assert_eq!(rows[1].get("Name"), None);
        assert_eq!(rows[1].len(), 1);
        assert_eq!(rows[2].get("Name"), Some("Cy"));
    }

    #[test]
    fn test_long_row_carries_extra_values() {
        let (_, rows) = parse_rows(b"Email,Name\na@x.com,Ann,x,y\n").unwrap();
        assert_eq!(rows[0].get("Name"), Some("Ann"));
        assert_eq!(rows[0].get(EXTRA_FIELDS_KEY), Some("x,y"));
    }

    #[test]
    fn test_short_row_without_required_field_counts_as_missing() {
        let (_, rows) = parse_rows(b"Name,Email\nAnn\nBob,b@x.com\n").unwrap();
        assert!(rows[0].lacks("Email"));
        assert!(!rows[1].lacks("Email"));
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let err = parse_rows(b"Email\n\xff\xfe\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }

    #[tokio::test]
    async fn test_ingest_counts_missing_required() {
        let path = temp_csv("Email,Name\na@x.com,Ann\n,Nobody\n");
        let file = RowIngestor::new("Email").ingest(&path).await.unwrap();
        assert_eq!(file.rows.len(), 2);
        assert_eq!(file.missing_required, 1);
        assert_eq!(file.digest.len(), 64);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_ingest_absent_column_counts_every_row() {
        let path = temp_csv("Name\nAnn\nBob\n");
        let file = RowIngestor::new("Email").ingest(&path).await.unwrap();
        assert_eq!(file.missing_required, 2);
        assert_eq!(file.rows.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_digest_depends_only_on_content() {
        let a = temp_csv("Email\na@x.com\n");
        let b = temp_csv("Email\na@x.com\n");
        let c = temp_csv("Email\nb@x.com\n");
        let ingestor = RowIngestor::new("Email");
        let da = ingestor.ingest(&a).await.unwrap().digest;
        assert_eq!(da, ingestor.ingest(&b).await.unwrap().digest);
        assert_ne!(da, ingestor.ingest(&c).await.unwrap().digest);
        for p in [a, b, c] {
            std::fs::remove_file(p).ok();
        }
    }

    #[tokio::test]
    async fn test_ingest_missing_file() {
        let path = std::env::temp_dir().join("enqueuer-ingest-definitely-missing.csv");
        let err = RowIngestor::new("Email").ingest(&path).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }
}
