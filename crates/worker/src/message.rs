//! Queue naming and the per-row message envelope.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use enqueuer_core::config::MessageIdScheme;
use enqueuer_ingest::Row;
use enqueuer_queue::MessageHeaders;

/// Characters of the content digest used in stable message IDs.
const ATTEMPT_ID_LEN: usize = 12;

/// Queue for a file: `{prefix}_{filename}` with `. / space -` mapped to `_`,
/// lowercased. Pure: the same filename always maps to the same queue.
pub fn queue_name_for(prefix: &str, filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '.' | '/' | ' ' | '-' => '_',
            other => other,
        })
        .collect();
    format!("{}_{}", prefix, safe.to_lowercase())
}

/// Builds message IDs for one file.
#[derive(Debug, Clone)]
pub struct MessageIdStrategy {
    scheme: MessageIdScheme,
    filename: String,
    attempt: String,
}

impl MessageIdStrategy {
    /// `digest` is the hex content digest of the file being published.
    pub fn new(scheme: MessageIdScheme, filename: &str, digest: &str) -> Self {
        Self {
            scheme,
            filename: filename.to_string(),
            attempt: digest.chars().take(ATTEMPT_ID_LEN).collect(),
        }
    }

    pub fn message_id(&self, row_number: u64) -> String {
        match self.scheme {
            MessageIdScheme::Stable => {
                format!("{}_row_{}_{}", self.filename, row_number, self.attempt)
            }
            MessageIdScheme::Timestamped => format!(
                "{}_row_{}_{}",
                self.filename,
                row_number,
                Utc::now().timestamp_millis()
            ),
        }
    }
}

/// File-level values shared by every row message of one publish run.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub filename: &'a str,
    pub filepath: &'a str,
    pub queue_name: &'a str,
    pub total_rows: u64,
}

impl Envelope<'_> {
    /// JSON body for one row. Row columns are copied verbatim; envelope
    /// fields win on a name clash.
    pub fn body(&self, message_id: &str, row_number: u64, row: &Row) -> Value {
        let mut obj = Map::new();
        for (column, value) in row.iter() {
            obj.insert(column.to_string(), Value::String(value.to_string()));
        }
        obj.insert("messageId".into(), Value::from(message_id));
        obj.insert("filename".into(), Value::from(self.filename));
        obj.insert("filepath".into(), Value::from(self.filepath));
        obj.insert("rowNumber".into(), Value::from(row_number));
        obj.insert("totalRows".into(), Value::from(self.total_rows));
        obj.insert("queueName".into(), Value::from(self.queue_name));
        obj.insert(
            "processedAt".into(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        Value::Object(obj)
    }

    pub fn headers(&self, row_number: u64) -> MessageHeaders {
        MessageHeaders {
            filename: self.filename.to_string(),
            row_number,
            total_rows: self.total_rows,
        }
    }
}
