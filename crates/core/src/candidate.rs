//! Objects discovered under the watched storage prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One listing entry from the object store.
///
/// Equality covers every field, so a re-uploaded object under the same key
/// (new size, timestamp or e-tag) is a different candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateFile {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: usize,
    pub e_tag: Option<String>,
}

impl CandidateFile {
    /// Final path segment of the key (`validation/in-progress/a.csv` -> `a.csv`).
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Key with `from_prefix` swapped for `to_prefix`, or `None` if the key
    /// does not live under `from_prefix`.
    pub fn relocated_key(&self, from_prefix: &str, to_prefix: &str) -> Option<String> {
        self.key
            .strip_prefix(from_prefix)
            .map(|rest| format!("{to_prefix}{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(key: &str) -> CandidateFile {
        CandidateFile {
            key: key.to_string(),
            last_modified: Utc::now(),
            size: 10,
            e_tag: None,
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(candidate("validation/in-progress/batch1.csv").file_name(), "batch1.csv");
        assert_eq!(candidate("batch1.csv").file_name(), "batch1.csv");
    }

    #[test]
    fn test_relocated_key() {
        let c = candidate("validation/in-progress/batch1.csv");
        assert_eq!(
            c.relocated_key("validation/in-progress/", "validation/queued/").as_deref(),
            Some("validation/queued/batch1.csv")
        );
        assert_eq!(c.relocated_key("other/", "validation/queued/"), None);
    }
}
