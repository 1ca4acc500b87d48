//! Job lifecycle states stored in the external status store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a job record, keyed by the file's storage key.
///
/// Only `FileAccepted -> FileQueued` is ever written by this service; every
/// other value is read-only and kept verbatim in [`JobStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum JobStatus {
    Unknown,
    FileAccepted,
    FileQueued,
    /// A downstream state this service does not interpret.
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Unknown => "unknown",
            JobStatus::FileAccepted => "file_accepted",
            JobStatus::FileQueued => "file_queued",
            JobStatus::Other(s) => s,
        }
    }
}

impl FromStr for JobStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unknown" => JobStatus::Unknown,
            "file_accepted" => JobStatus::FileAccepted,
            "file_queued" => JobStatus::FileQueued,
            _ => JobStatus::Other(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_statuses_parse() {
        assert_eq!("file_accepted".parse::<JobStatus>().unwrap(), JobStatus::FileAccepted);
        assert_eq!("file_queued".parse::<JobStatus>().unwrap(), JobStatus::FileQueued);
        assert_eq!("unknown".parse::<JobStatus>().unwrap(), JobStatus::Unknown);
    }

    #[test]
    fn test_downstream_status_kept_verbatim() {
        let status: JobStatus = "validation_done".parse().unwrap();
        assert_eq!(status, JobStatus::Other("validation_done".into()));
        assert_eq!(status.to_string(), "validation_done");
    }

    #[test]
    fn test_status_match_is_exact() {
        // Case and whitespace variants are not the accepted state.
        assert_ne!(JobStatus::from("File_Accepted".to_string()), JobStatus::FileAccepted);
        assert_ne!(JobStatus::from("file_accepted ".to_string()), JobStatus::FileAccepted);
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&JobStatus::FileQueued).unwrap();
        assert_eq!(json, "\"file_queued\"");
        let back: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobStatus::FileQueued);
    }
}
