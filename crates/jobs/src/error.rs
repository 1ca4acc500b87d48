use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("no job record for {0}")]
    MissingRecord(String),
}
