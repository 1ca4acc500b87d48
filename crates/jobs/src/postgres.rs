//! PostgreSQL-backed job store.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use enqueuer_core::config::PostgresConfig;
use enqueuer_core::JobStatus;

use crate::error::JobStoreError;
use crate::store::JobStore;

/// Where job records live. Names are interpolated into SQL, so they are
/// validated as plain identifiers up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    table: String,
    key_column: String,
    status_column: String,
}

fn check_identifier(name: &str) -> Result<String, JobStoreError> {
    let mut parts = name.split('.');
    let valid = parts.clone().count() <= 2
        && parts.all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(name.to_string())
    } else {
        Err(JobStoreError::InvalidIdentifier(name.to_string()))
    }
}

impl TableLayout {
    pub fn new(table: &str, key_column: &str, status_column: &str) -> Result<Self, JobStoreError> {
        Ok(Self {
            table: check_identifier(table)?,
            key_column: check_identifier(key_column)?,
            status_column: check_identifier(status_column)?,
        })
    }

    pub fn from_config(cfg: &PostgresConfig) -> Result<Self, JobStoreError> {
        Self::new(&cfg.jobs_table, &cfg.key_column, &cfg.status_column)
    }

    fn exists_sql(&self) -> String {
        format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1)",
            self.table, self.key_column
        )
    }

    fn select_status_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = $1 LIMIT 1",
            self.status_column, self.table, self.key_column
        )
    }

    fn update_status_sql(&self) -> String {
        format!(
            "UPDATE {} SET {} = $2 WHERE {} = $1",
            self.table, self.status_column, self.key_column
        )
    }
}

pub struct PgJobStore {
    pool: PgPool,
    layout: TableLayout,
}

impl PgJobStore {
    pub fn new(pool: PgPool, layout: TableLayout) -> Self {
        Self { pool, layout }
    }

    /// Open a pool from config.
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self, JobStoreError> {
        let layout = TableLayout::from_config(cfg)?;
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.connection_string())
            .await?;
        info!(table = %layout.table, "job store connected");
        Ok(Self::new(pool, layout))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn has_record(&self, key: &str) -> Result<bool, JobStoreError> {
        let exists: bool = sqlx::query_scalar(&self.layout.exists_sql())
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn get_status(&self, key: &str) -> Result<Option<JobStatus>, JobStoreError> {
        let status: Option<Option<String>> = sqlx::query_scalar(&self.layout.select_status_sql())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        // A NULL status column reads as `unknown`.
        Ok(status.map(|s| s.map(JobStatus::from).unwrap_or(JobStatus::Unknown)))
    }

    async fn set_status(&self, key: &str, status: &JobStatus) -> Result<(), JobStoreError> {
        let result = sqlx::query(&self.layout.update_status_sql())
            .bind(key)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::MissingRecord(key.to_string()));
        }
        debug!(key, status = %status, "job status updated");
        Ok(())
    }
}
