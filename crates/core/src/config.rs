use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EnqueuerError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// First of several alias keys that is set.
fn profiled_env_any(profile: &str, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| profiled_env_opt(profile, k))
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Ensure a storage prefix ends with exactly one `/`.
fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_matches('/'))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub postgres: PostgresConfig,
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ENQUEUER_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("ENQUEUER_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            broker: BrokerConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), EnqueuerError> {
        if self.worker.polling_interval_secs == 0 {
            return Err(EnqueuerError::Config("POLLING_INTERVAL must be > 0".into()));
        }
        if self.worker.concurrency == 0 {
            return Err(EnqueuerError::Config("WORKER_CONCURRENCY must be > 0".into()));
        }
        if self.broker.connect_attempts == 0 {
            return Err(EnqueuerError::Config("BROKER_CONNECT_ATTEMPTS must be > 0".into()));
        }
        if self.storage.in_progress_prefix == self.storage.queued_prefix {
            return Err(EnqueuerError::Config(format!(
                "IN_PROGRESS_PREFIX and QUEUED_PREFIX must differ (both '{}')",
                self.storage.in_progress_prefix
            )));
        }
        if self.broker.provider == BrokerProvider::Sqs && self.aws.region.is_empty() {
            return Err(EnqueuerError::Config("SQS broker requires AWS_REGION".into()));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  storage:     bucket={}, in_progress={}, queued={}, download_dir={}",
            self.aws.s3_bucket.as_deref().unwrap_or("(local)"),
            self.storage.in_progress_prefix,
            self.storage.queued_prefix,
            self.storage.download_dir.display()
        );
        tracing::info!("  postgres:    {}", self.postgres.redacted_target());
        tracing::info!(
            "  broker:      provider={}, host={}:{}, vhost={}, prefix={}",
            self.broker.provider,
            self.broker.host,
            self.broker.port,
            self.broker.vhost,
            self.broker.queue_prefix
        );
        tracing::info!(
            "  worker:      interval={}s, concurrency={}, paused={}, dedup={}, transition_on_error={}, ids={}",
            self.worker.polling_interval_secs,
            self.worker.concurrency,
            self.worker.paused,
            self.worker.dedup_enabled,
            self.worker.transition_on_error,
            self.worker.message_id_scheme
        );
        tracing::info!(
            "  heartbeat:   {}",
            if self.worker.uptime_monitor.is_some() { "configured" } else { "(none)" }
        );
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object-store backend (used without S3).
    pub local_dir: PathBuf,
    /// Watched prefix; accepted files land here.
    pub in_progress_prefix: String,
    /// Destination prefix after a publish attempt.
    pub queued_prefix: String,
    /// Where downloaded files are staged before publishing.
    pub download_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            local_dir: PathBuf::from(profiled_env_or(p, "LOCAL_STORAGE_DIR", "data/bucket")),
            in_progress_prefix: normalize_prefix(&profiled_env_or(
                p,
                "IN_PROGRESS_PREFIX",
                "validation/in-progress/",
            )),
            queued_prefix: normalize_prefix(&profiled_env_or(
                p,
                "QUEUED_PREFIX",
                "validation/queued/",
            )),
            download_dir: PathBuf::from(profiled_env_or(p, "DOWNLOAD_DIR", "tmp")),
        }
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub endpoint_url: Option<String>,
    /// Endpoint override for SQS only (S3 endpoints must not leak into SQS).
    pub queue_endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_any(p, &["AWS_ACCESS_KEY_ID", "S3_KEY"]),
            secret_access_key: profiled_env_any(p, &["AWS_SECRET_ACCESS_KEY", "S3_SECRET"]),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            s3_bucket: profiled_env_any(p, &["S3_BUCKET", "S3_BUCKET_NAME"]),
            endpoint_url: profiled_env_any(p, &["S3_ENDPOINT", "AWS_ENDPOINT_URL"]),
            queue_endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }

    /// True when S3 should back the object store instead of the local directory.
    pub fn is_configured(&self) -> bool {
        self.s3_bucket.is_some()
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; overrides the individual fields when set.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub jobs_table: String,
    pub key_column: String,
    pub status_column: String,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_any(p, &["DATABASE_URL", "DATABASE_CONNECTION_STRING"]),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "enqueuer"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 5),
            jobs_table: profiled_env_or(p, "JOBS_TABLE", "jobs"),
            key_column: profiled_env_or(p, "JOBS_KEY_COLUMN", "file_key"),
            status_column: profiled_env_or(p, "JOBS_STATUS_COLUMN", "status"),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn redacted_target(&self) -> String {
        if self.url.is_some() {
            format!("url=(set), table={}", self.jobs_table)
        } else {
            format!("host={}, db={}, table={}", self.host, self.database, self.jobs_table)
        }
    }
}

// ── Broker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProvider {
    Amqp,
    Sqs,
    Memory,
}

impl BrokerProvider {
    fn parse(v: &str) -> Option<Self> {
        match v.trim().to_ascii_lowercase().as_str() {
            "amqp" | "rabbitmq" => Some(Self::Amqp),
            "sqs" => Some(Self::Sqs),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl std::fmt::Display for BrokerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Amqp => "amqp",
            Self::Sqs => "sqs",
            Self::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub provider: BrokerProvider,
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub heartbeat_secs: u16,
    /// Namespace token prepended to every per-file queue name.
    pub queue_prefix: String,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
}

impl BrokerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_opt(p, "BROKER_PROVIDER")
                .and_then(|v| BrokerProvider::parse(&v))
                .unwrap_or(BrokerProvider::Amqp),
            host: profiled_env_or(p, "RABBITMQ_HOST", "localhost"),
            port: profiled_env_u16(p, "RABBITMQ_PORT", 5672),
            vhost: profiled_env_or(p, "RABBITMQ_VHOST", "/"),
            username: profiled_env_or(p, "RABBITMQ_USERNAME", "guest"),
            password: profiled_env_or(p, "RABBITMQ_PASSWORD", "guest"),
            heartbeat_secs: profiled_env_u16(p, "RABBITMQ_HEARTBEAT_SECS", 600),
            queue_prefix: profiled_env_or(p, "QUEUE_PREFIX", "batch_validation"),
            connect_attempts: profiled_env_u32(p, "BROKER_CONNECT_ATTEMPTS", 5),
            connect_delay_secs: profiled_env_u64(p, "BROKER_CONNECT_DELAY_SECS", 5),
        }
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_secs(self.connect_delay_secs)
    }
}

// ── Worker ────────────────────────────────────────────────────

/// How row message identifiers are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageIdScheme {
    /// `{filename}_row_{n}_{attempt}`; attempt is a digest of the stored object.
    Stable,
    /// `{filename}_row_{n}_{epoch_millis}`.
    Timestamped,
}

impl MessageIdScheme {
    fn parse(v: &str) -> Option<Self> {
        match v.trim().to_ascii_lowercase().as_str() {
            "stable" => Some(Self::Stable),
            "timestamped" => Some(Self::Timestamped),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageIdScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::Timestamped => "timestamped",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub polling_interval_secs: u64,
    pub paused: bool,
    pub concurrency: usize,
    pub dedup_enabled: bool,
    /// Mark and relocate files whose publish ended in `error` too.
    pub transition_on_error: bool,
    pub message_id_scheme: MessageIdScheme,
    /// Column every row is expected to carry (the row's business key).
    pub required_field: String,
    pub uptime_monitor: Option<String>,
    pub heartbeat_timeout_secs: u64,
    pub progress_report: bool,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            polling_interval_secs: profiled_env_u64(p, "POLLING_INTERVAL", 10),
            paused: profiled_env_bool(p, "PAUSE", false),
            concurrency: profiled_env_u32(p, "WORKER_CONCURRENCY", 3) as usize,
            dedup_enabled: profiled_env_bool(p, "DEDUP_ENABLED", true),
            transition_on_error: profiled_env_bool(p, "TRANSITION_ON_ERROR", true),
            message_id_scheme: profiled_env_opt(p, "MESSAGE_ID_SCHEME")
                .and_then(|v| MessageIdScheme::parse(&v))
                .unwrap_or(MessageIdScheme::Stable),
            required_field: profiled_env_or(p, "REQUIRED_FIELD", "Email"),
            uptime_monitor: profiled_env_opt(p, "UPTIME_MONITOR"),
            heartbeat_timeout_secs: profiled_env_u64(p, "HEARTBEAT_TIMEOUT_SECS", 10),
            progress_report: profiled_env_bool(p, "PROGRESS_REPORT", true),
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 1 "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("validation/in-progress"), "validation/in-progress/");
        assert_eq!(normalize_prefix("/validation/queued//"), "validation/queued/");
    }

    #[test]
    fn test_broker_provider_parse() {
        assert_eq!(BrokerProvider::parse("RabbitMQ"), Some(BrokerProvider::Amqp));
        assert_eq!(BrokerProvider::parse("sqs"), Some(BrokerProvider::Sqs));
        assert_eq!(BrokerProvider::parse("kafka"), None);
    }

    #[test]
    fn test_message_id_scheme_parse_ignores_case() {
        assert_eq!(MessageIdScheme::parse("Timestamped"), Some(MessageIdScheme::Timestamped));
        assert_eq!(MessageIdScheme::parse(" STABLE "), Some(MessageIdScheme::Stable));
        assert_eq!(MessageIdScheme::parse("uuid"), None);

        env::set_var("ENQTESTSCHEME_MESSAGE_ID_SCHEME", "TIMESTAMPED");
        let cfg = Config::for_profile("ENQTESTSCHEME");
        env::remove_var("ENQTESTSCHEME_MESSAGE_ID_SCHEME");
        assert_eq!(cfg.worker.message_id_scheme, MessageIdScheme::Timestamped);
    }

    #[test]
    fn test_profile_defaults_and_override() {
        // Unique profile name keeps this test independent of the real environment.
        let p = "ENQTESTPROFILE";
        env::set_var("ENQTESTPROFILE_QUEUE_PREFIX", "custom_ns");
        env::set_var("ENQTESTPROFILE_POLLING_INTERVAL", "not-a-number");
        let cfg = Config::for_profile(p);
        assert_eq!(cfg.broker.queue_prefix, "custom_ns");
        assert_eq!(cfg.worker.polling_interval_secs, 10);
        assert_eq!(cfg.broker.connect_attempts, 5);
        assert_eq!(cfg.broker.connect_delay(), Duration::from_secs(5));
        env::remove_var("ENQTESTPROFILE_QUEUE_PREFIX");
        env::remove_var("ENQTESTPROFILE_POLLING_INTERVAL");
    }

    #[test]
    fn test_validate_rejects_equal_prefixes() {
        let mut cfg = Config::for_profile("ENQTESTVALIDATE");
        cfg.storage.queued_prefix = cfg.storage.in_progress_prefix.clone();
        assert!(matches!(cfg.validate(), Err(EnqueuerError::Config(_))));
    }

    #[test]
    fn test_connection_string_prefers_url() {
        let mut cfg = Config::for_profile("ENQTESTPG").postgres;
        cfg.url = Some("postgres://u:p@db/x".into());
        assert_eq!(cfg.connection_string(), "postgres://u:p@db/x");
        cfg.url = None;
        cfg.username = Some("svc".into());
        cfg.password = None;
        assert!(cfg.connection_string().starts_with("postgres://svc:@"));
    }
}
