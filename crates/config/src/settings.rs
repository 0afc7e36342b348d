//! Core configuration structures for the TCC coordinator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Storage and serializer selection
    pub repository: RepositoryConfig,

    /// Self-recovery scheduler
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Asynchronous event pipeline
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Participant cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage port and serializer selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Storage implementation identifier (e.g. "memory", "sqlite")
    pub kind: String,

    /// Serializer identifier (e.g. "json", "yaml")
    pub serializer: String,

    /// Backend location, interpreted by the storage implementation
    #[serde(default = "default_repository_url")]
    pub url: String,

    /// Maximum open connections for pooled backends
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Self-recovery scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Delay before the first scan in seconds
    #[serde(default = "default_recovery_delay_secs")]
    pub delay_secs: u64,

    /// Interval between scans in seconds
    #[serde(default = "default_recovery_period_secs")]
    pub period_secs: u64,

    /// A non-terminal transaction untouched for this long is overdue
    #[serde(default = "default_recovery_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries allowed before a transaction is declared dead
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Maximum transactions fetched per scan
    #[serde(default = "default_recovery_limit")]
    pub limit: usize,

    /// Upper bound on a single confirm/cancel invocation in seconds
    #[serde(default = "default_compensation_timeout_secs")]
    pub compensation_timeout_secs: u64,

    /// Enable removal of terminal transactions past the retention window
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,

    /// Interval between cleanup runs in seconds
    #[serde(default = "default_cleanup_period_secs")]
    pub cleanup_period_secs: u64,

    /// Terminal transactions older than this are removed
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

/// What `publish` does when the event buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait up to `publish_timeout_ms` for space, then fail with a retryable error
    Block,

    /// Fail immediately with a retryable error
    Reject,
}

/// Event pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Total buffered events across all consumers
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Number of consumer workers
    #[serde(default = "default_consumer_threads")]
    pub consumer_threads: usize,

    /// Maximum events applied per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a consumer lingers to fill a batch, in milliseconds (0 = never)
    #[serde(default)]
    pub batch_window_ms: u64,

    /// Behaviour when the buffer is full
    #[serde(default = "default_overflow_policy")]
    pub overflow_policy: OverflowPolicy,

    /// Blocking publish timeout in milliseconds
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Attempts per event before it is dropped
    #[serde(default = "default_max_persist_attempts")]
    pub max_persist_attempts: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Upper bound on flushing buffered events at shutdown, in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

/// Participant cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of cached transaction groups
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl RecoveryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn compensation_timeout(&self) -> Duration {
        Duration::from_secs(self.compensation_timeout_secs)
    }

    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_secs)
    }
}

impl PipelineConfig {
    /// Capacity of each consumer's shard, rounded up so the total is never below `buffer_capacity`
    pub fn shard_capacity(&self) -> usize {
        let shards = self.consumer_threads.max(1);
        self.buffer_capacity.div_ceil(shards).max(1)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

// Default value functions
fn default_repository_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_recovery_delay_secs() -> u64 {
    30
}

fn default_recovery_period_secs() -> u64 {
    60
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_max_retry() -> u32 {
    10
}

fn default_recovery_limit() -> usize {
    100
}

fn default_compensation_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cleanup_period_secs() -> u64 {
    600 // 10 minutes
}

fn default_retention_secs() -> u64 {
    86_400 // 1 day
}

fn default_buffer_capacity() -> usize {
    4096
}

fn default_consumer_threads() -> usize {
    4
}

fn default_batch_size() -> usize {
    64
}

fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::Block
}

fn default_publish_timeout_ms() -> u64 {
    100
}

fn default_max_persist_attempts() -> u32 {
    5
}

fn default_retry_initial_ms() -> u64 {
    50
}

fn default_retry_max_ms() -> u64 {
    2000
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            serializer: "json".to_string(),
            url: default_repository_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_recovery_delay_secs(),
            period_secs: default_recovery_period_secs(),
            timeout_secs: default_recovery_timeout_secs(),
            max_retry: default_max_retry(),
            limit: default_recovery_limit(),
            compensation_timeout_secs: default_compensation_timeout_secs(),
            cleanup_enabled: default_true(),
            cleanup_period_secs: default_cleanup_period_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            consumer_threads: default_consumer_threads(),
            batch_size: default_batch_size(),
            batch_window_ms: 0,
            overflow_policy: default_overflow_policy(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_persist_attempts: default_max_persist_attempts(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
