//! Configuration validation

use crate::{AppConfig, ConfigError, Result};

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
///
/// Identifier lookups (repository kind, serializer) are left to the
/// registries at startup; this only checks shapes and ranges.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    // Repository
    if config.repository.kind.trim().is_empty() {
        errors.push(ValidationError::new(
            "repository.kind",
            "repository identifier is required",
        ));
    }

    if config.repository.serializer.trim().is_empty() {
        errors.push(ValidationError::new(
            "repository.serializer",
            "serializer identifier is required",
        ));
    }

    if config.repository.max_connections == 0 {
        errors.push(ValidationError::new(
            "repository.max_connections",
            "must be greater than 0",
        ));
    }

    // Recovery
    let recovery = &config.recovery;
    if recovery.period_secs == 0 {
        errors.push(ValidationError::new(
            "recovery.period_secs",
            "must be greater than 0",
        ));
    }

    if recovery.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "recovery.timeout_secs",
            "must be greater than 0",
        ));
    }

    if recovery.limit == 0 {
        errors.push(ValidationError::new("recovery.limit", "must be greater than 0"));
    }

    if recovery.compensation_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "recovery.compensation_timeout_secs",
            "must be greater than 0",
        ));
    }

    if recovery.cleanup_enabled {
        if recovery.cleanup_period_secs == 0 {
            errors.push(ValidationError::new(
                "recovery.cleanup_period_secs",
                "must be greater than 0 when cleanup is enabled",
            ));
        }

        // Removing records that recovery may still need would lose work
        if recovery.retention_secs <= recovery.timeout_secs {
            errors.push(ValidationError::new(
                "recovery.retention_secs",
                "must be greater than recovery.timeout_secs",
            ));
        }
    }

    // Pipeline
    let pipeline = &config.pipeline;
    if pipeline.buffer_capacity == 0 {
        errors.push(ValidationError::new(
            "pipeline.buffer_capacity",
            "must be greater than 0",
        ));
    }

    if pipeline.consumer_threads == 0 {
        errors.push(ValidationError::new(
            "pipeline.consumer_threads",
            "must be greater than 0",
        ));
    }

    if pipeline.consumer_threads > pipeline.buffer_capacity {
        errors.push(ValidationError::new(
            "pipeline.consumer_threads",
            "must not exceed pipeline.buffer_capacity",
        ));
    }

    if pipeline.batch_size == 0 {
        errors.push(ValidationError::new(
            "pipeline.batch_size",
            "must be greater than 0",
        ));
    }

    if pipeline.max_persist_attempts == 0 {
        errors.push(ValidationError::new(
            "pipeline.max_persist_attempts",
            "must be greater than 0",
        ));
    }

    if pipeline.retry_initial_ms > pipeline.retry_max_ms {
        errors.push(ValidationError::new(
            "pipeline.retry_initial_ms",
            "must not exceed pipeline.retry_max_ms",
        ));
    }

    // Cache
    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new(
            "cache.max_entries",
            "must be greater than 0",
        ));
    }

    // Logging
    if let Err(e) = validate_log_level(&config.logging.level) {
        errors.push(e);
    }

    // Return all errors if any were found
    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "logging.level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, LoggingConfig, PipelineConfig, RecoveryConfig, RepositoryConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AppConfig {
            logging: LoggingConfig {
                level: "verbose".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_identifiers() {
        let config = AppConfig {
            repository: RepositoryConfig {
                kind: "".to_string(),
                serializer: " ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("repository.kind"));
        assert!(err.contains("repository.serializer"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = AppConfig {
            pipeline: PipelineConfig {
                buffer_capacity: 0,
                batch_size: 0,
                ..Default::default()
            },
            cache: CacheConfig { max_entries: 0 },
            ..Default::default()
        };

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("pipeline.buffer_capacity"));
        assert!(err.contains("pipeline.batch_size"));
        assert!(err.contains("cache.max_entries"));
    }

    #[test]
    fn test_validate_retention_must_exceed_timeout() {
        let config = AppConfig {
            recovery: RecoveryConfig {
                timeout_secs: 600,
                retention_secs: 600,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(validate_config(&config).is_err());

        let config = AppConfig {
            recovery: RecoveryConfig {
                timeout_secs: 600,
                retention_secs: 600,
                cleanup_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(validate_config(&config).is_ok());
    }
}
