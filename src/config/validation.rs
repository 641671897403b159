use crate::config::types::{Config, GridConfig, SessionConfig, StorageConfig};
use crate::ConfigError;

const MIN_PAGE_SIZE: u32 = 512;
const MAX_PAGE_SIZE: u32 = 65536;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_grid_config(&config.grid)?;
    validate_storage_config(&config.storage)?;
    validate_session_config(&config.session)?;
    Ok(())
}

/// Validates grid node configuration
pub fn validate_grid_config(config: &GridConfig) -> Result<(), ConfigError> {
    if config.work_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "work_dir cannot be empty".to_string(),
        ));
    }

    if let Some(name) = &config.node_name {
        if name.is_empty() || name.contains('@') {
            return Err(ConfigError::Validation(format!(
                "node_name must be non-empty and must not contain '@', got '{}'",
                name
            )));
        }
    }

    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage engine options
pub fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if let Some(size) = config.page_split_size {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
            return Err(ConfigError::Validation(format!(
                "page_split_size must be between {} and {} bytes, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, size
            )));
        }
    }

    if let Some(level) = config.compress {
        if level > 2 {
            return Err(ConfigError::Validation(format!(
                "compress must be 0 (none), 1 (low) or 2 (high), got {}",
                level
            )));
        }
    }

    if let Some(rate) = config.auto_compact_fill_rate {
        if rate > 100 {
            return Err(ConfigError::Validation(format!(
                "auto_compact_fill_rate is a percentage, got {}",
                rate
            )));
        }
    }

    if config.cache_concurrency == Some(0) {
        return Err(ConfigError::Validation(
            "cache_concurrency must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.pipeline_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pipeline_name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
