//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Highest start level expressible by the two-digit directory convention.
pub const MAX_START_LEVEL: u32 = 99;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_deploy(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_deploy(config: &Config) -> ConfigResult<()> {
    let d = &config.deploy;

    if d.install_root.trim().is_empty() {
        return Err(invalid("deploy.install_root", "must not be empty"));
    }

    if d.artifact_suffix.len() < 2 || !d.artifact_suffix.starts_with('.') {
        return Err(invalid(
            "deploy.artifact_suffix",
            format!(
                "'{}' must start with '.' followed by an extension",
                d.artifact_suffix
            ),
        ));
    }

    if !(1..=MAX_START_LEVEL).contains(&d.default_start_level) {
        return Err(invalid(
            "deploy.default_start_level",
            format!("must be between 1 and {MAX_START_LEVEL}"),
        ));
    }

    if d.refresh_timeout_secs == 0 {
        return Err(invalid("deploy.refresh_timeout_secs", "must be greater than 0"));
    }

    if d.debounce_ms == 0 {
        return Err(invalid("deploy.debounce_ms", "must be greater than 0"));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    // The level may carry directives ("info,notify=warn"); check the head.
    let head = l.level.split(',').next().unwrap_or_default().trim();
    if !LOG_LEVELS.contains(&head.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{head}'; expected one of: {}", LOG_LEVELS.join(", ")),
        ));
    }

    if !LOG_FORMATS.contains(&l.format.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: {}",
                l.format,
                LOG_FORMATS.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_suffix_requires_dot() {
        let mut config = Config::default();
        config.deploy.artifact_suffix = "jar".to_owned();
        assert_eq!(field_of(validate(&config)), "deploy.artifact_suffix");
    }

    #[test]
    fn test_start_level_range() {
        let mut config = Config::default();
        config.deploy.default_start_level = 0;
        assert_eq!(field_of(validate(&config)), "deploy.default_start_level");

        config.deploy.default_start_level = 100;
        assert_eq!(field_of(validate(&config)), "deploy.default_start_level");

        config.deploy.default_start_level = 99;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = Config::default();
        config.deploy.debounce_ms = 0;
        assert_eq!(field_of(validate(&config)), "deploy.debounce_ms");

        let mut config = Config::default();
        config.deploy.refresh_timeout_secs = 0;
        assert_eq!(field_of(validate(&config)), "deploy.refresh_timeout_secs");
    }

    #[test]
    fn test_logging_level_and_format() {
        let mut config = Config::default();
        config.logging.level = "debug,notify=warn".to_owned();
        assert!(validate(&config).is_ok());

        config.logging.level = "loud".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }
}
