//! Conversion from the `[logging]` configuration section.

use dropzone_config::LoggingSection;

use crate::error::TelemetryResult;
use crate::logging::{FileRotation, LogConfig, LogFormat};

impl LogConfig {
    /// Build a log config from the `[logging]` section of the unified config.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::ConfigError`](crate::TelemetryError::ConfigError)
    /// if the section names an unknown format.
    pub fn from_section(section: &LoggingSection) -> TelemetryResult<Self> {
        let format: LogFormat = section.format.parse()?;
        let mut config = Self::new(section.level.clone()).with_format(format);

        if let Some(dir) = &section.directory {
            config = config.with_file_logging(dir.clone(), FileRotation::Daily);
        }
        for directive in &section.directives {
            config = config.with_directive(directive.clone());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::logging::LogTarget;

    #[test]
    fn test_from_default_section() {
        let config = LogConfig::from_section(&LoggingSection::default()).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.target, LogTarget::Stderr);
    }

    #[test]
    fn test_from_section_with_directory() {
        let section = LoggingSection {
            level: "debug".to_owned(),
            format: "json".to_owned(),
            directory: Some(PathBuf::from("/var/log/dropzone")),
            directives: vec!["notify=warn".to_owned()],
        };
        let config = LogConfig::from_section(&section).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(
            config.target,
            LogTarget::File(PathBuf::from("/var/log/dropzone"))
        );
        assert_eq!(config.directives, vec!["notify=warn"]);
    }

    #[test]
    fn test_from_section_bad_format() {
        let section = LoggingSection {
            format: "yaml".to_owned(),
            ..LoggingSection::default()
        };
        assert!(LogConfig::from_section(&section).is_err());
    }
}
