use crate::logging::log_level::LogLevel;

/// Logging configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Output format for logs
    pub format: OutputFormat,
    /// Whether to include the emitting module path
    pub include_target: bool,
}

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format
    Json,
    /// Human readable multi-line format
    Pretty,
    /// Compact single-line format
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = crate::errors::AnalyzerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            "text" => Ok(OutputFormat::Text),
            _ => Err(crate::errors::AnalyzerError::Configuration(format!(
                "Unsupported log format: {value}"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: OutputFormat::Pretty,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `LOG_LEVEL` / `LOG_FORMAT` on top of the current values
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level_str) = std::env::var("LOG_LEVEL") {
            if let Ok(level) = level_str.parse::<LogLevel>() {
                self.level = level;
            }
        }

        if let Ok(format_str) = std::env::var("LOG_FORMAT") {
            if let Ok(format) = format_str.parse::<OutputFormat>() {
                self.format = format;
            }
        }

        self
    }

    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_and_level() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::with_level(LogLevel::Debug).with_format(OutputFormat::Json);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.level.as_filter(), "debug");
    }
}
