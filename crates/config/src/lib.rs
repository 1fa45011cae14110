//! Configuration loading, validation, and management for Skein.
//!
//! Loads configuration from `~/.skein/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use skein_core::Fill;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The root configuration structure.
///
/// Maps directly to `~/.skein/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Assembly (build-time) settings
    #[serde(default)]
    pub assembly: AssemblyConfig,

    /// Execution (run-time) settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Label used for assemblies built without an explicit name
    #[serde(default = "default_assembly_name")]
    pub name: String,

    /// Where the build report goes once an assembly is created
    #[serde(default)]
    pub report: ReportLevel,
}

fn default_assembly_name() -> String {
    "main".into()
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            name: default_assembly_name(),
            report: ReportLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Which absent slots a chain fills when it starts
    #[serde(default)]
    pub fill: Fill,

    /// Emit a debug event for every call a chain performs
    #[serde(default)]
    pub trace_calls: bool,
}

/// Log level for the assembly build report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    Off,
    #[default]
    Debug,
    Info,
}

impl FromStr for ReportLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(ReportLevel::Off),
            "debug" => Ok(ReportLevel::Debug),
            "info" => Ok(ReportLevel::Info),
            other => Err(format!("unknown report level '{other}', expected off, debug or info")),
        }
    }
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportLevel::Off => "off",
            ReportLevel::Debug => "debug",
            ReportLevel::Info => "info",
        };
        f.write_str(name)
    }
}

impl EngineConfig {
    /// Load configuration from the default path, with env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Allow env var to override the default fill mode
        if let Ok(fill) = std::env::var("SKEIN_FILL") {
            config.execution.fill = fill.parse().map_err(ConfigError::ValidationError)?;
        }

        // Allow env var to override the report level
        if let Ok(report) = std::env::var("SKEIN_REPORT") {
            config.assembly.report = report.parse().map_err(ConfigError::ValidationError)?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".skein")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assembly.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "assembly.name must not be empty".into(),
            ));
        }

        if self.execution.trace_calls && self.assembly.report == ReportLevel::Off {
            tracing::debug!("trace_calls is enabled while the assembly report is off");
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `skein config show`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.assembly.name, "main");
        assert_eq!(config.assembly.report, ReportLevel::Debug);
        assert_eq!(config.execution.fill, Fill::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.assembly.name, config.assembly.name);
        assert_eq!(parsed.execution.fill, config.execution.fill);
    }

    #[test]
    fn empty_assembly_name_rejected() {
        let mut config = EngineConfig::default();
        config.assembly.name = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = EngineConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().assembly.name, "main");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[assembly]
name = "gateway"
report = "info"

[execution]
fill = "all"
trace_calls = true
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.assembly.name, "gateway");
        assert_eq!(config.assembly.report, ReportLevel::Info);
        assert_eq!(config.execution.fill, Fill::All);
        assert!(config.execution.trace_calls);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[execution]\nfill = \"sometimes\"").unwrap();
        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = EngineConfig::default_toml();
        assert!(toml_str.contains("[assembly]"));
        assert!(toml_str.contains("report = \"debug\""));
        assert!(toml_str.contains("fill = \"none\""));
    }

    #[test]
    fn report_level_parsing() {
        assert_eq!("INFO".parse::<ReportLevel>().unwrap(), ReportLevel::Info);
        assert!("loud".parse::<ReportLevel>().is_err());
        assert_eq!(ReportLevel::Off.to_string(), "off");
    }
}
