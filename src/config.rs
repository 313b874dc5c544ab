use crate::core::{DriverError, Result};
use rusqlite::OpenFlags;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

/// Top-level configuration structure parsed from a TOML file.
///
/// Every section and field is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

/// How connections are opened.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Milliseconds a blocked statement waits before reporting busy
    pub busy_timeout_ms: Option<u32>,
    pub read_only: bool,
    /// Create the database file if it does not exist
    pub create: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            busy_timeout_ms: None,
            read_only: false,
            create: true,
        }
    }
}

impl ConnectionConfig {
    /// Engine open flags for these settings.
    pub fn open_flags(&self) -> OpenFlags {
        let access = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else if self.create {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }
}

/// Logging configuration for the command-line tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of "error", "warn", "info", "debug", "trace"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level> {
        self.level
            .parse::<Level>()
            .map_err(|_| DriverError::Config(format!("unknown log level '{}'", self.level)))
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = sqlstep::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DriverConfig> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<DriverConfig> {
    let config: DriverConfig =
        toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))?;
    config.logging.level()?;
    Ok(config)
}

/// `<config dir>/sqlstep/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlstep").join("config.toml"))
}

/// Loads the file at `default_config_path`, falling back to the defaults
/// when there is no such file.
pub fn load_default_config() -> Result<DriverConfig> {
    match default_config_path() {
        Some(path) if path.exists() => load_config(path),
        _ => Ok(DriverConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[connection]
busy_timeout_ms = 250
read_only = true

[logging]
level = "debug"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = parse_config(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.connection.busy_timeout_ms, Some(250));
        assert!(config.connection.read_only);
        assert!(config.connection.create);
        assert_eq!(config.logging.level().unwrap(), Level::DEBUG);
        assert!(config
            .connection
            .open_flags()
            .contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.connection.busy_timeout_ms, None);
        assert_eq!(config.logging.level().unwrap(), Level::WARN);
        let flags = config.connection.open_flags();
        assert!(flags.contains(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            parse_config("[connection]\nbusy_timeout_ms = \"soon\""),
            Err(DriverError::Config(_))
        ));
        assert!(matches!(
            parse_config("[logging]\nlevel = \"loud\""),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.connection.busy_timeout_ms, Some(250));

        assert!(matches!(
            load_config("/nonexistent/sqlstep.toml"),
            Err(DriverError::Io(_))
        ));
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("sqlstep/config.toml"));
        }
    }
}
