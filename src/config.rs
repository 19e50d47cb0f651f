//! Configuration file parser for ~/.config/jobfeeder/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde, though we log a warning when
//! the file contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Production endpoint of the WhatJobs XML API.
pub const DEFAULT_API_BASE_URL: &str = "https://api.whatjobs.com/api/v1/jobs.xml";

/// Environment variable that overrides `publisher_id` from the file.
pub const PUBLISHER_ID_ENV: &str = "WHATJOBS_PUBLISHER_ID";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Process-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `publisher_id` to prevent secret leakage
/// in logs, error messages, and debug output.
#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Relative paths resolve against the config directory.
    pub database_path: PathBuf,

    /// Upstream jobs endpoint.
    pub api_base_url: String,

    /// User agent reported to the upstream API. Defaults to `jobfeeder/<version>`.
    pub user_agent: Option<String>,

    /// Caller IP reported to the upstream API. Private addresses are ignored.
    pub user_ip: Option<String>,

    /// Age in days after which imported records are swept.
    pub retention_days: u32,

    /// WhatJobs publisher credential. The settings table takes precedence
    /// when a credential has been saved there.
    #[serde(deserialize_with = "deserialize_secret")]
    pub publisher_id: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::from(v.trim().to_string())))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("jobfeeder.db"),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: None,
            user_ip: None,
            retention_days: 30,
            publisher_id: None,
        }
    }
}

/// SEC-015: Mask publisher_id in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("api_base_url", &self.api_base_url)
            .field("user_agent", &self.user_agent)
            .field("user_ip", &self.user_ip)
            .field("retention_days", &self.retention_days)
            .field(
                "publisher_id",
                &self.publisher_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "api_base_url",
                "user_agent",
                "user_ip",
                "retention_days",
                "publisher_id",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), api = %config.api_base_url, "Loaded configuration");
        Ok(config)
    }

    /// Apply environment overrides (currently only the publisher credential).
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_publisher_override(std::env::var(PUBLISHER_ID_ENV).ok());
        self
    }

    fn apply_publisher_override(&mut self, value: Option<String>) {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Publisher credential taken from environment");
            self.publisher_id = Some(SecretString::from(value.trim().to_string()));
        }
    }

    /// User agent reported upstream.
    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or_else(|| format!("jobfeeder/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Database path, resolved against `base_dir` when relative.
    pub fn database_path_in(&self, base_dir: &Path) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            base_dir.join(&self.database_path)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.database_path, PathBuf::from("jobfeeder.db"));
        assert!(config.publisher_id.is_none());
        assert!(config.user_agent().starts_with("jobfeeder/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/jobfeeder_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = std::env::temp_dir().join("jobfeeder_config_test_whitespace");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("jobfeeder_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
database_path = "/var/lib/jobfeeder/jobs.db"
api_base_url = "http://127.0.0.1:9000/jobs.xml"
user_agent = "JobsBot/2.0"
user_ip = "203.0.113.7"
retention_days = 14
publisher_id = "pub-123"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/jobfeeder/jobs.db")
        );
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000/jobs.xml");
        assert_eq!(config.user_agent(), "JobsBot/2.0");
        assert_eq!(config.user_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(config.retention_days, 14);
        assert_eq!(
            config.publisher_id.as_ref().map(|s| s.expose_secret()),
            Some("pub-123")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("jobfeeder_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("jobfeeder_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "retention_days = \"forever\"\n").unwrap();

        assert!(Config::load(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("jobfeeder_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_publisher_override_ignores_blank() {
        let mut config = Config::default();
        config.apply_publisher_override(Some("   ".into()));
        assert!(config.publisher_id.is_none());

        config.apply_publisher_override(Some(" env-pub ".into()));
        assert_eq!(
            config.publisher_id.as_ref().map(|s| s.expose_secret()),
            Some("env-pub")
        );
    }

    #[test]
    fn test_relative_database_path_resolves_against_dir() {
        let config = Config::default();
        assert_eq!(
            config.database_path_in(Path::new("/etc/jobfeeder")),
            PathBuf::from("/etc/jobfeeder/jobfeeder.db")
        );
    }

    // SEC-015: Debug output masks the publisher credential
    #[test]
    fn test_debug_masks_publisher_id() {
        let config = Config {
            publisher_id: Some(SecretString::from("super-secret-publisher")),
            ..Config::default()
        };

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-publisher"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
