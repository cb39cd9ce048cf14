//! Configuration file parser for ~/.config/gator/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

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
// Configuration
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` means `gator.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// A feed is due once its last attempt is older than this.
    pub scrape_cutoff_minutes: u64,

    /// Sleep between polling cycles in `watch` mode.
    pub poll_interval_minutes: u64,

    /// Per-request budget covering connect, headers and body.
    pub request_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Allow subscribing to localhost and private network addresses.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            scrape_cutoff_minutes: 60,
            poll_interval_minutes: 15,
            request_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            allow_private_hosts: false,
        }
    }
}

const KNOWN_KEYS: [&str; 6] = [
    "database_path",
    "scrape_cutoff_minutes",
    "poll_interval_minutes",
    "request_timeout_secs",
    "max_feed_bytes",
    "allow_private_hosts",
];

impl Config {
    /// SEC-014: Config files above 1 MiB are refused.
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Reads `path`, falling back to defaults when it is absent or blank.
    ///
    /// Keys outside [`KNOWN_KEYS`] are tolerated but logged, since they are
    /// usually typos.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_bounded(path, Self::MAX_FILE_SIZE)? else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        };
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Blank config file, using defaults");
            return Ok(Self::default());
        }

        warn_unknown_keys(&content);
        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            cutoff_minutes = config.scrape_cutoff_minutes,
            interval_minutes = config.poll_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn scrape_cutoff(&self) -> Duration {
        Duration::from_secs(self.scrape_cutoff_minutes.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured database path, or `gator.db` inside `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("gator.db"))
    }
}

/// `Ok(None)` when the file does not exist. Reads at most `limit + 1` bytes
/// so an oversized file is rejected without loading it.
fn read_bounded(path: &Path, limit: u64) -> Result<Option<String>, ConfigError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut content = String::new();
    file.take(limit + 1).read_to_string(&mut content)?;
    if content.len() as u64 > limit {
        return Err(ConfigError::TooLarge(format!(
            "{} exceeds {} bytes",
            path.display(),
            limit
        )));
    }
    Ok(Some(content))
}

fn warn_unknown_keys(content: &str) {
    let Ok(table) = content.parse::<toml::Table>() else {
        return;
    };
    table
        .keys()
        .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
        .for_each(|key| tracing::warn!(key = %key, "Ignoring unknown config key"));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("gator_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.scrape_cutoff(), Duration::from_secs(3600));
        assert_eq!(config.poll_interval(), Duration::from_secs(900));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_feed_bytes, 10_485_760);
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/gator_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_empty_and_whitespace_files_return_default() {
        for (name, content) in [("empty", ""), ("whitespace", "   \n  \n  ")] {
            let (dir, path) = write_config(name, content);
            assert_eq!(Config::load(&path).unwrap(), Config::default());
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "scrape_cutoff_minutes = 5\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scrape_cutoff_minutes, 5);
        assert_eq!(config.poll_interval_minutes, 15);
        assert_eq!(config.request_timeout_secs, 30);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/gator/feeds.db"
scrape_cutoff_minutes = 120
poll_interval_minutes = 5
request_timeout_secs = 10
max_feed_bytes = 2048
allow_private_hosts = true
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config,
            Config {
                database_path: Some(PathBuf::from("/var/lib/gator/feeds.db")),
                scrape_cutoff_minutes: 120,
                poll_interval_minutes: 5,
                request_timeout_secs: 10,
                max_feed_bytes: 2048,
                allow_private_hosts: true,
            }
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
poll_interval_minutes = 30
totally_fake_key = "should not fail"
"#;
        let (dir, path) = write_config("unknown", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_minutes, 30);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "scrape_cutoff_minutes = \"an hour\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_database_path_defaults_next_to_config() {
        let dir = Path::new("/home/someone/.config/gator");
        assert_eq!(
            Config::default().database_path_in(dir),
            PathBuf::from("/home/someone/.config/gator/gator.db")
        );

        let config = Config {
            database_path: Some(PathBuf::from("/data/feeds.db")),
            ..Config::default()
        };
        assert_eq!(config.database_path_in(dir), PathBuf::from("/data/feeds.db"));
    }
}
