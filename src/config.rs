//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOXQUERY_CONFIG` (environment variable)
//! 2. `~/.config/mboxquery/config.toml` (Linux/macOS)
//!    `%APPDATA%\mboxquery\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Query defaults.
    pub query: QueryConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for fallback indexes and logs.
    pub cache_dir: Option<PathBuf>,
    /// `strftime` format string for dates in text output.
    pub date_format: String,
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Result limit applied when none is given on the command line.
    pub default_limit: usize,
    /// Number of body characters shown per search hit.
    pub preview_chars: usize,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Read buffer size in bytes (default: 1 MiB).
    pub read_buffer_size: usize,
    /// Largest message buffered in memory during a scan (default: 256 MiB).
    pub max_message_size: usize,
    /// Number of decoded bodies kept in the LRU cache.
    pub lru_cache_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
            date_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            preview_chars: 500,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: crate::parser::mbox::READ_BUFFER_SIZE,
            max_message_size: crate::parser::mbox::MAX_MESSAGE_SIZE,
            lru_cache_size: 50,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from an explicit file, falling back to defaults.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOXQUERY_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mboxquery").join("config.toml"))
}

/// Return the cache directory for fallback indexes and logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboxquery")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mboxquery.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.query.default_limit, 10);
        assert_eq!(cfg.query.preview_chars, 500);
        assert_eq!(cfg.performance.lru_cache_size, 50);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.general.date_format, cfg.general.date_format);
        assert_eq!(parsed.query.default_limit, cfg.query.default_limit);
        assert_eq!(
            parsed.performance.read_buffer_size,
            cfg.performance.read_buffer_size
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[query]
default_limit = 25

[performance]
lru_cache_size = 8
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.query.default_limit, 25);
        assert_eq!(cfg.performance.lru_cache_size, 8);
        // Other fields use defaults
        assert_eq!(cfg.query.preview_chars, 500);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[query\ndefault_limit = ").expect("write");
        let cfg = load_config_from(&path);
        assert_eq!(cfg.query.default_limit, 10);
    }

    #[test]
    fn test_cache_dir_override() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/mq-cache"));
        assert_eq!(cache_dir(&cfg), PathBuf::from("/tmp/mq-cache"));
        assert_eq!(log_file_path(&cfg), PathBuf::from("/tmp/mq-cache/mboxquery.log"));
    }
}
