// ABOUTME: Configuration loading and validation for the roomstore file store.
// ABOUTME: Reads environment variables for the data directory and the history retention tunables.

use std::path::PathBuf;

use thiserror::Error;

/// On-disk format version. Stores written with any other version are
/// discarded and rebuilt on open.
pub const FORMAT_VERSION: u32 = 2;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid count: {value}")]
    InvalidCount { name: &'static str, value: String },

    #[error("ROOMSTORE_MAX_STORED_MESSAGES must be at least 1")]
    ZeroRetention,
}

/// File store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Root directory; each account gets its own subdirectory.
    pub home: PathBuf,
    pub format_version: u32,
    /// Number of newest events a room keeps on disk, before extending back
    /// to the nearest pagination token.
    pub max_stored_messages: usize,
    /// When the token-aligned cut still keeps more than this many times
    /// `max_stored_messages`, the cut is retried from `fallback_tail`.
    pub overflow_multiplier: usize,
    pub fallback_tail: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            format_version: FORMAT_VERSION,
            max_stored_messages: 50,
            overflow_multiplier: 2,
            fallback_tail: 10,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - ROOMSTORE_HOME: data directory (default: ~/.roomstore)
    /// - ROOMSTORE_MAX_STORED_MESSAGES: per-room retention ceiling (default: 50)
    /// - ROOMSTORE_OVERFLOW_MULTIPLIER: overflow factor before the tail fallback (default: 2)
    /// - ROOMSTORE_FALLBACK_TAIL: events kept by the tail fallback (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let home = std::env::var("ROOMSTORE_HOME")
            .map(PathBuf::from)
            .unwrap_or(defaults.home);

        let max_stored_messages =
            count_from_env("ROOMSTORE_MAX_STORED_MESSAGES", defaults.max_stored_messages)?;
        if max_stored_messages == 0 {
            return Err(ConfigError::ZeroRetention);
        }

        let overflow_multiplier =
            count_from_env("ROOMSTORE_OVERFLOW_MULTIPLIER", defaults.overflow_multiplier)?;
        let fallback_tail = count_from_env("ROOMSTORE_FALLBACK_TAIL", defaults.fallback_tail)?;

        Ok(Self {
            home,
            format_version: FORMAT_VERSION,
            max_stored_messages,
            overflow_multiplier,
            fallback_tail,
        })
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".roomstore")
}

fn count_from_env(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidCount { name, value }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        // SAFETY: test-only code, single-threaded test execution
        unsafe {
            std::env::remove_var("ROOMSTORE_HOME");
            std::env::remove_var("ROOMSTORE_MAX_STORED_MESSAGES");
            std::env::remove_var("ROOMSTORE_OVERFLOW_MULTIPLIER");
            std::env::remove_var("ROOMSTORE_FALLBACK_TAIL");
        }
    }

    #[test]
    fn config_loads_defaults_and_rejects_bad_counts() {
        // Kept in one test so the env mutations never interleave.
        clear_env();
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.max_stored_messages, 50);
        assert_eq!(config.overflow_multiplier, 2);
        assert_eq!(config.fallback_tail, 10);
        assert_eq!(config.format_version, FORMAT_VERSION);
        assert!(config.home.to_string_lossy().contains(".roomstore"));

        // SAFETY: test-only code, single-threaded test execution
        unsafe {
            std::env::set_var("ROOMSTORE_MAX_STORED_MESSAGES", "lots");
        }
        let err = StoreConfig::from_env().unwrap_err();
        assert!(
            err.to_string().contains("ROOMSTORE_MAX_STORED_MESSAGES"),
            "error should name the variable: {}",
            err
        );

        // SAFETY: test-only code, single-threaded test execution
        unsafe {
            std::env::set_var("ROOMSTORE_MAX_STORED_MESSAGES", "0");
        }
        assert!(matches!(
            StoreConfig::from_env(),
            Err(ConfigError::ZeroRetention)
        ));

        // SAFETY: test-only code, single-threaded test execution
        unsafe {
            std::env::set_var("ROOMSTORE_MAX_STORED_MESSAGES", "80");
            std::env::set_var("ROOMSTORE_HOME", "/var/lib/roomstore");
        }
        let config = StoreConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.max_stored_messages, 80);
        assert_eq!(config.home, PathBuf::from("/var/lib/roomstore"));
    }

    #[test]
    fn with_home_keeps_default_tunables() {
        let config = StoreConfig::with_home("/data");
        assert_eq!(config.home, PathBuf::from("/data"));
        assert_eq!(config.max_stored_messages, 50);
    }
}
