use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub content_dir: PathBuf,
    pub jwt_secret: String,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub note_write_rate_limit_per_window: u32,
    pub tombstone_retention: Duration,
    pub tombstone_sweep_interval: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("content_dir", &self.content_dir)
            .field("jwt_secret", &"[REDACTED]")
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "note_write_rate_limit_per_window",
                &self.note_write_rate_limit_per_window,
            )
            .field("tombstone_retention", &self.tombstone_retention)
            .field("tombstone_sweep_interval", &self.tombstone_sweep_interval)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "NOTESYNC_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "NOTESYNC_DATABASE_PATH",
            "notesync-server.db",
        ));
        let content_dir = PathBuf::from(value_or_default(
            &lookup,
            "NOTESYNC_CONTENT_DIR",
            "uploads/notes",
        ));

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let auth_clock_skew_secs = bounded(&lookup, "AUTH_CLOCK_SKEW_SECS", 60, 0..=300)?;
        let rate_limit_window_secs = bounded(&lookup, "RATE_LIMIT_WINDOW_SECS", 900, 10..=3_600)?;
        let sync_rate_limit_per_window =
            bounded(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", 100, 1..=10_000)?;
        let note_write_rate_limit_per_window =
            bounded(&lookup, "NOTE_WRITE_RATE_LIMIT_PER_WINDOW", 300, 1..=10_000)?;
        let tombstone_retention_days = bounded(&lookup, "TOMBSTONE_RETENTION_DAYS", 90, 1..=3_650)?;
        let tombstone_sweep_interval_secs =
            bounded(&lookup, "TOMBSTONE_SWEEP_INTERVAL_SECS", 3_600, 60..=86_400)?;

        Ok(Self {
            bind_addr,
            database_path,
            content_dir,
            jwt_secret,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window: u32::try_from(sync_rate_limit_per_window)
                .unwrap_or(u32::MAX),
            note_write_rate_limit_per_window: u32::try_from(note_write_rate_limit_per_window)
                .unwrap_or(u32::MAX),
            tombstone_retention: Duration::from_secs(tombstone_retention_days * 24 * 60 * 60),
            tombstone_sweep_interval: Duration::from_secs(tombstone_sweep_interval_secs),
        })
    }
}

/// Parse an integer variable, falling back to `default` when unset.
fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
pub(crate) fn test_config(content_dir: impl Into<PathBuf>) -> AppConfig {
    let mut config = AppConfig::from_lookup(|name| {
        (name == "JWT_SECRET").then(|| "test-secret-with-enough-bytes".to_string())
    })
    .unwrap();
    config.content_dir = content_dir.into();
    config
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn config_applies_defaults() {
        let map = HashMap::from([("JWT_SECRET", "0123456789abcdef0123")]);
        let config = config_from(&map).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, PathBuf::from("notesync-server.db"));
        assert_eq!(config.content_dir, PathBuf::from("uploads/notes"));
        assert_eq!(config.rate_limit_window, Duration::from_secs(900));
        assert_eq!(config.sync_rate_limit_per_window, 100);
        assert_eq!(config.note_write_rate_limit_per_window, 300);
        assert_eq!(
            config.tombstone_retention,
            Duration::from_secs(90 * 24 * 60 * 60)
        );
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let map = HashMap::from([
            ("JWT_SECRET", "0123456789abcdef0123"),
            ("RATE_LIMIT_WINDOW_SECS", "5"),
        ]);
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_WINDOW_SECS"));

        let map = HashMap::from([
            ("JWT_SECRET", "0123456789abcdef0123"),
            ("SYNC_RATE_LIMIT_PER_WINDOW", "lots"),
        ]);
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_rejects_short_secret() {
        let map = HashMap::from([("JWT_SECRET", "short")]);
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_redacts_secret_in_debug() {
        let map = HashMap::from([("JWT_SECRET", "sensitive-signing-secret")]);
        let config = config_from(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-signing-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
