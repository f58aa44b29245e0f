//! Client sync configuration.
//!
//! Values come from the process environment in production and from plain maps
//! in tests. A missing API URL selects local-only mode.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TRASH_RETENTION_DAYS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by every client of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Base URL of the notes API, without trailing slash
    pub api_base_url: Option<String>,
    /// Period of the auto-sync tick
    pub sync_interval: Duration,
    /// Age after which trashed notes are purged by the sweep
    pub trash_retention: Duration,
    /// Per-request timeout of the HTTP transport
    pub http_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            trash_retention: Duration::from_secs(DEFAULT_TRASH_RETENTION_DAYS * SECONDS_PER_DAY),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = match normalize_text_option(lookup("NOTESYNC_API_URL")) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => {
                return Err(ConfigError::Invalid(
                    "NOTESYNC_API_URL must start with http:// or https://".to_string(),
                ))
            }
            None => None,
        };

        let sync_interval_secs = parse_in_range(
            &lookup,
            "NOTESYNC_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
            5..=3_600,
        )?;
        let retention_days = parse_in_range(
            &lookup,
            "NOTESYNC_TRASH_RETENTION_DAYS",
            DEFAULT_TRASH_RETENTION_DAYS,
            1..=365,
        )?;
        let http_timeout_secs = parse_in_range(
            &lookup,
            "NOTESYNC_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
            1..=300,
        )?;

        Ok(Self {
            api_base_url,
            sync_interval: Duration::from_secs(sync_interval_secs),
            trash_retention: Duration::from_secs(retention_days * SECONDS_PER_DAY),
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    /// Whether a remote store is configured
    pub const fn is_configured(&self) -> bool {
        self.api_base_url.is_some()
    }

    /// Trash retention window in milliseconds
    pub fn trash_retention_millis(&self) -> i64 {
        i64::try_from(self.trash_retention.as_millis()).unwrap_or(i64::MAX)
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = raw.parse::<u64>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(pairs: &[(&str, &str)]) -> Result<SyncSettings, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncSettings::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_to_local_only_mode() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert!(!settings.is_configured());
        assert_eq!(settings.sync_interval, Duration::from_secs(30));
        assert_eq!(settings.trash_retention_millis(), 30 * 86_400_000);
    }

    #[test]
    fn trims_trailing_slash_from_api_url() {
        let settings = settings(&[("NOTESYNC_API_URL", " https://notes.example.com/ ")]).unwrap();
        assert_eq!(
            settings.api_base_url.as_deref(),
            Some("https://notes.example.com")
        );
    }

    #[test]
    fn rejects_non_http_api_url() {
        let err = settings(&[("NOTESYNC_API_URL", "notes.example.com")]).unwrap_err();
        assert!(err.to_string().contains("NOTESYNC_API_URL"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(settings(&[("NOTESYNC_SYNC_INTERVAL_SECS", "1")]).is_err());
        assert!(settings(&[("NOTESYNC_SYNC_INTERVAL_SECS", "abc")]).is_err());
        assert!(settings(&[("NOTESYNC_TRASH_RETENTION_DAYS", "0")]).is_err());

        let settings = settings(&[("NOTESYNC_TRASH_RETENTION_DAYS", "7")]).unwrap();
        assert_eq!(settings.trash_retention, Duration::from_secs(7 * 86_400));
    }
}
