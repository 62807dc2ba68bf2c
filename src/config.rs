//! Archiver tuning knobs and their environment overrides.

use std::time::Duration;

/// Tuning for [`crate::archive::archiver::MessageArchiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverConfig {
    /// Maximum message ids per batch record.
    pub batch_size: usize,
    /// Ids fetched per index page while planning.
    pub id_page_size: usize,
    /// Upper bound on the wait for the index to reflect a finished operation.
    pub index_convergence_timeout: Duration,
    /// Delay between index polls during that wait.
    pub index_poll_interval: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            id_page_size: 1024,
            index_convergence_timeout: Duration::from_secs(5 * 60),
            index_poll_interval: Duration::from_millis(500),
        }
    }
}

impl ArchiverConfig {
    /// Loads configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `GROUPARCHIVE_BATCH_SIZE`: ids per batch (default: 1000)
    /// - `GROUPARCHIVE_ID_PAGE_SIZE`: ids per index page (default: 1024)
    /// - `GROUPARCHIVE_INDEX_TIMEOUT_SECS`: index convergence timeout (default: 300)
    /// - `GROUPARCHIVE_INDEX_POLL_MS`: index poll interval (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ArchiverConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let batch_size = positive(&lookup, "GROUPARCHIVE_BATCH_SIZE")?.unwrap_or(defaults.batch_size as u64);
        let id_page_size =
            positive(&lookup, "GROUPARCHIVE_ID_PAGE_SIZE")?.unwrap_or(defaults.id_page_size as u64);
        let index_convergence_timeout = positive(&lookup, "GROUPARCHIVE_INDEX_TIMEOUT_SECS")?
            .map_or(defaults.index_convergence_timeout, Duration::from_secs);
        let index_poll_interval = positive(&lookup, "GROUPARCHIVE_INDEX_POLL_MS")?
            .map_or(defaults.index_poll_interval, Duration::from_millis);

        Ok(Self {
            batch_size: batch_size as usize,
            id_page_size: id_page_size as usize,
            index_convergence_timeout,
            index_poll_interval,
        })
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(Some(v)),
        _ => Err(ConfigError::Invalid(key, "must be a positive integer")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
