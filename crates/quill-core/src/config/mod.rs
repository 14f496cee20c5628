//! Sync engine settings.
//!
//! Provides a `SyncSettings` struct shared by the service and the CLI. Values
//! come from a JSON document or from `QUILL_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::scheduler::{SyncScheduler, DEFAULT_DEBOUNCE};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_RETRY_AFTER_SECS: u64 = 30;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_BATCH_LIMIT: usize = 150;

/// Tunables for scheduling and talking to the sync service.
///
/// A missing `sync_endpoint` means the client runs without a remote account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    /// Quiet period after the last edit before a round fires
    pub debounce_ms: u64,
    /// Delay before retrying a failed round; `None` waits for the next edit
    pub retry_after_secs: Option<u64>,
    /// Retrieval round cadence while idle; `None` disables periodic rounds
    pub sync_interval_secs: Option<u64>,
    /// Most items sent or retrieved per round
    pub batch_limit: usize,
    pub sync_endpoint: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: u64::try_from(DEFAULT_DEBOUNCE.as_millis()).unwrap_or(275),
            retry_after_secs: Some(DEFAULT_RETRY_AFTER_SECS),
            sync_interval_secs: Some(DEFAULT_SYNC_INTERVAL_SECS),
            batch_limit: DEFAULT_BATCH_LIMIT,
            sync_endpoint: None,
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON; omitted fields keep their defaults
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.validated()
    }

    /// Read `QUILL_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from a variable lookup; `0` disables a timer
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(value) = read_number::<u64>(&lookup, "QUILL_DEBOUNCE_MS")? {
            settings.debounce_ms = value;
        }
        if let Some(value) = read_number::<u64>(&lookup, "QUILL_RETRY_AFTER_SECS")? {
            settings.retry_after_secs = (value > 0).then_some(value);
        }
        if let Some(value) = read_number::<u64>(&lookup, "QUILL_SYNC_INTERVAL_SECS")? {
            settings.sync_interval_secs = (value > 0).then_some(value);
        }
        if let Some(value) = read_number::<usize>(&lookup, "QUILL_BATCH_LIMIT")? {
            settings.batch_limit = value;
        }
        settings.sync_endpoint = normalize_text_option(lookup("QUILL_SYNC_ENDPOINT"));

        settings.validated()
    }

    fn validated(mut self) -> Result<Self> {
        if self.batch_limit == 0 {
            return Err(Error::Config("batch_limit must be at least 1".to_string()));
        }
        self.sync_endpoint = match normalize_text_option(self.sync_endpoint) {
            Some(endpoint) if is_http_url(&endpoint) => {
                Some(endpoint.trim_end_matches('/').to_string())
            }
            Some(_) => {
                return Err(Error::Config(
                    "sync_endpoint must include http:// or https://".to_string(),
                ))
            }
            None => None,
        };
        Ok(self)
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        self.sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Whether a remote sync endpoint is configured
    pub const fn has_remote(&self) -> bool {
        self.sync_endpoint.is_some()
    }

    /// Scheduler configured with these timers
    pub fn scheduler(&self, now: Instant) -> SyncScheduler {
        SyncScheduler::new(now)
            .with_debounce(self.debounce())
            .with_retry_after(self.retry_after())
            .with_interval(self.sync_interval())
    }
}

fn read_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{raw}'")))
}
