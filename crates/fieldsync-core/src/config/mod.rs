//! Engine configuration.
//!
//! Provides `EngineConfig`, the tunables for the remote client and the sync
//! engine, loadable from `FIELDSYNC_*` environment variables.

use std::env;
use std::time::Duration;

use crate::util::{is_http_url, non_blank};
use crate::{Error, Result};

const ENV_API_URL: &str = "FIELDSYNC_API_URL";
const ENV_DEVICE_ID: &str = "FIELDSYNC_DEVICE_ID";
const ENV_REQUEST_TIMEOUT_SECS: &str = "FIELDSYNC_REQUEST_TIMEOUT_SECS";
const ENV_MAX_QUEUE_ATTEMPTS: &str = "FIELDSYNC_MAX_QUEUE_ATTEMPTS";
const ENV_AUDIT_RETENTION_DAYS: &str = "FIELDSYNC_AUDIT_RETENTION_DAYS";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_AUDIT_RETENTION_DAYS: u32 = 365;
const DEFAULT_AUDIT_BATCH_SIZE: usize = 100;

/// Bounded exponential backoff: `min(max_delay, base_delay * 2^attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Retry without waiting (tests, manual triggers)
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    /// Remote client default: 3 retries, 250 ms doubling up to 4 s
    #[must_use]
    pub const fn http_default() -> Self {
        Self::new(3, Duration::from_millis(250), Duration::from_secs(4))
    }

    /// Queue default: 5 attempts, 2 s doubling up to 5 min
    #[must_use]
    pub const fn queue_default() -> Self {
        Self::new(5, Duration::from_secs(2), Duration::from_secs(300))
    }

    /// Delay before the retry that follows `attempt` failures
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Configuration for the remote client and sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the remote authority (no trailing slash)
    pub api_base_url: String,
    /// Stable per-device identifier; generated and persisted when absent
    pub device_id: Option<String>,
    /// Sent as `X-Client-Version` for diagnostics
    pub client_version: String,
    pub request_timeout: Duration,
    pub http_retry: RetryPolicy,
    pub queue_backoff: RetryPolicy,
    /// Background worker timer; `None` means wake-ups only
    pub auto_sync_interval: Option<Duration>,
    pub audit_retention_days: u32,
    pub audit_batch_size: usize,
}

impl EngineConfig {
    /// Create a configuration with defaults for everything but the URL
    pub fn new(api_base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_base_url: normalize_api_url(api_base_url.into(), ENV_API_URL)?,
            device_id: None,
            client_version: default_client_version(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            http_retry: RetryPolicy::http_default(),
            queue_backoff: RetryPolicy::queue_default(),
            auto_sync_interval: Some(Duration::from_secs(60)),
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
            audit_batch_size: DEFAULT_AUDIT_BATCH_SIZE,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no API URL is set (local-only mode).
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = non_blank(Some(device_id.into()));
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_http_retry(mut self, retry: RetryPolicy) -> Self {
        self.http_retry = retry;
        self
    }

    #[must_use]
    pub const fn with_queue_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.queue_backoff = backoff;
        self
    }

    /// Disable the background worker's timer (manual and wake-up syncs only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.auto_sync_interval = None;
        self
    }
}

fn default_client_version() -> String {
    format!("fieldsync/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<EngineConfig>> {
    let Some(api_url) = non_blank(lookup(ENV_API_URL)) else {
        return Ok(None);
    };

    let mut config = EngineConfig::new(api_url)?;

    if let Some(device_id) = non_blank(lookup(ENV_DEVICE_ID)) {
        config = config.with_device_id(device_id);
    }

    if let Some(secs) = parse_number::<u64>(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
        if secs == 0 {
            return Err(Error::InvalidInput(format!(
                "{ENV_REQUEST_TIMEOUT_SECS} must be greater than zero"
            )));
        }
        config.request_timeout = Duration::from_secs(secs);
    }

    if let Some(attempts) = parse_number::<u32>(&lookup, ENV_MAX_QUEUE_ATTEMPTS)? {
        config.queue_backoff.max_retries = attempts;
    }

    if let Some(days) = parse_number::<u32>(&lookup, ENV_AUDIT_RETENTION_DAYS)? {
        config.audit_retention_days = days;
    }

    Ok(Some(config))
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = non_blank(lookup(key)) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer, got '{raw}'")))
}

fn normalize_api_url(raw: String, field: &str) -> Result<String> {
    let value = non_blank(Some(raw))
        .ok_or_else(|| Error::InvalidInput(format!("{field} is required")))?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "{field} must start with http:// or https://"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<Option<EngineConfig>> {
        parse_config(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn parse_config_without_url_is_local_only() {
        let map = HashMap::new();
        assert!(parse_from_map(&map).unwrap().is_none());
    }

    #[test]
    fn parse_config_applies_overrides_and_trims_url() {
        let mut map = HashMap::new();
        map.insert(ENV_API_URL, " https://api.example.com/v1/ ");
        map.insert(ENV_DEVICE_ID, "tablet-7");
        map.insert(ENV_REQUEST_TIMEOUT_SECS, "5");
        map.insert(ENV_MAX_QUEUE_ATTEMPTS, "8");
        map.insert(ENV_AUDIT_RETENTION_DAYS, "30");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com/v1");
        assert_eq!(config.device_id.as_deref(), Some("tablet-7"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.queue_backoff.max_retries, 8);
        assert_eq!(config.audit_retention_days, 30);
    }

    #[test]
    fn parse_config_rejects_url_without_scheme() {
        let mut map = HashMap::new();
        map.insert(ENV_API_URL, "api.example.com");

        match parse_from_map(&map).unwrap_err() {
            Error::InvalidInput(message) => assert!(message.contains(ENV_API_URL)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_config_names_invalid_numeric_variable() {
        let mut map = HashMap::new();
        map.insert(ENV_API_URL, "https://api.example.com");
        map.insert(ENV_MAX_QUEUE_ATTEMPTS, "lots");

        match parse_from_map(&map).unwrap_err() {
            Error::InvalidInput(message) => assert!(message.contains(ENV_MAX_QUEUE_ATTEMPTS)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn delay_for_attempt_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(7), Duration::ZERO);
    }
}
