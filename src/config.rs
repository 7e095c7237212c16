//! Connection configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{connection::RetryPolicy, error::Error, pagination::PaginationHeaders};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Base URL every resource path is appended to
    pub base_url: String,

    /// Page size assumed for offset math when a query sets neither
    /// per-page nor a usable limit
    pub default_per_page: u64,

    /// Largest page size ever requested
    pub max_per_page: u64,

    /// Per-request timeout of the HTTP transport
    pub timeout_ms: u64,

    /// Key wrapping list rows in collection responses, if the backend uses one
    pub collection_envelope: Option<String>,

    /// Fail materialization on response keys the schema does not declare
    pub strict_attributes: bool,

    pub pagination_headers: PaginationHeaders,

    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            default_per_page: 20,
            max_per_page: 50,
            timeout_ms: 30_000,
            collection_envelope: None,
            strict_attributes: false,
            pagination_headers: PaginationHeaders::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `RESTAR_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = env::var("RESTAR_BASE_URL")
            .map_err(|_| Error::Config("RESTAR_BASE_URL is required".to_string()))?;

        let mut config = Self::new(base_url);
        config.default_per_page = env_or("RESTAR_DEFAULT_PER_PAGE", config.default_per_page)?;
        config.max_per_page = env_or("RESTAR_MAX_PER_PAGE", config.max_per_page)?;
        config.timeout_ms = env_or("RESTAR_TIMEOUT_MS", config.timeout_ms)?;
        config.collection_envelope = env::var("RESTAR_COLLECTION_ENVELOPE").ok();
        config.strict_attributes = env_or("RESTAR_STRICT_ATTRIBUTES", config.strict_attributes)?;

        config.retry.enabled = env_or("RESTAR_RETRY", config.retry.enabled)?;
        config.retry.max_retries = env_or("RESTAR_MAX_RETRIES", config.retry.max_retries)?;
        config.retry.max_total_wait_ms =
            env_or("RESTAR_MAX_RETRY_WAIT_MS", config.retry.max_total_wait_ms)?;
        config.retry.base_interval_ms =
            env_or("RESTAR_RETRY_INTERVAL_MS", config.retry.base_interval_ms)?;
        config.retry.multiplier = env_or("RESTAR_RETRY_MULTIPLIER", config.retry.multiplier)?;

        Ok(config)
    }

    pub fn with_max_per_page(mut self, max_per_page: u64) -> Self {
        self.max_per_page = max_per_page;
        self
    }

    pub fn with_default_per_page(mut self, default_per_page: u64) -> Self {
        self.default_per_page = default_per_page;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pagination_headers(mut self, headers: PaginationHeaders) -> Self {
        self.pagination_headers = headers;
        self
    }

    pub fn with_collection_envelope(mut self, key: impl Into<String>) -> Self {
        self.collection_envelope = Some(key.into());
        self
    }

    pub fn with_strict_attributes(mut self, strict: bool) -> Self {
        self.strict_attributes = strict;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Trims the trailing slash and rejects an empty or unparsable base URL.
    pub(crate) fn validate(mut self) -> Result<Self, Error> {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(Error::Config("the `base_url` option must be set".to_string()));
        }
        url::Url::parse(&trimmed)
            .map_err(|e| Error::Config(format!("invalid base_url `{}`: {}", trimmed, e)))?;
        if self.max_per_page == 0 {
            return Err(Error::Config("`max_per_page` must be positive".to_string()));
        }
        self.base_url = trimmed;
        Ok(self)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, Error> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid {}: `{}`", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{Mutex, MutexGuard, const_mutex};

    const ENV_VARS: &[&str] = &[
        "RESTAR_BASE_URL",
        "RESTAR_DEFAULT_PER_PAGE",
        "RESTAR_MAX_PER_PAGE",
        "RESTAR_TIMEOUT_MS",
        "RESTAR_COLLECTION_ENVELOPE",
        "RESTAR_STRICT_ATTRIBUTES",
        "RESTAR_RETRY",
        "RESTAR_MAX_RETRIES",
        "RESTAR_MAX_RETRY_WAIT_MS",
        "RESTAR_RETRY_INTERVAL_MS",
        "RESTAR_RETRY_MULTIPLIER",
    ];

    static ENV_LOCK: Mutex<()> = const_mutex(());

    /// Holds the environment for one test and clears `RESTAR_*` on both ends.
    struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, &str)]) -> Self {
            let lock = ENV_LOCK.lock();
            clear_env();
            for (name, value) in vars {
                // SAFETY: every test touching the environment holds ENV_LOCK.
                unsafe { env::set_var(name, value) };
            }
            Self { _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            clear_env();
        }
    }

    fn clear_env() {
        for name in ENV_VARS {
            // SAFETY: only called while ENV_LOCK is held.
            unsafe { env::remove_var(name) };
        }
    }

    #[test]
    fn test_from_env() {
        let _env = EnvGuard::new(&[
            ("RESTAR_BASE_URL", "https://api.example.com/v2"),
            ("RESTAR_MAX_PER_PAGE", "100"),
            ("RESTAR_COLLECTION_ENVELOPE", "items"),
            ("RESTAR_RETRY", "true"),
            ("RESTAR_MAX_RETRIES", " 3 "),
        ]);
        let config = ConnectionConfig::from_env().unwrap();
        assert_eq!(config.base_url, "https://api.example.com/v2");
        assert_eq!(config.max_per_page, 100);
        assert_eq!(config.default_per_page, 20);
        assert_eq!(config.collection_envelope.as_deref(), Some("items"));
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_from_env_requires_base_url() {
        let _env = EnvGuard::new(&[("RESTAR_MAX_PER_PAGE", "10")]);
        assert!(matches!(ConnectionConfig::from_env(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_env_rejects_malformed_values() {
        let _env = EnvGuard::new(&[
            ("RESTAR_BASE_URL", "https://api.example.com"),
            ("RESTAR_MAX_PER_PAGE", "lots"),
        ]);
        match ConnectionConfig::from_env() {
            Err(Error::Config(message)) => assert!(message.contains("RESTAR_MAX_PER_PAGE")),
            other => panic!("expected a config error, got {:?}", other),
        }

        drop(_env);
        let _env = EnvGuard::new(&[
            ("RESTAR_BASE_URL", "https://api.example.com"),
            ("RESTAR_RETRY", "sometimes"),
        ]);
        assert!(matches!(ConnectionConfig::from_env(), Err(Error::Config(_))));
    }

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("https://api.example.com/");
        assert_eq!(config.default_per_page, 20);
        assert_eq!(config.max_per_page, 50);
        assert!(!config.retry.enabled);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_interval_ms, 250);
    }

    #[test]
    fn test_validate_trims_and_rejects_empty() {
        let config = ConnectionConfig::new("https://api.example.com/v1/")
            .validate()
            .unwrap();
        assert_eq!(config.base_url, "https://api.example.com/v1");

        assert!(matches!(
            ConnectionConfig::new("  ").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ConnectionConfig::new("not a url").validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "base_url": "https://api.example.com",
            "max_per_page": 100,
            "retry": { "enabled": true, "max_retries": 3 }
        }))
        .unwrap();
        assert_eq!(config.max_per_page, 100);
        assert_eq!(config.default_per_page, 20);
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.multiplier, 2);
    }
}
