//! Queue and connection configuration.

use crate::backoff::BackoffPolicy;
use crate::error::{QueueError, QueueResult};
use crate::job::DEFAULT_MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default job record lifetime, refreshed on every write.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(86_400);

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Database number (0-15).
    pub database: Option<u8>,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://localhost:6379")
    }
}

impl RedisConfig {
    /// Create a new configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: None,
            username: None,
            password: None,
        }
    }

    /// Set the database number.
    pub fn with_database(mut self, db: u8) -> Self {
        self.database = Some(db);
        self
    }

    /// Set credentials. Without a username the legacy password-only form is used.
    pub fn with_credentials(mut self, username: Option<String>, password: impl Into<String>) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Load from `OFFLOAD_REDIS_URL` (or `REDIS_URL`), `REDIS_DATABASE`,
    /// `REDIS_USERNAME` and `REDIS_PASSWORD`.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let url = lookup("OFFLOAD_REDIS_URL")
            .or_else(|| lookup("REDIS_URL"))
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let mut config = Self::new(url);
        config.database = parse_var(&lookup, "REDIS_DATABASE")?;
        config.username = lookup("REDIS_USERNAME");
        config.password = lookup("REDIS_PASSWORD");
        Ok(config)
    }

    /// Get the full Redis URL with auth and database.
    pub fn connection_url(&self) -> String {
        let mut url = self.url.clone();

        if let Some(password) = &self.password {
            let auth = match &self.username {
                Some(username) => format!("{}:{}@", username, password),
                None => format!(":{}@", password),
            };
            for scheme in ["redis://", "rediss://"] {
                if let Some(rest) = url.strip_prefix(scheme) {
                    url = format!("{}{}{}", scheme, auth, rest);
                    break;
                }
            }
        }

        if let Some(db) = self.database {
            let has_path = url
                .split_once("://")
                .is_some_and(|(_, rest)| rest.contains('/'));
            if !has_path {
                url = format!("{}/{}", url, db);
            }
        }

        url
    }
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name
    pub queue_name: String,

    /// Key prefix for backend keys
    pub key_prefix: String,

    /// Lifetime of a job record after its latest write
    #[serde(with = "duration_secs", rename = "job_ttl_seconds")]
    pub job_ttl: Duration,

    /// Attempts granted to newly submitted jobs
    pub max_attempts: u32,

    /// Delay between attempts
    pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("analysis")
    }
}

impl QueueConfig {
    /// Create a new queue configuration.
    pub fn new(queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        Self {
            key_prefix: format!("offload:{}", queue_name),
            queue_name,
            job_ttl: DEFAULT_JOB_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the job record lifetime.
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    /// Set the default attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load from `OFFLOAD_*` environment variables, falling back to defaults.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = match lookup("OFFLOAD_QUEUE_NAME") {
            Some(name) => Self::new(name),
            None => Self::default(),
        };

        if let Some(prefix) = lookup("OFFLOAD_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(max_attempts) = parse_var(&lookup, "OFFLOAD_MAX_ATTEMPTS")? {
            config.max_attempts = max_attempts;
        }
        if let Some(secs) = parse_var(&lookup, "OFFLOAD_JOB_TTL_SECONDS")? {
            config.job_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "OFFLOAD_BACKOFF_BASE_MS")? {
            config.backoff.base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "OFFLOAD_BACKOFF_CAP_MS")? {
            config.backoff.cap = Duration::from_millis(ms);
        }
        if let Some(jitter) = parse_var(&lookup, "OFFLOAD_BACKOFF_JITTER")? {
            config.backoff.jitter = jitter;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the queue cannot honor.
    pub fn validate(&self) -> QueueResult<()> {
        if self.max_attempts == 0 {
            return Err(QueueError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.job_ttl.is_zero() {
            return Err(QueueError::Config("job_ttl must be non-zero".to_string()));
        }
        if self.backoff.cap < self.backoff.base {
            return Err(QueueError::Config(format!(
                "backoff cap {:?} is below base {:?}",
                self.backoff.cap, self.backoff.base
            )));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(QueueError::Config(format!(
                "backoff jitter {} must be in [0, 1)",
                self.backoff.jitter
            )));
        }
        Ok(())
    }

    /// Build a backend key.
    pub(crate) fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

/// Parse an optional variable, rejecting values that do not parse.
pub(crate) fn parse_var<T>(lookup: impl Fn(&str) -> Option<String>, name: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| QueueError::Config(format!("invalid {}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
