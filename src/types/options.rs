//! Configuration for the producer loop and the commit phase.
//!
//! Durations are stored as millisecond integers so config files stay plain JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_COLLECTION,
    DEFAULT_COMMIT_CONCURRENCY, DEFAULT_FEED_ENDPOINT, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_LAMAX,
    DEFAULT_LAMIN, DEFAULT_LOMAX, DEFAULT_LOMIN, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_MS,
    MAX_BATCH_SIZE,
};
use crate::{FlightsyncError, Result};

/// Geographic query window in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lamin: f64,
    pub lamax: f64,
    pub lomin: f64,
    pub lomax: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            lamin: DEFAULT_LAMIN,
            lamax: DEFAULT_LAMAX,
            lomin: DEFAULT_LOMIN,
            lomax: DEFAULT_LOMAX,
        }
    }
}

impl BoundingBox {
    fn validate(&self) -> Result<()> {
        let in_range = (-90.0..=90.0).contains(&self.lamin)
            && (-90.0..=90.0).contains(&self.lamax)
            && (-180.0..=180.0).contains(&self.lomin)
            && (-180.0..=180.0).contains(&self.lomax);
        if !in_range || self.lamin >= self.lamax || self.lomin >= self.lomax {
            return Err(FlightsyncError::InvalidConfig {
                reason: format!(
                    "bounding box [{}, {}] x [{}, {}] is empty or out of range",
                    self.lamin, self.lamax, self.lomin, self.lomax
                ),
            });
        }
        Ok(())
    }
}

/// How duplicate ids inside one feed snapshot are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    KeepFirst,
    #[default]
    KeepLast,
    /// Drop every record carrying a duplicated id and count each as malformed.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Bounded retry schedule for failed chunks and resubscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffKind::Exponential,
            base_delay_ms: DEFAULT_BACKOFF_BASE_MS,
            max_delay_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffKind::Fixed,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// `max_retries` retries with no delay between them.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let millis = match self.backoff {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let shift = retry.saturating_sub(1).min(10);
                self.base_delay_ms.saturating_mul(1_u64 << shift)
            }
        };
        Duration::from_millis(millis.min(self.max_delay_ms.max(self.base_delay_ms)))
    }
}

fn default_endpoint() -> String {
    DEFAULT_FEED_ENDPOINT.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_COMMIT_CONCURRENCY
}

/// Everything the producer loop reads from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Service-account credentials consumed by the store adapter.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    /// Start-to-start spacing of producer cycles.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Operations per atomic batch, at most 500.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Chunks committed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            bounding_box: BoundingBox::default(),
            collection: default_collection(),
            credentials_path: None,
            poll_interval_ms: default_poll_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_batch_size: default_max_batch_size(),
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Start a fluent builder for `SyncConfig`.
    #[must_use]
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Read a JSON config file; missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs_err::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(FlightsyncError::InvalidConfig {
                reason: format!(
                    "max_batch_size must be within 1..={MAX_BATCH_SIZE}, got {}",
                    self.max_batch_size
                ),
            });
        }
        if self.concurrency == 0 {
            return Err(FlightsyncError::InvalidConfig {
                reason: "concurrency must be at least 1".into(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(FlightsyncError::InvalidConfig {
                reason: "poll_interval_ms must be non-zero".into(),
            });
        }
        if self.fetch_timeout_ms == 0 {
            return Err(FlightsyncError::InvalidConfig {
                reason: "fetch_timeout_ms must be non-zero".into(),
            });
        }
        if self.collection.trim().is_empty() {
            return Err(FlightsyncError::InvalidConfig {
                reason: "collection name is empty".into(),
            });
        }
        self.bounding_box.validate()
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncConfigBuilder {
    inner: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.inner.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.inner.bounding_box = bounding_box;
        self
    }

    pub fn collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.inner.collection = collection.into();
        self
    }

    pub fn credentials_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.inner.credentials_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.inner.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.inner.fetch_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.inner.max_batch_size = size;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.inner.concurrency = workers;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.inner.retry = retry;
        self
    }

    #[must_use]
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.inner.duplicate_policy = policy;
        self
    }

    /// Finish and validate.
    pub fn build(self) -> Result<SyncConfig> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}
