//! Tracker configuration.

use std::time::Duration;

/// Default retention for journeys and conversions (90 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Default interval between retention sweeps.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default time-decay half-life, in days.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 7.0;

/// Default export flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Default max export batch size.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default export request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where finished conversions are shipped.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub(crate) host: String,
    pub(crate) key: String,
}

impl ExportConfig {
    /// Get the collector host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the collector key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) retention: Duration,
    pub(crate) eviction_interval: Duration,
    pub(crate) half_life_days: f64,
    pub(crate) export: Option<ExportConfig>,
    pub(crate) flush_interval: Duration,
    pub(crate) max_batch_size: usize,
    pub(crate) timeout: Duration,
}

impl Config {
    /// How long an idle journey (or a conversion) is kept.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Get the retention sweep interval.
    pub fn eviction_interval(&self) -> Duration {
        self.eviction_interval
    }

    /// Get the time-decay half-life in days.
    pub fn half_life_days(&self) -> f64 {
        self.half_life_days
    }

    /// Get the export target, if conversions are exported.
    pub fn export(&self) -> Option<&ExportConfig> {
        self.export.as_ref()
    }

    /// Get the export flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Get the max export batch size.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Get the export request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`Tracker`](crate::Tracker).
#[derive(Debug, Default)]
pub struct TrackerBuilder {
    retention: Option<Duration>,
    eviction_interval: Option<Duration>,
    half_life_days: Option<f64>,
    export_host: Option<String>,
    export_key: Option<String>,
    flush_interval: Option<Duration>,
    max_batch_size: Option<usize>,
    timeout: Option<Duration>,
}

impl TrackerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long idle journeys and old conversions are retained.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Set the retention sweep interval.
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    /// Set the time-decay half-life in days.
    pub fn half_life_days(mut self, days: f64) -> Self {
        self.half_life_days = Some(days);
        self
    }

    /// Export finished conversions to `host`, authenticated by `key`.
    pub fn export_to(mut self, host: impl Into<String>, key: impl Into<String>) -> Self {
        self.export_host = Some(host.into());
        self.export_key = Some(key.into());
        self
    }

    /// Set the export flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Set the max export batch size.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Set the export request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub(crate) fn build_config(self) -> Result<Config, crate::Error> {
        let half_life_days = self.half_life_days.unwrap_or(DEFAULT_HALF_LIFE_DAYS);
        if !half_life_days.is_finite() || half_life_days <= 0.0 {
            return Err(crate::Error::Config(
                "half_life_days must be a positive number".into(),
            ));
        }

        let retention = self.retention.unwrap_or(DEFAULT_RETENTION);
        if retention.is_zero() {
            return Err(crate::Error::Config("retention cannot be zero".into()));
        }

        let eviction_interval = self.eviction_interval.unwrap_or(DEFAULT_EVICTION_INTERVAL);
        if eviction_interval.is_zero() {
            return Err(crate::Error::Config(
                "eviction_interval cannot be zero".into(),
            ));
        }

        let max_batch_size = self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE);
        if max_batch_size == 0 {
            return Err(crate::Error::Config("max_batch_size cannot be zero".into()));
        }

        let flush_interval = self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL);
        if flush_interval.is_zero() {
            return Err(crate::Error::Config("flush_interval cannot be zero".into()));
        }

        let export = match (self.export_host, self.export_key) {
            (Some(host), Some(key)) => {
                if host.is_empty() {
                    return Err(crate::Error::Config("export host cannot be empty".into()));
                }
                if key.is_empty() {
                    return Err(crate::Error::Config("export key cannot be empty".into()));
                }
                Some(ExportConfig { host, key })
            }
            _ => None,
        };

        Ok(Config {
            retention,
            eviction_interval,
            half_life_days,
            export,
            flush_interval,
            max_batch_size,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}
