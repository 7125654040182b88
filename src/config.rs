//! Configuration for admission limits, the reaper, and board lifetimes.
//!
//! Everything is `serde`-friendly. Durations are carried as integer milliseconds so
//! a config file reads `"refill_interval_ms": 1000` rather than a nested struct.
//!
//! ```rust
//! use kanbin_guard::config::GuardConfig;
//!
//! let cfg = GuardConfig::from_json_str(r#"{
//!     "limits": { "board_read": { "capacity": 120, "refill_interval_ms": 500 } },
//!     "retry_after_ms": 30000
//! }"#).unwrap();
//!
//! assert_eq!(cfg.limits.board_read.capacity, 120);
//! assert_eq!(cfg.limits.global.capacity, 200); // untouched classes keep defaults
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::rate_limit::TrafficClass;

const DEFAULT_GLOBAL_PER_MINUTE: u32 = 200;
const DEFAULT_BOARD_READ_PER_MINUTE: u32 = 60;
const DEFAULT_BOARD_WRITE_PER_MINUTE: u32 = 10;
const DEFAULT_REAPER_PERIOD: Duration = Duration::from_secs(60);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_BOARD_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const DEFAULT_MAX_TASKS_PER_BOARD: usize = 100;

/// Errors produced when validating or parsing configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A bucket must hold at least one token.
    #[error("{class}: capacity must be > 0")]
    ZeroCapacity {
        /// Traffic class whose bucket is misconfigured.
        class: &'static str,
    },
    /// A bucket must refill at a finite rate.
    #[error("{class}: refill interval must be > 0")]
    ZeroRefillInterval {
        /// Traffic class whose bucket is misconfigured.
        class: &'static str,
    },
    /// The reaper must run on a positive period.
    #[error("reaper period must be > 0")]
    ZeroReaperPeriod,
    /// Entries must be allowed some idle time before eviction.
    #[error("reaper stale threshold must be > 0")]
    ZeroStaleThreshold,
    /// Boards must live for a positive duration.
    #[error("board ttl must be > 0")]
    ZeroBoardTtl,
    /// Input could not be deserialized.
    #[error("invalid config: {0}")]
    Parse(String),
}

/// Capacity and refill pace of a single token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Burst size; a rested client may spend this many tokens at once.
    pub capacity: u32,
    /// Time it takes to regain one token.
    #[serde(rename = "refill_interval_ms", with = "millis")]
    pub refill_interval: Duration,
}

impl BucketConfig {
    /// Build a bucket config from explicit parts.
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self { capacity, refill_interval }
    }

    /// `n` tokens per minute with a burst of `n`.
    ///
    /// A zero rate yields a config that fails [`validate`](Self::validate).
    pub fn per_minute(n: u32) -> Self {
        let refill_interval =
            if n == 0 { Duration::ZERO } else { Duration::from_secs(60) / n };
        Self { capacity: n, refill_interval }
    }

    /// Check the config, attributing failures to `class`.
    pub fn validate(&self, class: TrafficClass) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity { class: class.as_str() });
        }
        if self.refill_interval.is_zero() {
            return Err(ConfigError::ZeroRefillInterval { class: class.as_str() });
        }
        Ok(())
    }
}

/// Per-class bucket tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassLimits {
    /// Applies to every request, and to any class name that is not recognized.
    pub global: BucketConfig,
    /// Board reads.
    pub board_read: BucketConfig,
    /// Board creation and other writes.
    pub board_write: BucketConfig,
}

impl Default for ClassLimits {
    fn default() -> Self {
        Self {
            global: BucketConfig::per_minute(DEFAULT_GLOBAL_PER_MINUTE),
            board_read: BucketConfig::per_minute(DEFAULT_BOARD_READ_PER_MINUTE),
            board_write: BucketConfig::per_minute(DEFAULT_BOARD_WRITE_PER_MINUTE),
        }
    }
}

impl ClassLimits {
    /// Bucket tuning for `class`.
    pub fn for_class(&self, class: TrafficClass) -> BucketConfig {
        match class {
            TrafficClass::Global => self.global,
            TrafficClass::BoardRead => self.board_read,
            TrafficClass::BoardWrite => self.board_write,
        }
    }

    /// Replace the tuning for one class.
    pub fn with_class(mut self, class: TrafficClass, bucket: BucketConfig) -> Self {
        match class {
            TrafficClass::Global => self.global = bucket,
            TrafficClass::BoardRead => self.board_read = bucket,
            TrafficClass::BoardWrite => self.board_write = bucket,
        }
        self
    }

    /// Validate every class.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for class in TrafficClass::ALL {
            self.for_class(class).validate(class)?;
        }
        Ok(())
    }
}

/// Reaper cadence and eviction threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Time between sweeps.
    #[serde(rename = "period_ms", with = "millis")]
    pub period: Duration,
    /// Idle time after which a client entry is evicted.
    #[serde(rename = "stale_after_ms", with = "millis")]
    pub stale_after: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self { period: DEFAULT_REAPER_PERIOD, stale_after: DEFAULT_STALE_AFTER }
    }
}

impl ReaperConfig {
    /// Validate period and threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::ZeroReaperPeriod);
        }
        if self.stale_after.is_zero() {
            return Err(ConfigError::ZeroStaleThreshold);
        }
        Ok(())
    }
}

/// Top-level configuration for a [`Guard`](crate::Guard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Per-class bucket tuning.
    pub limits: ClassLimits,
    /// Reaper cadence.
    pub reaper: ReaperConfig,
    /// Lifetime of a board from its creation.
    #[serde(rename = "board_ttl_ms", with = "millis")]
    pub board_ttl: Duration,
    /// Hint returned with every rate-limit rejection, regardless of class.
    #[serde(rename = "retry_after_ms", with = "millis")]
    pub retry_after: Duration,
    /// Tasks a board may hold before new ones are refused.
    pub max_tasks_per_board: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            limits: ClassLimits::default(),
            reaper: ReaperConfig::default(),
            board_ttl: DEFAULT_BOARD_TTL,
            retry_after: DEFAULT_RETRY_AFTER,
            max_tasks_per_board: DEFAULT_MAX_TASKS_PER_BOARD,
        }
    }
}

impl GuardConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.reaper.validate()?;
        if self.board_ttl.is_zero() {
            return Err(ConfigError::ZeroBoardTtl);
        }
        Ok(())
    }

    /// Parse a JSON document and validate it. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_limits() {
        let limits = ClassLimits::default();
        assert_eq!(limits.global, BucketConfig::new(200, Duration::from_millis(300)));
        assert_eq!(limits.board_read, BucketConfig::new(60, Duration::from_secs(1)));
        assert_eq!(limits.board_write, BucketConfig::new(10, Duration::from_secs(6)));

        let cfg = GuardConfig::default();
        assert_eq!(cfg.reaper.period, Duration::from_secs(60));
        assert_eq!(cfg.reaper.stale_after, Duration::from_secs(300));
        assert_eq!(cfg.board_ttl, Duration::from_secs(604_800));
        assert_eq!(cfg.retry_after, Duration::from_secs(60));
        assert_eq!(cfg.max_tasks_per_board, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn per_minute_zero_fails_validation() {
        let err = BucketConfig::per_minute(0).validate(TrafficClass::BoardWrite).unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity { class: "board_write" });
    }

    #[test]
    fn zero_interval_is_rejected() {
        let limits = ClassLimits::default()
            .with_class(TrafficClass::BoardRead, BucketConfig::new(5, Duration::ZERO));
        assert_eq!(
            limits.validate().unwrap_err(),
            ConfigError::ZeroRefillInterval { class: "board_read" }
        );
    }

    #[test]
    fn json_overrides_merge_with_defaults() {
        let cfg = GuardConfig::from_json_str(
            r#"{"reaper": {"period_ms": 1000}, "board_ttl_ms": 3600000}"#,
        )
        .unwrap();
        assert_eq!(cfg.reaper.period, Duration::from_secs(1));
        assert_eq!(cfg.reaper.stale_after, Duration::from_secs(300));
        assert_eq!(cfg.board_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.limits, ClassLimits::default());
    }

    #[test]
    fn json_validation_errors_surface() {
        let err = GuardConfig::from_json_str(r#"{"reaper": {"period_ms": 0}}"#).unwrap_err();
        assert_eq!(err, ConfigError::ZeroReaperPeriod);

        let err = GuardConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serializes_durations_as_millis() {
        let json = serde_json::to_value(BucketConfig::per_minute(60)).unwrap();
        assert_eq!(json, serde_json::json!({"capacity": 60, "refill_interval_ms": 1000}));
    }
}
