//! Configuration for the cache engine.
//!
//! # Example
//!
//! ```
//! use tagcache::{CacheConfig, DurationMs};
//!
//! // Minimal config (uses defaults)
//! let config = CacheConfig::default();
//! assert_eq!(config.prefix, "qc");
//! assert_eq!(config.default_ttl.as_millis(), 30_000);
//! assert!(config.default_grace.is_none());
//!
//! // Full config; durations accept "1.5m"-style strings too
//! let config = CacheConfig {
//!     prefix: "shop".to_string(),
//!     default_ttl: "2m".parse().unwrap(),
//!     default_grace: Some(DurationMs::from_millis(10_000)),
//!     verify_percent: 0.25,
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::CacheError;

/// A duration in integer milliseconds.
///
/// Accepts either a numeric milliseconds value or a string of the form
/// `N(s|m|h|d|w|ms)` with an optional fractional part; the result is
/// floored to integer milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DurationMs(u64);

impl DurationMs {
    /// Zero milliseconds. As a grace value this means "grace disabled".
    pub const ZERO: DurationMs = DurationMs(0);

    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl From<u64> for DurationMs {
    fn from(ms: u64) -> Self {
        Self(ms)
    }
}

impl From<Duration> for DurationMs {
    fn from(d: Duration) -> Self {
        Self(d.as_millis() as u64)
    }
}

impl FromStr for DurationMs {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .char_indices()
            .find(|(_, c)| c.is_ascii_alphabetic())
            .map_or(s.len(), |(i, _)| i);
        let (number, unit) = s.split_at(split);
        let multiplier: u64 = match unit {
            "" | "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            _ => {
                return Err(CacheError::Config(format!(
                    "invalid duration unit in {s:?} (expected s, m, h, d, w, or ms)"
                )))
            }
        };
        let value: f64 = number
            .parse()
            .map_err(|_| CacheError::Config(format!("invalid duration {s:?}")))?;
        if !value.is_finite() || value < 0.0 {
            return Err(CacheError::Config(format!("invalid duration {s:?}")));
        }
        Ok(Self((value * multiplier as f64).floor() as u64))
    }
}

impl<'de> Deserialize<'de> for DurationMs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = DurationMs;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("milliseconds or a duration string like \"30s\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(DurationMs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(DurationMs)
                    .map_err(|_| E::custom("duration must be non-negative"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative number"));
                }
                Ok(DurationMs(v.floor() as u64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(|err: CacheError| E::custom(err))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Configuration for the cache engine.
///
/// All fields have sensible defaults. Validated by
/// [`CacheEngine::new`](crate::CacheEngine::new).
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Namespace prefix prepended to every cache key.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Default freshness window.
    #[serde(default = "default_ttl")]
    pub default_ttl: DurationMs,

    /// Default grace window beyond the TTL. `None` (or zero) disables
    /// stale-while-revalidate by default.
    #[serde(default)]
    pub default_grace: Option<DurationMs>,

    /// Sampling rate for background verification, in `[0, 1]`.
    #[serde(default = "default_verify_percent")]
    pub verify_percent: f64,
}

fn default_prefix() -> String {
    "qc".to_string()
}
fn default_ttl() -> DurationMs {
    DurationMs::from_millis(30_000)
}
fn default_verify_percent() -> f64 {
    0.1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            default_ttl: default_ttl(),
            default_grace: None,
            verify_percent: default_verify_percent(),
        }
    }
}

impl CacheConfig {
    /// Check the config for out-of-range knobs.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(0.0..=1.0).contains(&self.verify_percent) {
            return Err(CacheError::Config(format!(
                "verify_percent must be within [0, 1], got {}",
                self.verify_percent
            )));
        }
        Ok(())
    }
}

/// Per-query overrides for TTL and grace.
///
/// Unset fields fall back to the engine defaults. A zero grace disables
/// the grace window for this query even when a default grace is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub ttl: Option<DurationMs>,
    pub grace: Option<DurationMs>,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ttl(mut self, ttl: impl Into<DurationMs>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    #[must_use]
    pub fn grace(mut self, grace: impl Into<DurationMs>) -> Self {
        self.grace = Some(grace.into());
        self
    }
}
