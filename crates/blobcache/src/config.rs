//! Cache configuration
//!
//! Loaded from JSON. Every field is optional and falls back to its default:
//!
//! ```json
//! {
//!   "max_size": 33554432,
//!   "hit_trace_label": "CachingInterface::CacheHit",
//!   "pressure": { "moderate_percent": 25, "critical_percent": 0 }
//! }
//! ```

use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::cache::MemoryCache;
use crate::error::{Error, Result};
use crate::pressure::TieredPolicy;

/// Default byte budget per cache (32 MiB)
pub const DEFAULT_MAX_SIZE: usize = 32 * 1024 * 1024;

/// Default trace label emitted on cache hits
pub const DEFAULT_HIT_TRACE_LABEL: &str = "CachingInterface::CacheHit";

/// Settings for building a [`MemoryCache`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Byte budget of each cache
    pub max_size: usize,

    /// Trace label for cache hits, empty disables it
    pub hit_trace_label: String,

    /// Shrink targets under memory pressure
    pub pressure: TieredPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            hit_trace_label: DEFAULT_HIT_TRACE_LABEL.to_string(),
            pressure: TieredPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject settings the pressure policy cannot honour
    pub fn validate(&self) -> Result<()> {
        let TieredPolicy {
            moderate_percent,
            critical_percent,
        } = self.pressure;

        if moderate_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "pressure.moderate_percent must be at most 100, got {}",
                moderate_percent
            )));
        }
        if critical_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "pressure.critical_percent must be at most 100, got {}",
                critical_percent
            )));
        }
        // Critical pressure must never keep more than moderate pressure.
        if critical_percent > moderate_percent {
            return Err(Error::InvalidConfig(format!(
                "pressure.critical_percent ({}) exceeds pressure.moderate_percent ({})",
                critical_percent, moderate_percent
            )));
        }
        Ok(())
    }

    /// Build a cache from these settings
    pub fn build(&self) -> MemoryCache {
        MemoryCache::with_policy(self.max_size, &self.hit_trace_label, self.pressure)
    }
}
