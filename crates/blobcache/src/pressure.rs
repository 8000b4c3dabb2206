//! Memory-pressure levels and the policies that map them to shrink targets

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Coarse memory-pressure signal delivered by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    /// No pressure
    #[default]
    None,
    /// Memory is getting tight
    Moderate,
    /// Free everything that can be freed
    Critical,
}

impl fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryPressureLevel::None => "none",
            MemoryPressureLevel::Moderate => "moderate",
            MemoryPressureLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for MemoryPressureLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(MemoryPressureLevel::None),
            "moderate" => Ok(MemoryPressureLevel::Moderate),
            "critical" => Ok(MemoryPressureLevel::Critical),
            other => Err(Error::Parse(format!("unknown pressure level '{}'", other))),
        }
    }
}

/// Decides how far a cache shrinks when pressure fires.
///
/// The target is always computed from the cache's fixed `max_size`, so
/// firing the same level twice asks for the same target. Results above
/// `max_size` are clamped by the cache.
pub trait PressurePolicy: Send + Sync {
    /// Byte capacity the cache should shrink down to
    fn target_size(&self, max_size: usize, level: MemoryPressureLevel) -> usize;
}

impl<F> PressurePolicy for F
where
    F: Fn(usize, MemoryPressureLevel) -> usize + Send + Sync,
{
    fn target_size(&self, max_size: usize, level: MemoryPressureLevel) -> usize {
        self(max_size, level)
    }
}

/// Keeps a fixed percentage of `max_size` per pressure level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TieredPolicy {
    /// Share of `max_size` kept under moderate pressure
    pub moderate_percent: u8,
    /// Share of `max_size` kept under critical pressure
    pub critical_percent: u8,
}

impl Default for TieredPolicy {
    fn default() -> Self {
        Self {
            moderate_percent: 25,
            critical_percent: 0,
        }
    }
}

impl TieredPolicy {
    /// Create a policy; percentages above 100 are capped
    pub fn new(moderate_percent: u8, critical_percent: u8) -> Self {
        Self {
            moderate_percent: moderate_percent.min(100),
            critical_percent: critical_percent.min(100),
        }
    }

    fn scale(max_size: usize, percent: u8) -> usize {
        let percent = u128::from(percent.min(100));
        (max_size as u128 * percent / 100) as usize
    }
}

impl PressurePolicy for TieredPolicy {
    fn target_size(&self, max_size: usize, level: MemoryPressureLevel) -> usize {
        match level {
            MemoryPressureLevel::None => max_size,
            MemoryPressureLevel::Moderate => Self::scale(max_size, self.moderate_percent),
            MemoryPressureLevel::Critical => Self::scale(max_size, self.critical_percent),
        }
    }
}
