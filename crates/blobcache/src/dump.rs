//! Memory-dump reporting
//!
//! A dump is pulled, not pushed: whoever wants numbers hands a
//! [`ProcessMemoryDump`] to a [`MemoryDumpProvider`] and reads back what
//! the provider wrote into it.

use std::fmt;
use std::str::FromStr;
use serde::Serialize;

use crate::error::Error;

/// How much detail the requester wants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelOfDetail {
    /// Cheap periodic dumps; providers should report only their main caches
    Background,
    /// Reduced detail
    Light,
    /// Everything
    #[default]
    Detailed,
}

impl FromStr for LevelOfDetail {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "background" => Ok(LevelOfDetail::Background),
            "light" => Ok(LevelOfDetail::Light),
            "detailed" => Ok(LevelOfDetail::Detailed),
            other => Err(Error::Parse(format!("unknown level of detail '{}'", other))),
        }
    }
}

impl fmt::Display for LevelOfDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LevelOfDetail::Background => "background",
            LevelOfDetail::Light => "light",
            LevelOfDetail::Detailed => "detailed",
        };
        f.write_str(name)
    }
}

/// Arguments of a dump request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryDumpArgs {
    /// Requested level of detail
    pub level_of_detail: LevelOfDetail,
}

/// Size and object count reported under one name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorDump {
    /// Slash-separated dump name, e.g. `gpu/shader_cache/graphite_cache`
    pub name: String,
    /// Bytes held
    pub size_bytes: usize,
    /// Objects held
    pub object_count: usize,
}

/// Collector that providers write their allocator dumps into
#[derive(Debug, Default, Serialize)]
pub struct ProcessMemoryDump {
    dumps: Vec<AllocatorDump>,
}

impl ProcessMemoryDump {
    /// Create an empty dump
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocator dump
    pub fn create_allocator_dump(
        &mut self,
        name: impl Into<String>,
        size_bytes: usize,
        object_count: usize,
    ) -> &AllocatorDump {
        self.add(AllocatorDump {
            name: name.into(),
            size_bytes,
            object_count,
        })
    }

    /// Record an already-built allocator dump
    pub fn add(&mut self, dump: AllocatorDump) -> &AllocatorDump {
        self.dumps.push(dump);
        &self.dumps[self.dumps.len() - 1]
    }

    /// Find a dump by name
    pub fn get(&self, name: &str) -> Option<&AllocatorDump> {
        self.dumps.iter().find(|dump| dump.name == name)
    }

    /// All dumps in the order they were recorded
    pub fn dumps(&self) -> &[AllocatorDump] {
        &self.dumps
    }

    /// Number of dumps recorded
    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }

    /// Sum of `size_bytes` over every dump
    pub fn total_size_bytes(&self) -> usize {
        self.dumps.iter().map(|dump| dump.size_bytes).sum()
    }
}

/// Something that can describe its memory use on request
pub trait MemoryDumpProvider {
    /// Write allocator dumps into `pmd`; returns `false` if the provider failed
    fn on_memory_dump(&self, args: &MemoryDumpArgs, pmd: &mut ProcessMemoryDump) -> bool;
}
