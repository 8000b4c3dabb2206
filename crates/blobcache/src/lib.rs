//! # blobcache
//!
//! In-memory cache for GPU shader and pipeline blobs.
//!
//! ## Architecture
//! - **MemoryCache**: byte-budgeted key/value cache behind a single mutex
//! - **LRU List**: slab-backed doubly-linked list, AHash index (O(1))
//! - **Pressure**: pluggable policy that maps a pressure level to a shrink target
//! - **Registry**: one shared cache per client handle, with memory dumps
//!
//! ```
//! use blobcache::MemoryCache;
//!
//! let cache = MemoryCache::new(1024, "");
//! cache.store(b"shader", b"compiled bytes");
//!
//! let size = cache.load(b"shader", None);
//! let mut buf = vec![0u8; size];
//! cache.load(b"shader", Some(&mut buf));
//! assert_eq!(buf, b"compiled bytes");
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod dump;
mod entry;
mod error;
mod interface;
mod lru;
mod pressure;
mod registry;
mod stats;

pub use cache::MemoryCache;
pub use config::{CacheConfig, DEFAULT_HIT_TRACE_LABEL, DEFAULT_MAX_SIZE};
pub use dump::{AllocatorDump, LevelOfDetail, MemoryDumpArgs, MemoryDumpProvider, ProcessMemoryDump};
pub use error::{Error, Result};
pub use interface::{BlobCallback, CachingInterface};
pub use pressure::{MemoryPressureLevel, PressurePolicy, TieredPolicy};
pub use registry::{BackendFactory, CacheHandle, CacheRegistry, GRAPHITE_DUMP_NAME};
pub use stats::{CacheStats, StatsSnapshot};
