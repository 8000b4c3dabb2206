//! Caching front-end handed to shader compilers

use std::fmt;
use std::sync::Arc;

use crate::cache::MemoryCache;

/// Receives every blob stored through a [`CachingInterface`], e.g. to
/// forward it to a host-side cache.
pub type BlobCallback = Box<dyn Fn(&[u8], &[u8]) + Send + Sync>;

/// Load/store entry point for one client.
///
/// Several interfaces may share one [`MemoryCache`]. Without a cache every
/// load misses and stores only reach the callback.
pub struct CachingInterface {
    memory_cache: Option<Arc<MemoryCache>>,
    blob_callback: Option<BlobCallback>,
}

impl CachingInterface {
    /// Create an interface over an optional shared cache and callback
    pub fn new(memory_cache: Option<Arc<MemoryCache>>, blob_callback: Option<BlobCallback>) -> Self {
        Self {
            memory_cache,
            blob_callback,
        }
    }

    /// Peek (`out == None`) or copy a cached value; returns 0 on a miss.
    ///
    /// Same protocol as [`MemoryCache::load`].
    pub fn load_data(&self, key: &[u8], out: Option<&mut [u8]>) -> usize {
        match &self.memory_cache {
            Some(cache) => cache.load(key, out),
            None => 0,
        }
    }

    /// Store a value in the shared cache and hand it to the callback.
    /// Empty values are ignored.
    pub fn store_data(&self, key: &[u8], value: &[u8]) {
        if value.is_empty() {
            return;
        }

        if let Some(cache) = &self.memory_cache {
            cache.store(key, value);
        }

        if let Some(callback) = &self.blob_callback {
            callback(key, value);
        }
    }

    /// The shared cache, if any
    pub fn memory_cache(&self) -> Option<&Arc<MemoryCache>> {
        self.memory_cache.as_ref()
    }
}

impl fmt::Debug for CachingInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingInterface")
            .field("memory_cache", &self.memory_cache)
            .field("has_blob_callback", &self.blob_callback.is_some())
            .finish()
    }
}
