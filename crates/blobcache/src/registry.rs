//! Registry of shared caches, one per cache handle

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use ahash::RandomState;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::MemoryCache;
use crate::config::CacheConfig;
use crate::dump::{LevelOfDetail, MemoryDumpArgs, MemoryDumpProvider, ProcessMemoryDump};
use crate::error::{Error, Result};
use crate::interface::{BlobCallback, CachingInterface};
use crate::pressure::MemoryPressureLevel;

/// Dump name of the single graphite cache
pub const GRAPHITE_DUMP_NAME: &str = "gpu/shader_cache/graphite_cache";

/// Identifies which client a cache belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheHandle {
    /// GL program cache; not served by this registry
    GlShader(u32),
    /// Per-origin WebGPU pipeline cache
    WebGpu(u32),
    /// The compositor's graphite pipeline cache
    Graphite(u32),
}

impl CacheHandle {
    /// Raw handle value
    pub fn id(&self) -> u32 {
        match *self {
            CacheHandle::GlShader(id) | CacheHandle::WebGpu(id) | CacheHandle::Graphite(id) => id,
        }
    }

    fn ensure_supported(self) -> Result<()> {
        match self {
            CacheHandle::WebGpu(_) | CacheHandle::Graphite(_) => Ok(()),
            CacheHandle::GlShader(_) => Err(Error::UnsupportedHandle(self)),
        }
    }
}

impl fmt::Display for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheHandle::GlShader(id) => write!(f, "gl-shader:0x{:X}", id),
            CacheHandle::WebGpu(id) => write!(f, "webgpu:0x{:X}", id),
            CacheHandle::Graphite(id) => write!(f, "graphite:0x{:X}", id),
        }
    }
}

/// Produces a fresh backend cache, or `None` to run uncached
pub type BackendFactory = Box<dyn Fn() -> Option<Arc<MemoryCache>> + Send + Sync>;

/// Hands out [`CachingInterface`]s that share one [`MemoryCache`] per handle,
/// and fans memory pressure and dump requests out to every cache it knows.
pub struct CacheRegistry {
    backend_factory: BackendFactory,
    backends: Mutex<HashMap<CacheHandle, Arc<MemoryCache>, RandomState>>,
}

impl CacheRegistry {
    /// Create a registry that builds backends with `factory`
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Option<Arc<MemoryCache>> + Send + Sync + 'static,
    {
        Self {
            backend_factory: Box::new(factory),
            backends: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Create a registry whose backends are in-memory caches built from `config`
    pub fn from_config(config: CacheConfig) -> Self {
        Self::new(move || Some(Arc::new(config.build())))
    }

    /// Shared backend for `handle`, created on first use.
    ///
    /// A backend is only remembered if the factory produced one.
    pub fn get_or_create(&self, handle: CacheHandle) -> Result<Option<Arc<MemoryCache>>> {
        handle.ensure_supported()?;

        let mut backends = self.backends.lock();
        if let Some(backend) = backends.get(&handle) {
            return Ok(Some(Arc::clone(backend)));
        }

        let backend = (self.backend_factory)();
        if let Some(backend) = &backend {
            debug!(%handle, max_size = backend.max_size(), "created cache backend");
            backends.insert(handle, Arc::clone(backend));
        }

        Ok(backend)
    }

    /// Interface over the shared backend for `handle`
    pub fn create_interface(
        &self,
        handle: CacheHandle,
        blob_callback: Option<BlobCallback>,
    ) -> Result<CachingInterface> {
        let backend = self.get_or_create(handle)?;
        Ok(CachingInterface::new(backend, blob_callback))
    }

    /// Interface over a private backend that the registry does not track.
    /// It is neither purged nor dumped.
    pub fn create_unregistered_interface(&self) -> CachingInterface {
        CachingInterface::new((self.backend_factory)(), None)
    }

    /// Forget the backend for `handle`. Interfaces already handed out keep it alive.
    pub fn release_handle(&self, handle: CacheHandle) -> Result<()> {
        handle.ensure_supported()?;

        if self.backends.lock().remove(&handle).is_some() {
            debug!(%handle, "released cache backend");
        }
        Ok(())
    }

    /// Shrink every registered backend for `level`
    pub fn purge_memory(&self, level: MemoryPressureLevel) {
        let backends = self.snapshot();
        debug!(%level, backends = backends.len(), "purging cache backends");

        for (_, backend) in backends {
            backend.shrink_on_memory_pressure(level);
        }
    }

    /// Number of registered backends
    pub fn len(&self) -> usize {
        self.backends.lock().len()
    }

    /// Check if no backend is registered
    pub fn is_empty(&self) -> bool {
        self.backends.lock().is_empty()
    }

    /// Registered backends in handle order. Taken under the registry lock so
    /// backend locks are never acquired while it is held.
    fn snapshot(&self) -> Vec<(CacheHandle, Arc<MemoryCache>)> {
        let mut backends: Vec<_> = self
            .backends
            .lock()
            .iter()
            .map(|(handle, backend)| (*handle, Arc::clone(backend)))
            .collect();
        backends.sort_by_key(|(handle, _)| *handle);
        backends
    }
}

impl MemoryDumpProvider for CacheRegistry {
    fn on_memory_dump(&self, args: &MemoryDumpArgs, pmd: &mut ProcessMemoryDump) -> bool {
        let is_background = args.level_of_detail == LevelOfDetail::Background;

        for (handle, backend) in self.snapshot() {
            match handle {
                // There is only ever one graphite cache.
                CacheHandle::Graphite(_) => backend.on_memory_dump(GRAPHITE_DUMP_NAME, pmd),
                CacheHandle::WebGpu(id) if !is_background => {
                    let dump_name = format!("gpu/shader_cache/webgpu_cache_0x{:X}", id);
                    backend.on_memory_dump(&dump_name, pmd);
                }
                _ => {}
            }
        }
        true
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("backends", &self.backends.lock().len())
            .finish()
    }
}
