//! Worker threads that hammer a cache registry

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use blobcache::{CacheHandle, CacheRegistry, CachingInterface, MemoryPressureLevel};
use serde::Serialize;
use tracing::{debug, info};

/// Shape of one stress run
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub threads: usize,
    pub ops_per_thread: usize,
    pub key_space: usize,
    pub max_value_size: usize,
    pub webgpu_clients: u32,
    pub pressure_every: usize,
    pub pressure_level: MemoryPressureLevel,
}

/// What the workers did, summed over all threads
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct WorkloadTotals {
    pub loads: u64,
    pub hits: u64,
    pub stores: u64,
    pub forwarded_bytes: u64,
    pub pressure_events: u64,
}

/// Handles the workload spreads its threads across: one graphite cache plus
/// `webgpu_clients` WebGPU caches.
pub fn handles(spec: &WorkloadSpec) -> Vec<CacheHandle> {
    std::iter::once(CacheHandle::Graphite(0))
        .chain((1..=spec.webgpu_clients).map(CacheHandle::WebGpu))
        .collect()
}

/// Key index for operation `op` of thread `thread`. Spread with a
/// multiplicative hash so threads collide on keys without marching in step.
fn key_index(thread: usize, op: usize, key_space: usize) -> usize {
    let mixed = ((thread as u64) << 32 | op as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    ((mixed >> 17) % key_space.max(1) as u64) as usize
}

/// Value length is a function of the key alone, so a peek followed by a
/// copy sees a consistent size even when another thread re-stores the key.
fn value_len(key_index: usize, max_value_size: usize) -> usize {
    let max = max_value_size.max(1);
    max / 2 + key_index % (max - max / 2) + 1
}

/// Run the workload to completion on scoped threads
pub fn run(registry: &CacheRegistry, spec: &WorkloadSpec) -> Result<WorkloadTotals> {
    let handles = handles(spec);
    let forwarded = Arc::new(AtomicU64::new(0));

    let mut interfaces = Vec::with_capacity(spec.threads);
    for thread in 0..spec.threads {
        let handle = handles[thread % handles.len()];
        let forwarded = Arc::clone(&forwarded);
        let iface = registry
            .create_interface(
                handle,
                Some(Box::new(move |_key: &[u8], value: &[u8]| {
                    forwarded.fetch_add(value.len() as u64, Ordering::Relaxed);
                })),
            )
            .with_context(|| format!("Failed to create interface for {}", handle))?;
        interfaces.push((handle, iface));
    }

    info!(
        threads = spec.threads,
        caches = handles.len(),
        ops = spec.threads * spec.ops_per_thread,
        "Starting workload"
    );

    let per_thread = thread::scope(|scope| {
        let workers: Vec<_> = interfaces
            .iter()
            .enumerate()
            .map(|(thread, (handle, iface))| {
                scope.spawn(move || {
                    debug!(thread, %handle, "worker started");
                    run_worker(registry, iface, thread, spec)
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().map_err(|_| anyhow!("Worker thread panicked")))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut totals = per_thread.into_iter().fold(WorkloadTotals::default(), |mut acc, t| {
        acc.loads += t.loads;
        acc.hits += t.hits;
        acc.stores += t.stores;
        acc.pressure_events += t.pressure_events;
        acc
    });
    totals.forwarded_bytes = forwarded.load(Ordering::Relaxed);

    info!(
        loads = totals.loads,
        hits = totals.hits,
        stores = totals.stores,
        pressure_events = totals.pressure_events,
        "Workload finished"
    );
    Ok(totals)
}

fn run_worker(
    registry: &CacheRegistry,
    iface: &CachingInterface,
    thread: usize,
    spec: &WorkloadSpec,
) -> WorkloadTotals {
    let mut totals = WorkloadTotals::default();
    let mut buf = Vec::new();

    for op in 0..spec.ops_per_thread {
        let idx = key_index(thread, op, spec.key_space);
        let key = format!("pipeline-{:08x}", idx);

        if op % 2 == 0 {
            let size = iface.load_data(key.as_bytes(), None);
            totals.loads += 1;
            if size > 0 {
                buf.resize(size, 0);
                // Zero means the entry was evicted between peek and copy
                if iface.load_data(key.as_bytes(), Some(&mut buf[..])) > 0 {
                    totals.hits += 1;
                }
            }
        } else {
            let fill = (idx & 0xff) as u8;
            let value = vec![fill; value_len(idx, spec.max_value_size)];
            iface.store_data(key.as_bytes(), &value);
            totals.stores += 1;
        }

        // Only the first thread plays the pressure monitor
        if thread == 0 && spec.pressure_every > 0 && (op + 1) % spec.pressure_every == 0 {
            registry.purge_memory(spec.pressure_level);
            totals.pressure_events += 1;
        }
    }

    totals
}
