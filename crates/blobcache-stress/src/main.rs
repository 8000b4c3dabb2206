//! bcstress - concurrent workload driver for blobcache

mod workload;

use anyhow::{Context, Result};
use blobcache::{
    CacheConfig, CacheRegistry, LevelOfDetail, MemoryDumpArgs, MemoryDumpProvider,
    MemoryPressureLevel, ProcessMemoryDump, StatsSnapshot,
};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::workload::{WorkloadSpec, WorkloadTotals};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON cache config file
    #[arg(short, long)]
    config: Option<String>,

    /// Byte budget per cache (overrides the config file)
    #[arg(short, long)]
    max_size: Option<usize>,

    /// Worker threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Operations per worker thread
    #[arg(short, long, default_value_t = 100_000)]
    ops: usize,

    /// Distinct keys per cache
    #[arg(short, long, default_value_t = 4096)]
    key_space: usize,

    /// Largest value stored, in bytes
    #[arg(short = 'v', long, default_value_t = 16 * 1024)]
    value_size: usize,

    /// WebGPU caches next to the graphite cache
    #[arg(short, long, default_value_t = 2)]
    webgpu_clients: u32,

    /// Fire memory pressure every N operations of the first worker (0 = never)
    #[arg(short, long, default_value_t = 10_000)]
    pressure_every: usize,

    /// Pressure level to fire
    #[arg(long, default_value_t = MemoryPressureLevel::Moderate)]
    pressure_level: MemoryPressureLevel,

    /// Level of detail for the final memory dump
    #[arg(long, default_value_t = LevelOfDetail::Detailed)]
    detail: LevelOfDetail,
}

#[derive(Serialize)]
struct CacheReport {
    handle: String,
    stats: StatsSnapshot,
}

#[derive(Serialize)]
struct Report {
    workload: WorkloadTotals,
    memory_dump: ProcessMemoryDump,
    caches: Vec<CacheReport>,
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => CacheConfig::default(),
    };

    if let Some(max_size) = args.max_size {
        config.max_size = max_size;
    }
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Starting bcstress v{}", env!("CARGO_PKG_VERSION"));
    info!("Cache budget: {} bytes", config.max_size);
    info!(
        "Pressure policy: moderate keeps {}%, critical keeps {}%",
        config.pressure.moderate_percent, config.pressure.critical_percent
    );

    if args.value_size >= config.max_size {
        warn!(
            "Values up to {} bytes will often exceed the {} byte budget and be dropped",
            args.value_size, config.max_size
        );
    }

    let registry = CacheRegistry::from_config(config);
    let spec = WorkloadSpec {
        threads: args.threads,
        ops_per_thread: args.ops,
        key_space: args.key_space,
        max_value_size: args.value_size,
        webgpu_clients: args.webgpu_clients,
        pressure_every: args.pressure_every,
        pressure_level: args.pressure_level,
    };

    let totals = workload::run(&registry, &spec)?;

    let mut memory_dump = ProcessMemoryDump::new();
    let dump_args = MemoryDumpArgs {
        level_of_detail: args.detail,
    };
    registry.on_memory_dump(&dump_args, &mut memory_dump);

    let mut caches = Vec::new();
    for handle in workload::handles(&spec) {
        if let Some(cache) = registry.get_or_create(handle)? {
            caches.push(CacheReport {
                handle: handle.to_string(),
                stats: cache.stats().snapshot(),
            });
        }
    }

    let report = Report {
        workload: totals,
        memory_dump,
        caches,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );

    Ok(())
}
