//! Worker pools for draining blocks.
//!
//! Each run builds its own Rayon pool sized from the configuration; the
//! global pool is never touched.

use once_cell::sync::Lazy;
use rayon::{ThreadPool, ThreadPoolBuildError};

/// Default worker count, resolved once per process.
static DEFAULT_THREADS: Lazy<usize> = Lazy::new(get_optimal_thread_count);

/// Get the optimal thread count for the drain pool
fn get_optimal_thread_count() -> usize {
    // Check environment variable first
    if let Ok(val) = std::env::var("HYPERBLOCKER_RAYON_THREADS") {
        if let Ok(n) = val.parse::<usize>() {
            if n > 0 {
                log::info!("[Rayon Pool] Using {} threads from HYPERBLOCKER_RAYON_THREADS", n);
                return n;
            }
        }
    }

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8);

    // Reserve at most 1 core on high-core machines; otherwise use all cores
    let reserved = if cores > 16 { 1 } else { 0 };
    let threads = cores.saturating_sub(reserved).max(1);

    log::info!("[Rayon Pool] Default pool size {} threads (total cores: {}, reserved: {})",
        threads, cores, reserved);

    threads
}

pub fn default_threads() -> usize { *DEFAULT_THREADS }

/// Resolves a configured parallelism degree; 0 means the default.
pub fn resolve_threads(requested: usize) -> usize {
    if requested == 0 { default_threads() } else { requested }
}

/// Builds a dedicated pool with `threads` workers (0 means the default).
pub fn build_pool(threads: usize) -> Result<ThreadPool, ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(resolve_threads(threads))
        .thread_name(|i| format!("hyperblocker-{}", i))
        .build()
}
