pub mod ai;
pub mod analysis;
pub mod extraction;
pub mod processor; // Upload-to-session orchestrator and analysis runs

pub use processor::*;

/// Fixed-size pool whose threads are named `<name>-<index>` in logs and panics.
pub fn build_pool(threads: usize, name: &'static str) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("{name}-{i}"))
        .panic_handler(move |panic| {
            tracing::error!(pool = name, error = %panic_message(panic.as_ref()), "Pool task panicked");
        })
        .build()
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
