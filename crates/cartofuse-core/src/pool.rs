//! Worker pool selection for the parallel stages.

use crate::types::FuseError;

/// Run `op` on a dedicated pool of `workers` threads, or on the global
/// rayon pool when `workers` is `None`.
///
/// A pool that cannot be built is logged and the global pool used
/// instead; the batch still completes.
pub(crate) fn install<R, F>(workers: Option<usize>, op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let Some(threads) = workers else {
        return op();
    };
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(op),
        Err(e) => {
            log::warn!("{}", FuseError::WorkerPool(e.to_string()));
            op()
        }
    }
}
