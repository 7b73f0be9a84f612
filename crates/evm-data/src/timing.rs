//! Execution-time instrumentation composed explicitly at call sites.

use std::future::Future;
use std::time::Instant;

/// Awaits `operation` and logs how long it took under `name`.
///
/// # Example
/// ```no_run
/// # use evm_data::timing::timed;
/// # async fn example() {
/// let value = timed("fetch_latest", async { 42 }).await;
/// # }
/// ```
pub async fn timed<F: Future>(name: &str, operation: F) -> F::Output {
    let started = Instant::now();
    let output = operation.await;
    log_elapsed(name, started);
    output
}

/// Blocking counterpart of [`timed`].
pub fn timed_sync<T>(name: &str, operation: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let output = operation();
    log_elapsed(name, started);
    output
}

fn log_elapsed(name: &str, started: Instant) {
    let elapsed = started.elapsed();
    tracing::info!(
        operation = name,
        elapsed_secs = elapsed.as_secs_f64(),
        "{name} executed in {:.2} seconds",
        elapsed.as_secs_f64()
    );
}
