//! The `Runnable` contract: the single method a protocol adapter implements
//! to become a unit of work the scheduler can pace and run.

/// One unit of protocol work, owned by exactly one worker thread for the
/// lifetime of a run. `run` is synchronous and may block on network I/O -
/// workers are real OS threads, not cooperative tasks.
///
/// Takes `&mut self` rather than `&self` so per-thread scratch state
/// (connection, buffers) lives inline in the implementor instead of behind
/// another layer of interior mutability.
pub trait Runnable {
    /// Returns `(status, details)`. `status = true` counts toward the
    /// success histogram; `false` additionally counts toward the error
    /// histogram. `details` is a short, stable classifier string (e.g. an
    /// HTTP status code, `"OK"`, or a truncated error message) used as the
    /// key into the adapter's `RetCodes` map.
    fn run(&mut self, thread_id: usize) -> (bool, String);
}

/// A `Runnable` that does nothing but sleep for a fixed duration and report
/// success - used by the core's own tests and as a trivial example for
/// adapter authors.
pub struct NoopRunnable {
    pub sleep: std::time::Duration,
}

impl Runnable for NoopRunnable {
    fn run(&mut self, _thread_id: usize) -> (bool, String) {
        if !self.sleep.is_zero() {
            std::thread::sleep(self.sleep);
        }
        (true, String::new())
    }
}
