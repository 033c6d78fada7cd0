//! `RunnerOptions` and normalization: applying defaults, deriving the run
//! ID, and allocating the cancellation handle before a run starts.

use std::{
    path::Path,
    sync::Arc,
    time::SystemTime,
};

use fortio_aborter::Aborter;
use fortio_access_log::{
    AccessLogFormat,
    AccessLogger,
    FileAccessLogger,
};
use fortio_errors::RunnerError;

use crate::{
    id::generate_id,
    runnable::Runnable,
};

pub const DEFAULT_QPS: f64 = 8.0;
pub const DEFAULT_DURATION_SECS: f64 = 5.0;
pub const DEFAULT_NUM_THREADS: usize = 4;
pub const DEFAULT_RESOLUTION: f64 = 0.001;

/// Constructed by the caller, populated with `Runnable`s via
/// [`RunnerOptions::make_runners`], then consumed exactly once by
/// [`crate::PeriodicRunner::new`].
pub struct RunnerOptions {
    pub qps: f64,
    pub duration_secs: f64,
    pub exactly: i64,
    pub num_threads: usize,
    pub resolution: f64,
    pub offset_secs: f64,
    pub percentiles: Vec<f64>,
    pub jitter: bool,
    pub uniform: bool,
    pub no_catch_up: bool,
    pub run_id: i64,
    pub labels: String,
    pub access_logger: Option<Arc<dyn AccessLogger>>,
    pub stop: Option<Aborter>,
    pub runners: Vec<Option<Box<dyn Runnable + Send>>>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            qps: 0.0,
            duration_secs: 0.0,
            exactly: 0,
            num_threads: 0,
            resolution: 0.0,
            offset_secs: 0.0,
            percentiles: Vec::new(),
            jitter: false,
            uniform: false,
            no_catch_up: false,
            run_id: 0,
            labels: String::new(),
            access_logger: None,
            stop: None,
            runners: Vec::new(),
        }
    }
}

impl RunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience to clone one `Runnable` factory into every worker slot.
    /// Safe to call before `num_threads` is set explicitly - normalization
    /// will top the slice up to the (possibly defaulted) thread count.
    pub fn make_runners<F>(&mut self, count: usize, mut factory: F)
    where
        F: FnMut() -> Box<dyn Runnable + Send>,
    {
        self.runners = (0..count).map(|_| Some(factory())).collect();
    }

    pub fn add_access_logger(
        &mut self,
        path: impl AsRef<Path>,
        format: &str,
    ) -> Result<(), RunnerError> {
        let format = AccessLogFormat::parse(format)?;
        let logger = FileAccessLogger::new(path, format)?;
        self.access_logger = Some(Arc::new(logger));
        Ok(())
    }

    /// External cancellation; a no-op before `Stop` has been allocated (i.e.
    /// before `Run()`/normalization).
    pub fn abort(&self, wait: bool) {
        if let Some(stop) = &self.stop {
            stop.abort(wait);
        }
    }

    pub(crate) fn normalize(mut self, start_time: SystemTime) -> NormalizedOptions {
        if self.qps == 0.0 {
            self.qps = DEFAULT_QPS;
        }
        if self.duration_secs == 0.0 && self.exactly <= 0 {
            self.duration_secs = DEFAULT_DURATION_SECS;
        }
        if self.num_threads < 1 {
            self.num_threads = DEFAULT_NUM_THREADS;
        }
        if self.resolution <= 0.0 {
            self.resolution = DEFAULT_RESOLUTION;
        }
        if self.percentiles.is_empty() {
            self.percentiles = vec![50.0, 75.0, 90.0, 99.0, 99.9];
        }
        let stop = self.stop.take().unwrap_or_default();
        let id = generate_id(start_time, self.run_id, &self.labels);

        if self.runners.len() < self.num_threads {
            let needed = self.num_threads - self.runners.len();
            self.runners.extend((0..needed).map(|_| None));
        }
        let runners = self
            .runners
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    fortio_errors::fatal("RunnerOptions::make_runners must populate every worker slot before Run()")
                })
            })
            .collect();

        NormalizedOptions {
            qps: self.qps,
            duration_secs: self.duration_secs,
            exactly: self.exactly,
            num_threads: self.num_threads,
            resolution: self.resolution,
            offset_secs: self.offset_secs,
            percentiles: self.percentiles,
            jitter: self.jitter,
            uniform: self.uniform,
            no_catch_up: self.no_catch_up,
            run_id: self.run_id,
            labels: self.labels,
            access_logger: self.access_logger,
            stop,
            id,
            runners,
        }
    }
}

/// The post-normalization view: defaults applied, `id` derived, `Stop`
/// allocated, `runners` fully populated. Owned by exactly one
/// `PeriodicRunner`.
pub struct NormalizedOptions {
    pub qps: f64,
    pub duration_secs: f64,
    pub exactly: i64,
    pub num_threads: usize,
    pub resolution: f64,
    pub offset_secs: f64,
    pub percentiles: Vec<f64>,
    pub jitter: bool,
    pub uniform: bool,
    pub no_catch_up: bool,
    pub run_id: i64,
    pub labels: String,
    pub access_logger: Option<Arc<dyn AccessLogger>>,
    pub stop: Aborter,
    pub id: String,
    pub runners: Vec<Box<dyn Runnable + Send>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::NoopRunnable;

    #[test]
    fn normalize_applies_all_defaults() {
        let mut opts = RunnerOptions::new();
        opts.make_runners(1, || {
            Box::new(NoopRunnable {
                sleep: std::time::Duration::ZERO,
            })
        });
        let normalized = opts.normalize(SystemTime::now());
        assert_eq!(normalized.qps, DEFAULT_QPS);
        assert_eq!(normalized.duration_secs, DEFAULT_DURATION_SECS);
        assert_eq!(normalized.num_threads, DEFAULT_NUM_THREADS);
        assert_eq!(normalized.resolution, DEFAULT_RESOLUTION);
        assert_eq!(normalized.runners.len(), DEFAULT_NUM_THREADS);
        assert!(!normalized.id.is_empty());
    }

    #[test]
    fn exactly_set_suppresses_default_duration() {
        let mut opts = RunnerOptions::new();
        opts.exactly = 10;
        opts.num_threads = 2;
        opts.make_runners(2, || {
            Box::new(NoopRunnable {
                sleep: std::time::Duration::ZERO,
            })
        });
        let normalized = opts.normalize(SystemTime::now());
        assert_eq!(normalized.duration_secs, 0.0);
    }
}
