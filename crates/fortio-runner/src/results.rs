//! `RunnerResults`: the aggregate record returned by `Run()`.

use std::time::SystemTime;

use fortio_histogram::HistogramSnapshot;

#[derive(Debug, Clone)]
pub struct RunnerResults {
    pub start_time: SystemTime,
    pub requested_qps: f64,
    pub actual_qps: f64,
    pub requested_duration_secs: f64,
    /// Human-readable echo of the requested duration, amended with
    /// `", interrupted after K"` if `Exactly` was set but not reached.
    pub requested_duration_label: String,
    pub actual_duration_secs: f64,
    pub num_threads: usize,
    pub duration_histogram: HistogramSnapshot,
    pub errors_duration_histogram: HistogramSnapshot,
    pub exactly: i64,
    pub jitter: bool,
    pub uniform: bool,
    pub no_catch_up: bool,
    pub run_id: i64,
    pub labels: String,
    pub id: String,
    pub access_logger_info: String,
    /// Set only if the run was aborted before it started.
    pub error: Option<String>,
}

impl RunnerResults {
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, f64)> {
        self.duration_histogram.calc_percentiles(percentiles)
    }
}
