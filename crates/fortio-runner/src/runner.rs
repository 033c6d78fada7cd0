//! The periodic runner scheduler: normalization, per-thread QPS/max-QPS
//! dispatch loops, single- vs multi-thread fan-out, completion.

use std::{
    sync::Arc,
    thread,
    time::{
        Duration,
        Instant,
        SystemTime,
    },
};

use crossbeam_channel::Receiver;
use fortio_access_log::{
    AccessLogger,
    RequestContext,
};
use fortio_histogram::Histogram;
use rand::Rng;
use tracing::warn;

use crate::{
    engine::Engine,
    options::{
        NormalizedOptions,
        RunnerOptions,
    },
    results::RunnerResults,
    runnable::Runnable,
};

/// Above this fraction of negative (behind-schedule) sleeps, warn and always
/// emit sleep-time stats (.5 "Completion").
const SLEEP_BEHIND_SCHEDULE_WARN_FRACTION: f64 = 0.05;

/// If `Exactly` asks for fewer than this many calls per thread, threads are
/// collapsed to one. Preserves the `DurationHistogram.Count == Exactly`
/// invariant rather than literally capping `numCalls` at 2, which
/// would violate it - see the "NumThreads reduction" open-question
/// resolution.
const MIN_CALLS_PER_THREAD: i64 = 2;

pub struct PeriodicRunner {
    opts: NormalizedOptions,
    gen_time: SystemTime,
}

struct ThreadPlan {
    num_calls: Option<u64>,
    per_thread_qps: f64,
    duration: Option<Duration>,
    stagger: Option<Duration>,
}

struct WorkerOutcome {
    duration_hist: Histogram,
    errors_hist: Histogram,
    sleep_hist: Histogram,
    calls: u64,
}

impl PeriodicRunner {
    pub fn new(mut options: RunnerOptions) -> Self {
        let gen_time = SystemTime::now();
        if options.exactly > 0 && options.num_threads > 1 {
            let per_thread = options.exactly / options.num_threads as i64;
            if per_thread < MIN_CALLS_PER_THREAD {
                warn!(
                    exactly = options.exactly,
                    num_threads = options.num_threads,
                    "reducing num_threads to 1: too few calls per thread for the requested Exactly"
                );
                options.num_threads = 1;
            }
        }
        let opts = options.normalize(gen_time);
        Engine::watch(opts.stop.clone());
        Self { opts, gen_time }
    }

    pub fn options(&self) -> &NormalizedOptions {
        &self.opts
    }

    pub fn run(&mut self) -> RunnerResults {
        let (stop_rx, should_abort) = self.opts.stop.record_start();
        if should_abort {
            return self.early_abort_results();
        }

        let wall_start = Instant::now();
        let is_qps_mode = self.opts.qps > 0.0;
        let plan = self.build_plan(is_qps_mode);

        let (duration_hist, errors_hist, sleep_hist, total_calls) =
            if self.opts.num_threads == 1 {
                // `len(runners) >= num_threads` (invariant) - thread 0 always
                // uses slot 0; any surplus slots beyond num_threads are unused extras.
                let runnable = std::mem::take(&mut self.opts.runners).into_iter().next().unwrap_or_else(|| {
                    fortio_errors::fatal("PeriodicRunner::run: no Runnable for the only worker thread")
                });
                let outcome = run_worker(
                    0,
                    runnable,
                    &plan,
                    is_qps_mode,
                    self.opts.jitter,
                    self.opts.no_catch_up,
                    self.opts.access_logger.clone(),
                    self.opts.resolution,
                    stop_rx,
                );
                (outcome.duration_hist, outcome.errors_hist, outcome.sleep_hist, outcome.calls)
            } else {
                self.run_multi_threaded(&plan, is_qps_mode, &stop_rx)
            };

        let elapsed = wall_start.elapsed();
        self.complete(
            duration_hist,
            errors_hist,
            sleep_hist,
            total_calls,
            elapsed,
            is_qps_mode,
        )
    }

    fn build_plan(&self, is_qps_mode: bool) -> ThreadPlan {
        let num_threads = self.opts.num_threads as u64;
        let per_thread_qps = if is_qps_mode {
            self.opts.qps / num_threads as f64
        } else {
            0.0
        };

        let total_calls: Option<u64> = if self.opts.exactly > 0 {
            Some(self.opts.exactly as u64)
        } else if self.opts.duration_secs > 0.0 && is_qps_mode {
            Some((self.opts.qps * self.opts.duration_secs).floor().max(0.0) as u64)
        } else {
            None
        };

        let duration = if self.opts.exactly > 0 {
            None
        } else if self.opts.duration_secs > 0.0 {
            Some(Duration::from_secs_f64(self.opts.duration_secs))
        } else {
            None
        };

        let stagger = if is_qps_mode && self.opts.uniform && per_thread_qps > 0.0 {
            Some(Duration::from_secs_f64(1.0 / per_thread_qps))
        } else {
            None
        };

        ThreadPlan {
            num_calls: total_calls,
            per_thread_qps,
            duration,
            stagger,
        }
    }

    /// Splits `plan.num_calls` across `num_threads`, thread 0 absorbing the
    /// remainder (: "first thread gets the remainder").
    fn calls_for_thread(&self, plan: &ThreadPlan, thread_id: usize) -> Option<u64> {
        let total = plan.num_calls?;
        let n = self.opts.num_threads as u64;
        let base = total / n;
        let leftover = total % n;
        Some(if thread_id == 0 { base + leftover } else { base })
    }

    fn stagger_for_thread(&self, plan: &ThreadPlan, thread_id: usize) -> Option<Duration> {
        let full_period = plan.stagger?;
        let n = self.opts.num_threads as f64;
        let t = thread_id as f64;
        let fraction = (n - t) / n;
        Some(full_period.mul_f64(fraction))
    }

    fn run_multi_threaded(
        &mut self,
        plan: &ThreadPlan,
        is_qps_mode: bool,
        stop_rx: &Receiver<()>,
    ) -> (Histogram, Histogram, Histogram, u64) {
        // `len(runners) >= num_threads` (invariant); any surplus
        // slots beyond num_threads are unused extras.
        let mut runners = std::mem::take(&mut self.opts.runners);
        runners.truncate(self.opts.num_threads);
        let handles: Vec<_> = runners
            .into_iter()
            .enumerate()
            .map(|(thread_id, runnable)| {
                let per_thread_plan = ThreadPlan {
                    num_calls: self.calls_for_thread(plan, thread_id),
                    per_thread_qps: plan.per_thread_qps,
                    duration: plan.duration,
                    stagger: self.stagger_for_thread(plan, thread_id),
                };
                let jitter = self.opts.jitter;
                let no_catch_up = self.opts.no_catch_up;
                let access_logger = self.opts.access_logger.clone();
                let resolution = self.opts.resolution;
                let stop_rx = stop_rx.clone();
                thread::spawn(move || {
                    run_worker(
                        thread_id,
                        runnable,
                        &per_thread_plan,
                        is_qps_mode,
                        jitter,
                        no_catch_up,
                        access_logger,
                        resolution,
                        stop_rx,
                    )
                })
            })
            .collect();

        let mut duration_hist = Histogram::new(self.opts.offset_secs, self.opts.resolution);
        let mut errors_hist = Histogram::new(self.opts.offset_secs, self.opts.resolution);
        let mut sleep_hist = Histogram::new(0.0, self.opts.resolution);
        let mut total_calls = 0u64;
        for handle in handles {
            let mut outcome = handle
                .join()
                .unwrap_or_else(|_| fortio_errors::fatal("a worker thread panicked"));
            duration_hist.transfer(&mut outcome.duration_hist);
            errors_hist.transfer(&mut outcome.errors_hist);
            sleep_hist.transfer(&mut outcome.sleep_hist);
            total_calls += outcome.calls;
        }
        (duration_hist, errors_hist, sleep_hist, total_calls)
    }

    fn complete(
        &mut self,
        duration_hist: Histogram,
        errors_hist: Histogram,
        sleep_hist: Histogram,
        total_calls: u64,
        elapsed: Duration,
        is_qps_mode: bool,
    ) -> RunnerResults {
        self.opts.stop.abort(false);
        self.opts.stop.record_end();
        self.opts.stop.reset();

        let elapsed_secs = elapsed.as_secs_f64();
        let actual_qps = if elapsed_secs > 0.0 {
            total_calls as f64 / elapsed_secs
        } else {
            0.0
        };

        if is_qps_mode && sleep_hist.count() > 0 {
            let behind_fraction = sleep_hist.bucket_zero_fraction();
            if behind_fraction > SLEEP_BEHIND_SCHEDULE_WARN_FRACTION {
                warn!(
                    behind_fraction,
                    "more than 5% of iterations fell behind the requested schedule"
                );
            }
        }

        let mut requested_duration_label = if self.opts.exactly > 0 {
            format!("Exactly {}", self.opts.exactly)
        } else if self.opts.duration_secs > 0.0 {
            format!("{}s", self.opts.duration_secs)
        } else {
            "until interrupted".to_string()
        };
        if self.opts.exactly > 0 && total_calls < self.opts.exactly as u64 {
            requested_duration_label.push_str(&format!(", interrupted after {total_calls}"));
        }

        RunnerResults {
            start_time: self.gen_time,
            requested_qps: self.opts.qps,
            actual_qps,
            requested_duration_secs: self.opts.duration_secs,
            requested_duration_label,
            actual_duration_secs: elapsed_secs,
            num_threads: self.opts.num_threads,
            duration_histogram: duration_hist.export(),
            errors_duration_histogram: errors_hist.export(),
            exactly: self.opts.exactly,
            jitter: self.opts.jitter,
            uniform: self.opts.uniform,
            no_catch_up: self.opts.no_catch_up,
            run_id: self.opts.run_id,
            labels: self.opts.labels.clone(),
            id: self.opts.id.clone(),
            access_logger_info: self
                .opts
                .access_logger
                .as_ref()
                .map(|l| l.info())
                .unwrap_or_default(),
            error: None,
        }
    }

    fn early_abort_results(&mut self) -> RunnerResults {
        self.opts.stop.record_end();
        self.opts.stop.reset();
        RunnerResults {
            start_time: self.gen_time,
            requested_qps: self.opts.qps,
            actual_qps: 0.0,
            requested_duration_secs: self.opts.duration_secs,
            requested_duration_label: "aborted before starting".to_string(),
            actual_duration_secs: 0.0,
            num_threads: self.opts.num_threads,
            duration_histogram: Histogram::new(self.opts.offset_secs, self.opts.resolution).export(),
            errors_duration_histogram: Histogram::new(self.opts.offset_secs, self.opts.resolution).export(),
            exactly: self.opts.exactly,
            jitter: self.opts.jitter,
            uniform: self.opts.uniform,
            no_catch_up: self.opts.no_catch_up,
            run_id: self.opts.run_id,
            labels: self.opts.labels.clone(),
            id: self.opts.id.clone(),
            access_logger_info: self
                .opts
                .access_logger
                .as_ref()
                .map(|l| l.info())
                .unwrap_or_default(),
            error: Some("Aborted before even starting".to_string()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    thread_id: usize,
    mut runnable: Box<dyn Runnable + Send>,
    plan: &ThreadPlan,
    is_qps_mode: bool,
    jitter: bool,
    no_catch_up: bool,
    access_logger: Option<Arc<dyn AccessLogger>>,
    resolution: f64,
    stop_rx: Receiver<()>,
) -> WorkerOutcome {
    let mut duration_hist = Histogram::new(0.0, resolution);
    let mut errors_hist = Histogram::new(0.0, resolution);
    let mut sleep_hist = Histogram::new(0.0, resolution);
    let mut calls = 0u64;

    // A thread whose share of `Exactly` rounded down to zero dispatches
    // nothing - the count check below only fires after the first call
    // completes, so this must be caught before entering the loop at all.
    if plan.num_calls == Some(0) {
        return WorkerOutcome { duration_hist, errors_hist, sleep_hist, calls };
    }

    if let Some(stagger) = plan.stagger {
        if !stagger.is_zero() {
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => {
                    return WorkerOutcome { duration_hist, errors_hist, sleep_hist, calls };
                },
                default(stagger) => {},
            }
        }
    }

    let start = Instant::now();
    let deadline = plan.duration.map(|d| start + d);
    let mut tolerated_one_overrun = false;
    let mut rng = rand::rng();
    let mut i: u64 = 0;

    'main: loop {
        let f_start = Instant::now();
        if let Some(deadline) = deadline {
            if f_start > deadline {
                if !is_qps_mode {
                    break 'main;
                }
                if tolerated_one_overrun {
                    break 'main;
                }
                tolerated_one_overrun = true;
            }
        }

        let ctx = access_logger
            .as_ref()
            .map(|logger| logger.start(RequestContext::new(thread_id, i, SystemTime::now())));

        let (status, details) = runnable.run(thread_id);
        let latency = f_start.elapsed().as_secs_f64();

        if let (Some(logger), Some(ctx)) = (access_logger.as_ref(), ctx.as_ref()) {
            logger.report(ctx, latency, status, &details);
        }
        duration_hist.record(latency);
        if !status {
            errors_hist.record(latency);
        }
        calls += 1;

        if !is_qps_mode {
            match stop_rx.try_recv() {
                Ok(_) | Err(crossbeam_channel::TryRecvError::Disconnected) => break 'main,
                Err(crossbeam_channel::TryRecvError::Empty) => {},
            }
            if let Some(n) = plan.num_calls {
                if calls >= n {
                    break 'main;
                }
            }
            continue 'main;
        }

        loop {
            i += 1;
            if let Some(n) = plan.num_calls {
                if i >= n {
                    break 'main;
                }
            }
            let target_elapsed = match plan.num_calls {
                Some(n) if n > 1 => (i as f64 + (i as f64) / ((n - 1) as f64)) / plan.per_thread_qps,
                _ => i as f64 / plan.per_thread_qps,
            };
            let mut sleep_secs = target_elapsed - start.elapsed().as_secs_f64();
            if no_catch_up && sleep_secs < 0.0 {
                continue;
            }
            if jitter {
                let pct: f64 = rng.random_range(-0.1..=0.1);
                sleep_secs += sleep_secs * pct;
            }
            sleep_hist.record(sleep_secs);
            let sleep_dur = if sleep_secs > 0.0 {
                Duration::from_secs_f64(sleep_secs)
            } else {
                Duration::ZERO
            };
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break 'main,
                default(sleep_dur) => {},
            }
            break;
        }
    }

    WorkerOutcome {
        duration_hist,
        errors_hist,
        sleep_hist,
        calls,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{
            AtomicU64,
            Ordering,
        },
        time::Duration as StdDuration,
    };

    use super::*;
    use crate::runnable::NoopRunnable;

    fn opts_with_runners(num_threads: usize, sleep: StdDuration) -> RunnerOptions {
        let mut opts = RunnerOptions::new();
        opts.num_threads = num_threads;
        opts.make_runners(num_threads, move || Box::new(NoopRunnable { sleep }));
        opts
    }

    #[test]
    fn noop_exact_count_across_threads() {
        let mut opts = opts_with_runners(4, StdDuration::from_millis(50));
        opts.exactly = 10;
        opts.qps = -1.0;
        opts.duration_secs = -1.0;
        let mut runner = PeriodicRunner::new(opts);
        let results = runner.run();
        assert_eq!(results.duration_histogram.count, 10);
        assert_eq!(results.errors_duration_histogram.count, 0);
        assert!(results.actual_duration_secs >= 0.050);
    }

    #[test]
    fn duration_bounded_qps_single_thread() {
        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        struct Counting(Arc<AtomicU64>);
        impl Runnable for Counting {
            fn run(&mut self, _thread_id: usize) -> (bool, String) {
                let i = self.0.fetch_add(1, Ordering::SeqCst);
                (i % 2 == 0, String::new())
            }
        }
        let mut opts = RunnerOptions::new();
        opts.num_threads = 1;
        opts.qps = 9.4;
        opts.duration_secs = 1.0;
        opts.make_runners(1, move || Box::new(Counting(counter2.clone())));
        let mut runner = PeriodicRunner::new(opts);
        let results = runner.run();
        assert_eq!(results.duration_histogram.count, 9);
        let _ = counter.load(Ordering::SeqCst);
    }

    #[test]
    fn max_qps_with_per_call_cost() {
        let mut opts = opts_with_runners(4, StdDuration::from_millis(100));
        opts.qps = -1.0;
        opts.duration_secs = 0.29;
        let mut runner = PeriodicRunner::new(opts);
        let results = runner.run();
        assert_eq!(results.duration_histogram.count, 12);
    }

    #[test]
    fn no_catch_up_bounds_call_count_below_catch_up_behavior() {
        let mut opts = opts_with_runners(2, StdDuration::from_millis(2));
        opts.qps = 85.0;
        opts.duration_secs = 2.0;
        opts.uniform = true;
        opts.no_catch_up = true;
        let mut runner = PeriodicRunner::new(opts);
        let results = runner.run();
        assert!(results.duration_histogram.count < 170);
        assert!(results.duration_histogram.count > 0);
    }

    #[test]
    fn pre_start_abort_returns_immediately() {
        let opts = opts_with_runners(1, StdDuration::ZERO);
        let mut runner = PeriodicRunner::new(opts);
        // Mirrors the documented scenario: Abort(wait=true) runs
        // concurrently with Run() and must still observe should_abort,
        // never deadlocking regardless of which side wins the race.
        let stop = runner.options().stop.clone();
        let aborter_thread = thread::spawn(move || {
            stop.abort(true);
        });
        thread::sleep(StdDuration::from_millis(20));
        let results = runner.run();
        aborter_thread.join().unwrap();
        assert_eq!(results.actual_duration_secs, 0.0);
        assert_eq!(results.duration_histogram.count, 0);
        assert!(results.error.is_some());
    }

    #[test]
    fn num_threads_visible_after_reduction() {
        let mut opts = opts_with_runners(8, StdDuration::ZERO);
        opts.exactly = 4; // 4/8 = 0 per thread, well under MIN_CALLS_PER_THREAD
        let runner = PeriodicRunner::new(opts);
        assert_eq!(runner.options().num_threads, 1);
    }

    #[test]
    fn zero_calls_per_thread_does_not_dispatch() {
        // `num_threads` left at its default (0 -> 4 post-normalize) and
        // `num_threads > 1` at construction time, so the `MIN_CALLS_PER_THREAD`
        // guard never fires here; `calls_for_thread` hands three of the four
        // threads `num_calls == 0`. Those must not each sneak in one extra
        // dispatch, or `DurationHistogram.Count` would land on 6, not 3.
        let mut opts = RunnerOptions::new();
        opts.exactly = 3;
        opts.make_runners(4, || Box::new(NoopRunnable { sleep: StdDuration::ZERO }));
        let mut runner = PeriodicRunner::new(opts);
        let results = runner.run();
        assert_eq!(results.duration_histogram.count, 3);
    }
}
