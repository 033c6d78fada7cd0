//! The periodic load-testing runner core: a protocol-agnostic concurrent
//! load generator that executes a user-supplied [`Runnable`] across N worker
//! threads at a target rate for a duration, an exact count, or until
//! aborted.

pub mod engine;
mod id;
mod options;
mod results;
mod runnable;
mod runner;

pub use fortio_aborter::Aborter;
pub use options::{
    NormalizedOptions,
    RunnerOptions,
    DEFAULT_DURATION_SECS,
    DEFAULT_NUM_THREADS,
    DEFAULT_QPS,
    DEFAULT_RESOLUTION,
};
pub use results::RunnerResults;
pub use runnable::{
    NoopRunnable,
    Runnable,
};
pub use runner::PeriodicRunner;
