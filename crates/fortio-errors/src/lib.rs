//! Shared error taxonomy for the fortio crates: a configuration mistake the
//! caller made, a failure to get a connection set up, or (separately, via
//! [`fatal`]) an invariant violation that should crash fast rather than be
//! reported.

use std::borrow::Cow;

use thiserror::Error;

/// Which policy bucket an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input supplied by the caller; the run is never started.
    Configuration,
    /// Setting up a connection/resource failed before the run's main loop.
    Initialization,
}

/// A tagged error that can be attached to an `anyhow` chain via `.context(..)`.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub class: ErrorClass,
    /// Short, stable, test-matchable tag. Eg `UnknownAccessLogFormat`.
    pub short_msg: Cow<'static, str>,
    /// Human readable, developer facing message.
    pub msg: Cow<'static, str>,
}

impl ErrorMetadata {
    pub fn configuration(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            class: ErrorClass::Configuration,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn initialization(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            class: ErrorClass::Initialization,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }
}

/// Leaf errors owned by the runner/adapter crates.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("unknown access logger format {0:?}; expected \"json\" or \"influx\"")]
    UnknownAccessLogFormat(String),

    #[error("failed to open access log file {path}: {source}")]
    AccessLogOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run was aborted before even starting")]
    AbortedBeforeStarting,
}

/// Crash fast with a diagnostic for an invariant violation (class). Never used for anything a caller could trigger by
/// passing bad input — those go through [`RunnerError`]/[`ErrorMetadata`]
/// instead.
#[track_caller]
pub fn fatal(msg: impl std::fmt::Display) -> ! {
    panic!("fortio: fatal logic bug: {msg}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_metadata_display_is_msg() {
        let e = ErrorMetadata::configuration("BadFormat", "format must be json or influx");
        assert_eq!(e.to_string(), "format must be json or influx");
        assert_eq!(e.class, ErrorClass::Configuration);
    }
}
