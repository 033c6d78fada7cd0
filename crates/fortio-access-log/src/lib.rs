//! The `AccessLogger` contract (.3, C3) plus the mandated file-backed
//! implementation in `json` and `influx` line formats.

use std::{
    fs::OpenOptions,
    io::Write,
    path::Path,
    time::{
        SystemTime,
        UNIX_EPOCH,
    },
};

use fortio_errors::RunnerError;
use parking_lot::Mutex;
use serde::Serialize;

/// Per-request bookkeeping threaded through `Start`/`Report`. Loggers that
/// want to annotate the request (e.g. attach a trace id) can stash data in
/// `fields` from `start()` and read it back in `report()`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub thread_id: usize,
    pub iter: u64,
    pub start_time: SystemTime,
    pub fields: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new(thread_id: usize, iter: u64, start_time: SystemTime) -> Self {
        Self {
            thread_id,
            iter,
            start_time,
            fields: Vec::new(),
        }
    }
}

/// Pluggable per-request hook. `start` runs before the `Runnable`, `report`
/// after. Implementations must be safe to call concurrently from every
/// worker thread.
pub trait AccessLogger: Send + Sync {
    /// Called before each `Runnable` invocation; may annotate the context.
    fn start(&self, ctx: RequestContext) -> RequestContext {
        ctx
    }

    /// Called after each `Runnable` invocation.
    fn report(&self, ctx: &RequestContext, latency_seconds: f64, status: bool, details: &str);

    /// Human readable descriptor echoed into `RunnerResults`.
    fn info(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogFormat {
    Json,
    Influx,
}

impl AccessLogFormat {
    pub fn parse(s: &str) -> Result<Self, RunnerError> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "influx" => Ok(Self::Influx),
            _ => Err(RunnerError::UnknownAccessLogFormat(s.to_owned())),
        }
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    latency: f64,
    timestamp: u64,
    thread: usize,
    iter: u64,
    ok: bool,
    details: &'a str,
}

/// Writes opens append-create with mode `0644`, serialized by a mutex so
/// concurrent worker threads never interleave partial lines.
pub struct FileAccessLogger {
    path: String,
    format: AccessLogFormat,
    file: Mutex<std::fs::File>,
}

impl FileAccessLogger {
    pub fn new(path: impl AsRef<Path>, format: AccessLogFormat) -> Result<Self, RunnerError> {
        let path = path.as_ref();
        #[cfg_attr(not(unix), allow(unused_mut))]
        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let file = opts.open(path).map_err(|source| RunnerError::AccessLogOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path: path.display().to_string(),
            format,
            file: Mutex::new(file),
        })
    }
}

impl AccessLogger for FileAccessLogger {
    fn report(&self, ctx: &RequestContext, latency_seconds: f64, status: bool, details: &str) {
        let nanos = ctx
            .start_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let line = match self.format {
            AccessLogFormat::Json => {
                let record = JsonLine {
                    latency: latency_seconds,
                    timestamp: nanos,
                    thread: ctx.thread_id,
                    iter: ctx.iter,
                    ok: status,
                    details,
                };
                serde_json::to_string(&record).expect("JsonLine serializes")
            },
            AccessLogFormat::Influx => {
                format!(
                    "latency,thread={},ok={} value={},details=\"{}\" {}",
                    ctx.thread_id, status, latency_seconds, details, nanos
                )
            },
        };
        let mut file = self.file.lock();
        let _ = writeln!(file, "{line}");
    }

    fn info(&self) -> String {
        format!("{:?} access log at {}", self.format, self.path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{
        BufRead,
        BufReader,
    };

    use tempfile_shim::NamedTempFile;

    use super::*;

    // Small local stand-in so this crate doesn't need a dev-dependency on
    // `tempfile` just to make a scratch path; a single random suffix in
    // `std::env::temp_dir` is enough here and keeps this crate's dependency
    // list minimal.
    mod tempfile_shim {
        use std::path::PathBuf;

        pub struct NamedTempFile(pub PathBuf);

        impl NamedTempFile {
            pub fn new() -> Self {
                let mut p = std::env::temp_dir();
                let unique = format!(
                    "fortio-access-log-test-{}-{}",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_nanos()
                );
                p.push(unique);
                Self(p)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for NamedTempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(AccessLogFormat::parse("xml").is_err());
        assert!(AccessLogFormat::parse("JSON").is_ok());
        assert!(AccessLogFormat::parse("Influx").is_ok());
    }

    #[test]
    fn json_lines_round_trip_count_and_status() {
        let tmp = NamedTempFile::new();
        let logger = FileAccessLogger::new(tmp.path(), AccessLogFormat::Json).unwrap();
        for i in 0..5u64 {
            let ctx = RequestContext::new(0, i, SystemTime::now());
            logger.report(&ctx, 0.01, i % 2 == 0, "200");
        }
        let file = std::fs::File::open(tmp.path()).unwrap();
        let lines: Vec<_> = BufReader::new(file).lines().collect::<Result<_, _>>().unwrap();
        assert_eq!(lines.len(), 5);
        let ok_count = lines
            .iter()
            .filter(|l| l.contains("\"ok\":true"))
            .count();
        assert_eq!(ok_count, 3);
    }

    #[test]
    fn influx_line_contains_expected_fields() {
        let tmp = NamedTempFile::new();
        let logger = FileAccessLogger::new(tmp.path(), AccessLogFormat::Influx).unwrap();
        let ctx = RequestContext::new(2, 7, SystemTime::now());
        logger.report(&ctx, 0.005, true, "OK");
        let file = std::fs::File::open(tmp.path()).unwrap();
        let line = BufReader::new(file).lines().next().unwrap().unwrap();
        assert!(line.starts_with("latency,thread=2,ok=true value=0.005,details=\"OK\" "));
    }
}
