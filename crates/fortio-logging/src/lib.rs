//! Tracing subscriber setup: long-running services get `INFO` by default,
//! one-shot tools get `ERROR` by default, both honor
//! `RUST_LOG`/`LOG_FORMAT`/`NO_COLOR`/`FORTIO_TRACE_FILE`.

use std::{
    env,
    fs::File,
    io,
    sync::LazyLock,
};

use tracing::Level;
use tracing_subscriber::{
    fmt::format::format,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

static TRACE_FILE: LazyLock<Option<File>> = LazyLock::new(|| {
    let path = env::var("FORTIO_TRACE_FILE").ok()?;
    Some(File::create(&path).unwrap_or_else(|e| panic!("could not create trace file {path}: {e}")))
});

/// Holds the non-blocking file-appender guard alive for as long as logging
/// should keep flushing to `FORTIO_TRACE_FILE`.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Call from long-running binaries (the `fortio-cli` load generator itself).
pub fn init_service() -> LoggingGuard {
    init(io::stdout, Level::INFO)
}

/// Call from short-lived tools/tests.
pub fn init_tool() -> LoggingGuard {
    init(io::stderr, Level::ERROR)
}

fn init<W>(writer: W, default_level: Level) -> LoggingGuard
where
    W: Send + Sync + for<'w> tracing_subscriber::fmt::MakeWriter<'w> + 'static,
{
    let no_color = env::var("NO_COLOR").is_ok();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!no_color)
        .with_writer(writer);
    let fmt_layer = match env::var("LOG_FORMAT").as_deref() {
        Ok("json") => fmt_layer.event_format(format().json()).boxed(),
        Ok("pretty") => fmt_layer.event_format(format().pretty()).boxed(),
        _ => fmt_layer.event_format(format().compact()).boxed(),
    };
    let fmt_layer = fmt_layer
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str())),
        )
        .boxed();

    let mut layers = vec![fmt_layer];
    let guard = TRACE_FILE.as_ref().map(|file| {
        let (writer, guard) = tracing_appender::non_blocking(file.try_clone().expect("clone trace file"));
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
                .boxed(),
        );
        guard
    });

    // Tests in multiple crates may call init() more than once; this is fine,
    // we just keep the first subscriber.
    let _ = tracing_subscriber::registry().with(layers).try_init();

    LoggingGuard { _file_guard: guard }
}
