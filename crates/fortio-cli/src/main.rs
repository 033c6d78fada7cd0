//! Demonstration front end (.4): wires `clap` flags to one of the
//! four protocol adapters, runs it, and prints a summary. Does not
//! implement the REST admin server, the web UI, or TSV indexing - those
//! stay out of scope for this binary.

use anyhow::Context;
use clap::{
    Parser,
    ValueEnum,
};
use fortio_runner::RunnerOptions;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Protocol {
    Http,
    Grpc,
    Tcp,
    Udp,
}

/// A small load generator exercising the fortio periodic-runner core.
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Target URL (http/grpc) or address (tcp/udp)
    target: String,

    /// Protocol to drive against the target
    #[clap(long, value_enum, default_value = "http")]
    protocol: Protocol,

    /// Target aggregate queries per second; 0 for the default, negative for
    /// max speed
    #[clap(short, long, default_value_t = 0.0)]
    qps: f64,

    /// How long to run for, in seconds; negative means until interrupted
    #[clap(short, long, default_value_t = 0.0)]
    duration: f64,

    /// Run exactly this many total iterations instead of for a duration
    #[clap(long, default_value_t = 0)]
    exactly: i64,

    /// Number of concurrent worker threads
    #[clap(short = 't', long, default_value_t = 0)]
    num_threads: usize,

    /// Add +/-10% random jitter to the inter-request sleep
    #[clap(long)]
    jitter: bool,

    /// Stagger thread start phases uniformly
    #[clap(long)]
    uniform: bool,

    /// Skip an iteration instead of catching up when a thread falls behind
    #[clap(long)]
    no_catch_up: bool,

    /// Free-form label copied into the run ID and results
    #[clap(long, default_value = "")]
    labels: String,

    /// Write a line-oriented access log to this path
    #[clap(long)]
    access_log: Option<String>,

    /// Access log format: "json" or "influx"
    #[clap(long, default_value = "json")]
    access_log_format: String,

    /// Save the JSON result to this path
    #[clap(long)]
    save: Option<String>,

    /// Payload to send for tcp/udp echo tests
    #[clap(long, default_value = "ping")]
    payload: String,

    /// gRPC health-check service name; empty checks overall server health
    #[clap(long, default_value = "")]
    grpc_service: String,
}

fn base_options(args: &Args) -> anyhow::Result<RunnerOptions> {
    let mut opts = RunnerOptions::new();
    opts.qps = args.qps;
    opts.duration_secs = args.duration;
    opts.exactly = args.exactly;
    opts.num_threads = args.num_threads;
    opts.jitter = args.jitter;
    opts.uniform = args.uniform;
    opts.no_catch_up = args.no_catch_up;
    opts.labels.clone_from(&args.labels);
    if let Some(path) = &args.access_log {
        opts.add_access_logger(path, &args.access_log_format).context("invalid access log configuration")?;
    }
    Ok(opts)
}

fn main() -> anyhow::Result<()> {
    let _guard = fortio_logging::init_tool();
    let args = Args::parse();

    let results = match args.protocol {
        Protocol::Http => {
            let mut opts = fortio_proto_http::HttpRunnerOptions::new(args.target.clone());
            opts.base = base_options(&args)?;
            fortio_proto_http::run_http_test(opts)?.runner
        },
        Protocol::Grpc => {
            let mut opts = fortio_proto_grpc::GrpcRunnerOptions::new(args.target.clone());
            opts.service.clone_from(&args.grpc_service);
            opts.base = base_options(&args)?;
            fortio_proto_grpc::run_grpc_health_test(opts)?.runner
        },
        Protocol::Tcp => {
            let mut opts = fortio_proto_tcp::TcpRunnerOptions::new(args.target.clone(), args.payload.clone().into_bytes());
            opts.base = base_options(&args)?;
            fortio_proto_tcp::run_tcp_test(opts)?.runner
        },
        Protocol::Udp => {
            let mut opts = fortio_proto_udp::UdpRunnerOptions::new(args.target.clone(), args.payload.clone().into_bytes());
            opts.base = base_options(&args)?;
            fortio_proto_udp::run_udp_test(opts)?.runner
        },
    };

    print_summary(&results);

    if let Some(path) = &args.save {
        let json = serde_json::json!({
            "id": results.id,
            "requested_qps": results.requested_qps,
            "actual_qps": results.actual_qps,
            "actual_duration_secs": results.actual_duration_secs,
            "num_threads": results.num_threads,
            "count": results.duration_histogram.count,
            "error_count": results.errors_duration_histogram.count,
            "percentiles": results.percentiles(&[50.0, 90.0, 99.0]),
        });
        std::fs::write(path, serde_json::to_string_pretty(&json)?).with_context(|| format!("writing result to {path}"))?;
        tracing::info!(path, "saved result");
    }

    Ok(())
}

fn print_summary(results: &fortio_runner::RunnerResults) {
    println!("Run {}: {}", results.id, results.requested_duration_label);
    println!(
        "{} calls, {} errors, {:.1} actual qps over {:.3}s on {} thread(s)",
        results.duration_histogram.count,
        results.errors_duration_histogram.count,
        results.actual_qps,
        results.actual_duration_secs,
        results.num_threads,
    );
    for (p, v) in results.percentiles(&[50.0, 90.0, 99.0]) {
        println!("  p{p}: {v:.6}s");
    }
}
