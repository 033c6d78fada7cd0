//! gRPC protocol adapter (.6): each worker thread owns a dedicated
//! current-thread Tokio runtime driving the standard gRPC Health Checking
//! Protocol (`tonic_health`) synchronously.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

use fortio_runner::{
    PeriodicRunner,
    Runnable,
    RunnerOptions,
    RunnerResults,
};
use tonic::transport::Channel;
use tonic_health::pb::{
    health_check_response::ServingStatus,
    health_client::HealthClient,
    HealthCheckRequest,
};

pub struct GrpcRunnerOptions {
    pub base: RunnerOptions,
    /// e.g. `"http://localhost:50051"`.
    pub target: String,
    /// Health-checked service name; empty string checks overall server
    /// health.
    pub service: String,
}

impl GrpcRunnerOptions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            base: RunnerOptions::new(),
            target: target.into(),
            service: String::new(),
        }
    }
}

pub struct GrpcResult {
    pub runner: RunnerResults,
    pub ret_codes: HashMap<String, u64>,
}

struct HealthWorker {
    rt: tokio::runtime::Runtime,
    client: HealthClient<Channel>,
    service: String,
    ret_codes: Arc<Mutex<HashMap<String, u64>>>,
}

impl HealthWorker {
    fn connect(target: &str, ret_codes: Arc<Mutex<HashMap<String, u64>>>) -> anyhow::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let channel = rt.block_on(async {
            tonic::transport::Endpoint::from_shared(target.to_string())?.connect().await
        })?;
        Ok(Self {
            rt,
            client: HealthClient::new(channel),
            service: String::new(),
            ret_codes,
        })
    }

    fn record(&self, key: &str) {
        *self.ret_codes.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
    }

    /// Issues one health check and classifies the response, without
    /// touching `ret_codes` - shared by the recorded per-iteration path and
    /// the unrecorded warmup call (.6 point 3: a warmup call must not count
    /// toward `RetCodes`, since it never reaches `DurationHistogram` either).
    fn classify_check(&mut self) -> (bool, String) {
        let request = HealthCheckRequest {
            service: self.service.clone(),
        };
        let service = self.service.clone();
        let result = self.rt.block_on(self.client.check(tonic::Request::new(request)));
        match result {
            Ok(resp) => {
                let status = resp.into_inner().status();
                let key = serving_status_name(status);
                (status == ServingStatus::Serving, key.to_string())
            },
            Err(status) => {
                let key = format!("Error_{:?}", status.code());
                tracing::debug!(%service, %key, "grpc health check failed");
                (false, key)
            },
        }
    }

    fn check_once(&mut self) -> (bool, String) {
        let (status, key) = self.classify_check();
        self.record(&key);
        (status, key)
    }
}

fn serving_status_name(status: ServingStatus) -> &'static str {
    match status {
        ServingStatus::Unknown => "UNKNOWN",
        ServingStatus::Serving => "SERVING",
        ServingStatus::NotServing => "NOT_SERVING",
        ServingStatus::ServiceUnknown => "SERVICE_UNKNOWN",
    }
}

impl Runnable for HealthWorker {
    fn run(&mut self, _thread_id: usize) -> (bool, String) {
        self.check_once()
    }
}

pub fn run_grpc_health_test(mut opts: GrpcRunnerOptions) -> anyhow::Result<GrpcResult> {
    let num_threads = if opts.base.num_threads < 1 {
        fortio_runner::DEFAULT_NUM_THREADS
    } else {
        opts.base.num_threads
    };
    opts.base.num_threads = num_threads;
    tracing::info!(run_type = "GRPC Ping", target = %opts.target, service = %opts.service, num_threads, "starting gRPC health run");

    let ret_codes = Arc::new(Mutex::new(HashMap::new()));
    let mut workers = Vec::with_capacity(num_threads);
    for _ in 0..num_threads {
        let mut worker = HealthWorker::connect(&opts.target, ret_codes.clone())?;
        worker.service = opts.service.clone();
        workers.push(worker);
    }

    let skip_warmup = opts.base.exactly > 0;
    if !skip_warmup {
        for worker in &mut workers {
            let (status, details) = worker.classify_check();
            if !status {
                anyhow::bail!("gRPC warmup health check to {} failed: {details}", opts.target);
            }
        }
    }

    opts.base.runners = workers
        .into_iter()
        .map(|w| Some(Box::new(w) as Box<dyn Runnable + Send>))
        .collect();

    let mut runner = PeriodicRunner::new(opts.base);
    let runner_results = runner.run();
    let ret_codes = Arc::try_unwrap(ret_codes)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone());

    Ok(GrpcResult {
        runner: runner_results,
        ret_codes,
    })
}
