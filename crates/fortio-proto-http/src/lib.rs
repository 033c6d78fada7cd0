//! HTTP protocol adapter (.6): each worker thread owns a dedicated
//! `reqwest::blocking::Client`, classifying by decimal status code.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use fortio_runner::{
    PeriodicRunner,
    Runnable,
    RunnerOptions,
    RunnerResults,
};

pub struct HttpRunnerOptions {
    pub base: RunnerOptions,
    pub url: String,
    pub method: http::Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    /// Don't propagate warmup connection failures; also skips warmup
    /// entirely (.6 adapter contract point 3).
    pub allow_initial_errors: bool,
}

impl HttpRunnerOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            base: RunnerOptions::new(),
            url: url.into(),
            method: http::Method::GET,
            headers: Vec::new(),
            body: None,
            timeout: None,
            allow_initial_errors: false,
        }
    }
}

pub struct HttpResult {
    pub runner: RunnerResults,
    pub ret_codes: HashMap<String, u64>,
    pub sockets_used: usize,
}

struct HttpWorker {
    client: reqwest::blocking::Client,
    url: reqwest::Url,
    method: reqwest::Method,
    headers: reqwest::header::HeaderMap,
    body: Option<Vec<u8>>,
    ret_codes: Arc<Mutex<HashMap<String, u64>>>,
}

impl HttpWorker {
    fn build(opts: &HttpRunnerOptions, ret_codes: Arc<Mutex<HashMap<String, u64>>>) -> anyhow::Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = opts.timeout {
            builder = builder.timeout(timeout);
        }
        // One dedicated Client (and therefore connection pool) per thread -
        // fortio's one-socket-per-thread model - rather than one shared
        // pooled client across all workers.
        let client = builder.build()?;
        let url = reqwest::Url::parse(&opts.url)?;
        let method: reqwest::Method = opts.method.as_str().parse()?;
        let mut headers = reqwest::header::HeaderMap::new();
        for (k, v) in &opts.headers {
            let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = reqwest::header::HeaderValue::from_str(v)?;
            headers.insert(name, value);
        }
        Ok(Self {
            client,
            url,
            method,
            headers,
            body: opts.body.clone(),
            ret_codes,
        })
    }

    fn record(&self, key: &str) {
        *self.ret_codes.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
    }

    /// Sends one request and classifies the response, without touching
    /// `ret_codes` - used both by the recorded per-iteration path and by the
    /// unrecorded warmup call (.6 point 3: a warmup call must not count
    /// toward `RetCodes`, since it never reaches `DurationHistogram` either).
    fn classify_once(&mut self) -> (bool, String) {
        let mut req = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            req = req.body(body.clone());
        }
        match req.send() {
            Ok(resp) => {
                let status = resp.status();
                (status.is_success(), status.as_u16().to_string())
            },
            Err(err) => (false, format!("error_{}", classify_transport_error(&err))),
        }
    }

    fn send_once(&mut self) -> (bool, String) {
        let (status, key) = self.classify_once();
        self.record(&key);
        (status, key)
    }
}

impl Runnable for HttpWorker {
    fn run(&mut self, _thread_id: usize) -> (bool, String) {
        self.send_once()
    }
}

fn classify_transport_error(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "transport"
    }
}

/// Derives the `RunType` string echoed into logs/results (.6 point
/// 3a): `"HTTP"` plus the method when it isn't the default `GET`.
fn run_type(opts: &HttpRunnerOptions) -> String {
    if opts.method == http::Method::GET {
        "HTTP".to_string()
    } else {
        format!("HTTP {}", opts.method)
    }
}

pub fn run_http_test(mut opts: HttpRunnerOptions) -> anyhow::Result<HttpResult> {
    let num_threads = if opts.base.num_threads < 1 {
        fortio_runner::DEFAULT_NUM_THREADS
    } else {
        opts.base.num_threads
    };
    opts.base.num_threads = num_threads;
    tracing::info!(run_type = %run_type(&opts), url = %opts.url, num_threads, "starting HTTP run");

    let ret_codes = Arc::new(Mutex::new(HashMap::new()));
    let mut workers = Vec::with_capacity(num_threads);
    for _ in 0..num_threads {
        workers.push(HttpWorker::build(&opts, ret_codes.clone())?);
    }

    let skip_warmup = opts.base.exactly > 0 || opts.allow_initial_errors;
    if !skip_warmup {
        for worker in &mut workers {
            let (status, details) = worker.classify_once();
            if !status && !opts.allow_initial_errors {
                anyhow::bail!("HTTP warmup call to {} failed: {details}", opts.url);
            }
        }
    }

    opts.base.runners = workers
        .into_iter()
        .map(|w| Some(Box::new(w) as Box<dyn Runnable + Send>))
        .collect();

    let mut runner = PeriodicRunner::new(opts.base);
    let runner_results = runner.run();
    let sockets_used = runner_results.num_threads;
    let ret_codes = Arc::try_unwrap(ret_codes)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone());

    Ok(HttpResult {
        runner: runner_results,
        ret_codes,
        sockets_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_type_reflects_non_get_method() {
        let mut opts = HttpRunnerOptions::new("http://127.0.0.1:1/");
        assert_eq!(run_type(&opts), "HTTP");
        opts.method = http::Method::POST;
        assert_eq!(run_type(&opts), "HTTP POST");
    }

    #[test]
    fn unreachable_url_surfaces_as_connect_error() {
        let mut opts = HttpRunnerOptions::new("http://127.0.0.1:1/");
        opts.base.num_threads = 1;
        opts.base.exactly = 1;
        opts.timeout = Some(Duration::from_millis(200));
        let result = run_http_test(opts).unwrap();
        assert_eq!(result.runner.duration_histogram.count, 1);
        assert!(result.ret_codes.keys().any(|k| k.starts_with("error_")));
    }
}
