//! Raw UDP echo-protocol adapter (.6): each worker thread owns a
//! connected `std::net::UdpSocket`, sending the configured payload and
//! reading back the echo datagram.

use std::{
    collections::HashMap,
    net::UdpSocket,
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

pub struct UdpRunnerOptions {
    pub base: RunnerOptions,
    pub address: String,
    pub payload: Vec<u8>,
    pub timeout: Option<Duration>,
}

impl UdpRunnerOptions {
    pub fn new(address: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            base: RunnerOptions::new(),
            address: address.into(),
            payload,
            timeout: None,
        }
    }
}

pub struct UdpResult {
    pub runner: RunnerResults,
    pub ret_codes: HashMap<String, u64>,
}

struct UdpWorker {
    socket: UdpSocket,
    payload: Vec<u8>,
    read_buf: Vec<u8>,
    ret_codes: Arc<Mutex<HashMap<String, u64>>>,
}

impl UdpWorker {
    fn connect(opts: &UdpRunnerOptions, ret_codes: Arc<Mutex<HashMap<String, u64>>>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(&opts.address)?;
        socket.set_read_timeout(opts.timeout)?;
        socket.set_write_timeout(opts.timeout)?;
        Ok(Self {
            socket,
            payload: opts.payload.clone(),
            read_buf: vec![0u8; opts.payload.len().max(1) + 1],
            ret_codes,
        })
    }

    fn record(&self, key: &str) {
        *self.ret_codes.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
    }

    /// Sends/receives one echo round-trip and classifies the outcome,
    /// without touching `ret_codes` - shared by the recorded per-iteration
    /// path and the unrecorded warmup call (.6 point 3: a warmup call must
    /// not count toward `RetCodes`, since it never reaches
    /// `DurationHistogram` either).
    fn classify_echo(&mut self) -> (bool, String) {
        if self.socket.send(&self.payload).is_err() {
            return classify_key("error");
        }
        match self.socket.recv(&mut self.read_buf) {
            Ok(n) if n < self.payload.len() => classify_key("short-read"),
            Ok(n) if n > self.payload.len() => classify_key("mismatch"),
            Ok(n) if self.read_buf[..n] == self.payload[..] => classify_key("OK"),
            Ok(_) => classify_key("mismatch"),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut => {
                classify_key("timeout")
            },
            Err(_) => classify_key("error"),
        }
    }

    fn echo_once(&mut self) -> (bool, String) {
        let (status, key) = self.classify_echo();
        self.record(&key);
        (status, key)
    }
}

fn classify_key(key: &str) -> (bool, String) {
    (key == "OK", key.to_string())
}

impl Runnable for UdpWorker {
    fn run(&mut self, _thread_id: usize) -> (bool, String) {
        self.echo_once()
    }
}

pub fn run_udp_test(mut opts: UdpRunnerOptions) -> anyhow::Result<UdpResult> {
    let num_threads = if opts.base.num_threads < 1 {
        fortio_runner::DEFAULT_NUM_THREADS
    } else {
        opts.base.num_threads
    };
    opts.base.num_threads = num_threads;
    tracing::info!(run_type = "UDP", address = %opts.address, num_threads, "starting UDP echo run");

    let ret_codes = Arc::new(Mutex::new(HashMap::new()));
    let mut workers = Vec::with_capacity(num_threads);
    for _ in 0..num_threads {
        workers.push(UdpWorker::connect(&opts, ret_codes.clone())?);
    }

    if opts.base.exactly <= 0 {
        for worker in &mut workers {
            let (status, details) = worker.classify_echo();
            if !status {
                anyhow::bail!("UDP warmup echo to {} failed: {details}", opts.address);
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

    Ok(UdpResult {
        runner: runner_results,
        ret_codes,
    })
}
