//! Shared harness for the integration tests.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;

use smartpool::lb::{Host, LoadBalancer};

/// Installs the test log subscriber; safe to call from every test.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type RequestExecutor = dyn Fn(&Host) -> anyhow::Result<()> + Send + Sync;

/// Drives simulated request traffic through a load balancer.
///
/// Each call picks the top host, opens a connection, optionally runs an
/// executor against it, reports the outcome, and closes the connection.
/// Calls are spread over ten worker threads with a small random arrival
/// jitter, the way real request threads hit the balancer.
pub struct RequestSimulator {
    balancer: Arc<LoadBalancer>,
    call_count: usize,
    executor: Option<Arc<RequestExecutor>>,
}

impl RequestSimulator {
    const WORKERS: usize = 10;

    pub fn new(balancer: Arc<LoadBalancer>, call_count: usize) -> Self {
        Self {
            balancer,
            call_count,
            executor: None,
        }
    }

    /// Runs the given executor against the selected host on every call; an
    /// `Err` is reported to the host as a failed call.
    #[allow(dead_code)]
    pub fn with_request_executor(mut self, executor: Arc<RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runs all calls to completion and returns any selection failures.
    pub fn run(&self) -> Vec<String> {
        let errors = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for worker in 0..Self::WORKERS {
            let balancer = self.balancer.clone();
            let executor = self.executor.clone();
            let errors = errors.clone();
            let calls = self.call_count / Self::WORKERS
                + usize::from(worker < self.call_count % Self::WORKERS);

            handles.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..calls {
                    thread::sleep(Duration::from_millis(rng.gen_range(0..20)));

                    let host = match balancer.top_host() {
                        Ok(host) => host,
                        Err(error) => {
                            errors.lock().unwrap().push(error.to_string());
                            continue;
                        }
                    };

                    host.connection_opened();
                    match executor.as_deref().map_or(Ok(()), |execute| execute(&host)) {
                        Ok(()) => host.call_complete(false),
                        Err(_) => host.call_complete(true),
                    }
                    host.connection_closed();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        Arc::try_unwrap(errors).unwrap().into_inner().unwrap()
    }
}
