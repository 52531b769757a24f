use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::balancer::LoadBalancer;
use super::provider::HostListProvider;

/// Default interval between polling cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// Settings for the background polling loop.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Time between the start of one cycle and the start of the next.
    pub poll_interval: Duration,

    /// Whether each cycle refreshes cluster membership from the provider.
    pub host_update_enabled: bool,

    /// Whether each cycle probes every known host.
    pub health_check_enabled: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            host_update_enabled: true,
            health_check_enabled: true,
        }
    }
}

/// Background loop that keeps a [`LoadBalancer`] in sync with the cluster.
///
/// Each cycle refreshes membership through the [`HostListProvider`] and
/// probes every known host, then sleeps out the remainder of the poll
/// interval. Provider failures are logged and tolerated; they never stop the
/// loop. The provider's network calls happen without holding the balancer's
/// host lock, which is only taken for the in-memory merge and flag writes.
pub struct PollingDaemon {
    balancer: Arc<LoadBalancer>,
    provider: Arc<dyn HostListProvider>,
    config: PollingConfig,
}

impl PollingDaemon {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        provider: Arc<dyn HostListProvider>,
        config: PollingConfig,
    ) -> Self {
        Self {
            balancer,
            provider,
            config,
        }
    }

    /// Spawn the polling loop onto the current tokio runtime.
    ///
    /// The returned handle terminates the loop; dropping it has the same
    /// effect at the loop's next check.
    pub fn start(self) -> PollingHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        PollingHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!("polling daemon started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let cycle_start = Instant::now();
            self.refresh_membership().await;
            self.probe_hosts().await;

            let sleep_for = self
                .config
                .poll_interval
                .saturating_sub(cycle_start.elapsed());
            debug!(
                sleep_ms = sleep_for.as_millis() as u64,
                "polling cycle finished"
            );

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep(sleep_for) => {}
            }
        }

        self.provider.destroy().await;
        debug!("polling daemon stopped");
    }

    async fn refresh_membership(&self) {
        if !self.config.host_update_enabled {
            debug!("host update disabled; not updating hosts");
            return;
        }
        match self.provider.get_host_list().await {
            Ok(identities) => {
                debug!(count = identities.len(), "retrieved updated node list");
                self.balancer.update_hosts(identities);
            }
            Err(error) => {
                // keep the previous membership and wait for the next cycle
                warn!(%error, "unable to enumerate cluster nodes");
            }
        }
    }

    async fn probe_hosts(&self) {
        if !self.config.health_check_enabled {
            debug!("health check disabled; not checking hosts");
            return;
        }
        for host in self.balancer.all_hosts() {
            match self.provider.run_health_check(&host).await {
                Ok(()) => {
                    host.set_healthy(true);
                    debug!(host = %host.identity(), "health check passed");
                }
                Err(error) => {
                    host.set_healthy(false);
                    warn!(host = %host.identity(), %error, "health check failed; host marked unhealthy");
                }
            }
        }
    }
}

/// Control handle for a running [`PollingDaemon`].
pub struct PollingHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// Signal the loop to stop. Idempotent and non-blocking; the loop exits
    /// at its next check, at the latest within one poll interval.
    pub fn terminate(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the loop is still running. `terminate` does not make this
    /// false instantly; an in-flight cycle is allowed to finish.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Terminate the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::host::{Host, HostIdentity};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted provider: a fixed membership answer plus a health verdict for
    /// one designated host, both swappable mid-test.
    struct ScriptedProvider {
        host_list: Mutex<anyhow::Result<Vec<HostIdentity>>>,
        sick_host: Option<&'static str>,
        sick: AtomicBool,
        list_calls: AtomicUsize,
        check_calls: AtomicUsize,
        destroyed: AtomicBool,
    }

    impl ScriptedProvider {
        fn new(host_list: anyhow::Result<Vec<HostIdentity>>) -> Self {
            Self {
                host_list: Mutex::new(host_list),
                sick_host: None,
                sick: AtomicBool::new(false),
                list_calls: AtomicUsize::new(0),
                check_calls: AtomicUsize::new(0),
                destroyed: AtomicBool::new(false),
            }
        }

        fn with_sick_host(mut self, name: &'static str) -> Self {
            self.sick_host = Some(name);
            self.sick.store(true, Ordering::Relaxed);
            self
        }

        fn set_host_list(&self, host_list: anyhow::Result<Vec<HostIdentity>>) {
            *self.host_list.lock() = host_list;
        }
    }

    #[async_trait]
    impl HostListProvider for ScriptedProvider {
        async fn get_host_list(&self) -> anyhow::Result<Vec<HostIdentity>> {
            self.list_calls.fetch_add(1, Ordering::Relaxed);
            match &*self.host_list.lock() {
                Ok(list) => Ok(list.clone()),
                Err(error) => Err(anyhow::anyhow!("{error}")),
            }
        }

        async fn run_health_check(&self, host: &Host) -> anyhow::Result<()> {
            self.check_calls.fetch_add(1, Ordering::Relaxed);
            if self.sick_host == Some(host.name()) && self.sick.load(Ordering::Relaxed) {
                anyhow::bail!("probe refused");
            }
            Ok(())
        }

        async fn destroy(&self) {
            self.destroyed.store(true, Ordering::Relaxed);
        }
    }

    fn identities(names: &[&str]) -> Vec<HostIdentity> {
        names.iter().map(|name| HostIdentity::new(*name)).collect()
    }

    fn balancer(names: &[&str]) -> Arc<LoadBalancer> {
        Arc::new(LoadBalancer::new(
            names.iter().map(|name| Host::new(*name)).collect(),
        ))
    }

    fn fast_polling() -> PollingConfig {
        PollingConfig {
            poll_interval: Duration::from_millis(20),
            ..PollingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_probe_results_drive_the_health_flag() {
        let balancer = balancer(&["foo", "bar"]);
        let provider =
            Arc::new(ScriptedProvider::new(Ok(identities(&["foo", "bar"]))).with_sick_host("foo"));

        let handle =
            PollingDaemon::new(balancer.clone(), provider.clone(), fast_polling()).start();
        sleep(Duration::from_millis(100)).await;

        let hosts = balancer.all_hosts();
        assert!(!hosts[0].is_healthy());
        assert!(hosts[1].is_healthy());

        // recovery happens only through the next successful probe
        provider.sick.store(false, Ordering::Relaxed);
        sleep(Duration::from_millis(100)).await;
        assert!(balancer.all_hosts()[0].is_healthy());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_membership_is_reconciled_each_cycle() {
        let balancer = balancer(&["foo", "bar"]);
        let provider = Arc::new(ScriptedProvider::new(Ok(identities(&["bar", "baz"]))));

        let handle =
            PollingDaemon::new(balancer.clone(), provider.clone(), fast_polling()).start();
        sleep(Duration::from_millis(100)).await;

        let names: Vec<String> = balancer
            .all_hosts()
            .iter()
            .map(|host| host.name().to_string())
            .collect();
        assert_eq!(names, vec!["bar", "baz"]);

        // the next cycles pick up a further membership change
        provider.set_host_list(Ok(identities(&["baz", "qux"])));
        sleep(Duration::from_millis(100)).await;

        let names: Vec<String> = balancer
            .all_hosts()
            .iter()
            .map(|host| host.name().to_string())
            .collect();
        assert_eq!(names, vec!["baz", "qux"]);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_membership_and_loop_alive() {
        let balancer = balancer(&["foo", "bar"]);
        let provider = Arc::new(ScriptedProvider::new(Err(anyhow::anyhow!(
            "cluster unreachable"
        ))));

        let handle =
            PollingDaemon::new(balancer.clone(), provider.clone(), fast_polling()).start();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(balancer.all_hosts().len(), 2);
        assert!(handle.is_running());
        assert!(provider.list_calls.load(Ordering::Relaxed) > 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_toggles_skip_provider_calls() {
        let balancer = balancer(&["foo"]);
        let provider = Arc::new(ScriptedProvider::new(Ok(identities(&["foo"]))));
        let config = PollingConfig {
            poll_interval: Duration::from_millis(20),
            host_update_enabled: false,
            health_check_enabled: false,
        };

        let handle = PollingDaemon::new(balancer, provider.clone(), config).start();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(provider.list_calls.load(Ordering::Relaxed), 0);
        assert_eq!(provider.check_calls.load(Ordering::Relaxed), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_terminate_stops_the_loop_and_destroys_the_provider() {
        let balancer = balancer(&["foo"]);
        let provider = Arc::new(ScriptedProvider::new(Ok(identities(&["foo"]))));
        let config = PollingConfig {
            poll_interval: Duration::from_secs(3600),
            ..PollingConfig::default()
        };

        let handle = PollingDaemon::new(balancer, provider.clone(), config).start();
        sleep(Duration::from_millis(50)).await;
        assert!(handle.is_running());

        handle.terminate();
        handle.terminate(); // idempotent
        handle.stop().await;

        assert!(provider.destroyed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_dropping_the_handle_stops_the_loop() {
        let balancer = balancer(&["foo"]);
        let provider = Arc::new(ScriptedProvider::new(Ok(identities(&["foo"]))));

        let handle = PollingDaemon::new(balancer, provider.clone(), fast_polling()).start();
        drop(handle);

        sleep(Duration::from_millis(100)).await;
        assert!(provider.destroyed.load(Ordering::Relaxed));
    }
}
