use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::host::{Host, HostIdentity, HostStats};
use super::veto::{HostVetoRule, RequestContext};

#[derive(Debug, thiserror::Error)]
pub enum LoadBalancerError {
    #[error("no host available: the host list is empty or every host was vetoed")]
    NoHostAvailable,
}

/// Registry of cluster hosts plus the selection and membership logic.
///
/// Hosts live in an ordered deque guarded by a single lock; selection scans
/// and reorders under that lock, and membership reconciliation runs under the
/// same lock so the two can never interleave. Per-host counters are atomics
/// and are deliberately read without the lock, so scores may be slightly
/// stale during a scan.
pub struct LoadBalancer {
    hosts: Mutex<VecDeque<Arc<Host>>>,
    veto_rules: RwLock<Vec<Arc<dyn HostVetoRule>>>,
}

impl LoadBalancer {
    /// Create a load balancer seeded with the given hosts.
    pub fn new(initial_hosts: Vec<Host>) -> Self {
        Self {
            hosts: Mutex::new(initial_hosts.into_iter().map(Arc::new).collect()),
            veto_rules: RwLock::new(Vec::new()),
        }
    }

    /// Builder-style veto rule installation.
    pub fn with_veto_rules(self, rules: Vec<Arc<dyn HostVetoRule>>) -> Self {
        self.set_veto_rules(rules);
        self
    }

    /// Select the best host for a request carrying no special properties.
    pub fn top_host(&self) -> Result<Arc<Host>, LoadBalancerError> {
        self.top_host_for(&RequestContext::default())
    }

    /// Select the host with the lowest response index for this request.
    ///
    /// One pass over the host list tracks two minimums: the best host overall
    /// and the best among healthy hosts. A healthy host always wins if one
    /// exists; otherwise the overall best is returned, so a request is still
    /// routed somewhere during a total outage. The selected host is moved to
    /// the back of the list, which round-robins hosts with identical scores.
    pub fn top_host_for(&self, context: &RequestContext) -> Result<Arc<Host>, LoadBalancerError> {
        let rules = self.veto_rules.read();
        let mut hosts = self.hosts.lock();

        let mut top: Option<(Arc<Host>, i64)> = None;
        let mut top_healthy: Option<(Arc<Host>, i64)> = None;

        for host in hosts.iter() {
            if rules.iter().any(|rule| rule.should_veto(host, context)) {
                continue;
            }

            let index = host.response_index();

            if top.as_ref().map_or(true, |(_, best)| index < *best) {
                top = Some((host.clone(), index));
            }
            if host.is_healthy() && top_healthy.as_ref().map_or(true, |(_, best)| index < *best) {
                top_healthy = Some((host.clone(), index));
            }
        }

        let selected = top_healthy
            .or(top)
            .map(|(host, _)| host)
            .ok_or(LoadBalancerError::NoHostAvailable)?;

        // move the winner to the back as an extra tie-breaker
        if let Some(position) = hosts.iter().position(|host| Arc::ptr_eq(host, &selected)) {
            if let Some(host) = hosts.remove(position) {
                hosts.push_back(host);
            }
        }

        Ok(selected)
    }

    /// Snapshot of all known hosts; modifying the returned list does not
    /// affect the load balancer.
    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.lock().iter().cloned().collect()
    }

    /// Counter snapshots for all known hosts.
    pub fn host_stats(&self) -> Vec<HostStats> {
        self.all_hosts().iter().map(|host| host.stats()).collect()
    }

    /// Resets connection metrics on every host. Use with care!
    pub fn reset_stats(&self) {
        for host in self.all_hosts() {
            host.reset_stats();
        }
    }

    pub fn total_connections(&self) -> u64 {
        self.all_hosts()
            .iter()
            .map(|host| host.total_connections())
            .sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.all_hosts()
            .iter()
            .map(|host| host.total_errors())
            .sum()
    }

    pub fn open_connections(&self) -> i64 {
        self.all_hosts()
            .iter()
            .map(|host| host.open_connections())
            .sum()
    }

    /// Reconcile tracked membership against a freshly fetched node list.
    ///
    /// Hosts whose identity appears in `updated` survive with their
    /// accumulated stats and health intact; hosts absent from it are dropped;
    /// identities not previously tracked are added as cold hosts in list
    /// order. Duplicate identities in `updated` collapse to one host.
    ///
    /// Runs under the selection lock, blocking concurrent `top_host` calls;
    /// call it sparingly (the polling daemon does, once per interval).
    pub fn update_hosts(&self, updated: Vec<HostIdentity>) {
        let incoming: HashSet<HostIdentity> = updated.iter().cloned().collect();
        let mut kept: HashSet<HostIdentity> = HashSet::with_capacity(updated.len());

        let mut hosts = self.hosts.lock();
        let before = hosts.len();

        hosts.retain(|host| {
            let identity = host.identity();
            if incoming.contains(&identity) {
                kept.insert(identity);
                true
            } else {
                info!(host = %identity, "host absent from updated node list; removing");
                false
            }
        });

        for identity in updated {
            if kept.insert(identity.clone()) {
                info!(host = %identity, "adding newly discovered host");
                hosts.push_back(Arc::new(Host::from(identity)));
            }
        }

        debug!(before, after = hosts.len(), "host list reconciled");
    }

    pub fn veto_rules(&self) -> Vec<Arc<dyn HostVetoRule>> {
        self.veto_rules.read().clone()
    }

    pub fn set_veto_rules(&self, rules: Vec<Arc<dyn HostVetoRule>>) {
        *self.veto_rules.write() = rules;
    }
}
