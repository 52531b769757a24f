use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Default cool-down base after an error, in milliseconds.
pub const DEFAULT_ERROR_WAIT: Duration = Duration::from_millis(1500);

/// Cool-down doubling is capped at 2^4 = 16x the error wait time.
pub const MAX_COOL_DOWN_EXP: u64 = 4;

/// Minimum interval between "open connections went negative" warnings.
const NEGATIVE_WARN_INTERVAL_MS: u64 = 60_000;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identity of a cluster node: host name plus optional service port.
///
/// Identity is the sole basis for membership diffing and deduplication;
/// two [`Host`]s compare equal iff their identities do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostIdentity {
    pub name: String,
    pub port: Option<u16>,
}

impl HostIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: None,
        }
    }

    pub fn with_port(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port: Some(port),
        }
    }

    /// Parse a `"name"` or `"name:port"` entry as found in configuration files.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            bail!("host entry is empty");
        }
        match entry.rsplit_once(':') {
            Some((name, port)) => {
                if name.is_empty() {
                    bail!("host entry {entry:?} has no host name");
                }
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("invalid port in host entry {entry:?}"))?;
                Ok(Self::with_port(name, port))
            }
            None => Ok(Self::new(entry)),
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.name, port),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A single cluster node as tracked by the load balancer.
///
/// Some basic statements about response index calculation:
///
/// - a lower response index means the host is more likely to be used
/// - the index is based on the number of open connections to the host
/// - an error marks the host unhealthy for `error_wait_time` milliseconds
/// - consecutive errors compound the cool-down period up to 16x the wait time
///
/// All counters are atomics, so request threads and the polling daemon can
/// mutate a shared `Arc<Host>` without any lock.
#[derive(Debug)]
pub struct Host {
    name: String,
    port: Option<u16>,

    /// Externally managed health flag; only the polling daemon writes it.
    healthy: AtomicBool,

    /// Cool-down base in milliseconds, compounded for consecutive errors.
    error_wait_millis: AtomicU64,

    /// Signed on purpose: unbalanced close calls may drive it negative.
    open_connections: AtomicI64,

    total_connections: AtomicU64,
    total_errors: AtomicU64,
    consecutive_errors: AtomicU64,

    /// Unix millis of the last `connection_opened`; 0 means never used.
    last_connection_millis: AtomicU64,

    /// Rate limiter for the negative-counter warning.
    last_warn_millis: AtomicU64,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: None,
            healthy: AtomicBool::new(true),
            error_wait_millis: AtomicU64::new(DEFAULT_ERROR_WAIT.as_millis() as u64),
            open_connections: AtomicI64::new(0),
            total_connections: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            consecutive_errors: AtomicU64::new(0),
            last_connection_millis: AtomicU64::new(0),
            last_warn_millis: AtomicU64::new(0),
        }
    }

    pub fn with_port(name: impl Into<String>, port: u16) -> Self {
        let mut host = Self::new(name);
        host.port = Some(port);
        host
    }

    /// Builder-style override of the cool-down base.
    pub fn with_error_wait_time(self, wait: Duration) -> Self {
        self.set_error_wait_time(wait);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn identity(&self) -> HostIdentity {
        HostIdentity {
            name: self.name.clone(),
            port: self.port,
        }
    }

    /// Record that a connection to this host was opened.
    pub fn connection_opened(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.last_connection_millis
            .store(now_millis(), Ordering::Relaxed);
    }

    /// Record that a connection to this host was closed.
    ///
    /// A negative result indicates unbalanced open/close calls in the caller;
    /// it is logged at most once per minute and never corrected or propagated.
    pub fn connection_closed(&self) {
        let open = self.open_connections.fetch_sub(1, Ordering::Relaxed) - 1;

        if open < 0 {
            let now = now_millis();
            let last = self.last_warn_millis.load(Ordering::Relaxed);
            if now.saturating_sub(last) > NEGATIVE_WARN_INTERVAL_MS
                && self
                    .last_warn_millis
                    .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                warn!(host = %self, open_connections = open, "open connection count is negative");
            }
        }
    }

    /// Record the outcome of a completed call against this host.
    ///
    /// An error extends the host's error streak; a success resets it. The
    /// external health flag is not touched either way, so a host marked down
    /// by a failed probe recovers only through the next successful probe.
    pub fn call_complete(&self, is_error: bool) {
        if is_error {
            let total = self.total_errors.fetch_add(1, Ordering::Relaxed) + 1;
            let consecutive = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                host = %self.identity(),
                total_errors = total,
                consecutive_errors = consecutive,
                "error tallied"
            );
        } else {
            self.consecutive_errors.store(0, Ordering::Relaxed);
        }
    }

    /// Whether this host should currently receive requests.
    ///
    /// Two independent gates must both pass: the external health flag (owned
    /// by the polling daemon) and the error-streak cool-down. The cool-down
    /// after the k-th consecutive error is `error_wait_time * 2^min(k-1, 4)`
    /// measured from the last time the host was used.
    pub fn is_healthy(&self) -> bool {
        if !self.healthy.load(Ordering::Relaxed) {
            return false;
        }
        let errors = self.consecutive_errors.load(Ordering::Relaxed);
        if errors == 0 {
            return true;
        }
        let exp = (errors - 1).min(MAX_COOL_DOWN_EXP);
        let cool_down = self.error_wait_millis.load(Ordering::Relaxed) << exp;
        let since_last_use =
            now_millis().saturating_sub(self.last_connection_millis.load(Ordering::Relaxed));
        since_last_use > cool_down
    }

    /// Set the external health flag. Called by the polling daemon with the
    /// result of the latest probe; does not touch the error streak.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Comparison key for host selection; lower means more preferred.
    ///
    /// The signal is the current open-connection count (least-loaded wins).
    /// Earlier revisions weighted in a moving average of call latency with
    /// error and dormancy adjustments; the raw open count is the stable,
    /// authoritative formula.
    pub fn response_index(&self) -> i64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    pub fn error_wait_time(&self) -> Duration {
        Duration::from_millis(self.error_wait_millis.load(Ordering::Relaxed))
    }

    /// Set the cool-down base applied after an error. The period is
    /// compounded (`* 2^n`) for consecutive errors.
    pub fn set_error_wait_time(&self, wait: Duration) {
        self.error_wait_millis
            .store(wait.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn open_connections(&self) -> i64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn last_connection_time(&self) -> Option<DateTime<Utc>> {
        match self.last_connection_millis.load(Ordering::Relaxed) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis as i64),
        }
    }

    /// Resets historical metrics. Use with care!
    ///
    /// The total connection count is rebased to the number of connections
    /// currently open; error counters are zeroed.
    pub fn reset_stats(&self) {
        let open = self.open_connections.load(Ordering::Relaxed).max(0) as u64;
        self.total_connections.store(open, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// Read-only snapshot of this host's counters for monitoring.
    pub fn stats(&self) -> HostStats {
        HostStats {
            identity: self.identity(),
            total_connections: self.total_connections(),
            total_errors: self.total_errors(),
            open_connections: self.open_connections(),
            last_connection_time: self.last_connection_time(),
        }
    }
}

impl From<HostIdentity> for Host {
    fn from(identity: HostIdentity) -> Self {
        match identity.port {
            Some(port) => Host::with_port(identity.name, port),
            None => Host::new(identity.name),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{totalConnections={}, totalErrors={}, openConnections={}, lastConnectionTime={}}}",
            self.identity(),
            self.total_connections(),
            self.total_errors(),
            self.open_connections(),
            match self.last_connection_time() {
                Some(time) => time.to_rfc3339(),
                None => "never".to_string(),
            }
        )
    }
}

/// Read-only projection of a [`Host`]'s counters.
#[derive(Debug, Clone)]
pub struct HostStats {
    pub identity: HostIdentity,
    pub total_connections: u64,
    pub total_errors: u64,
    pub open_connections: i64,
    pub last_connection_time: Option<DateTime<Utc>>,
}
