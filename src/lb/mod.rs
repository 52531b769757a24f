//! Client-side load balancing for multi-node storage clusters.
//!
//! # Components
//!
//! - [`Host`]: a single cluster node with live counters and a health state
//! - [`LoadBalancer`]: picks the best host per request and reconciles cluster membership
//! - [`PollingDaemon`]: background loop refreshing membership and host health
//! - [`HostListProvider`]: external collaborator supplying node lists and probes
//! - [`HostVetoRule`]: per-request predicate excluding hosts from selection
//!
//! # Selection
//!
//! [`LoadBalancer::top_host`] scans every host once under a single lock and
//! prefers the healthy host with the fewest open connections, falling back to
//! the best unhealthy host during a total outage so a request is always routed
//! somewhere. The winner moves to the back of the list, which round-robins
//! hosts with identical scores.
//!
//! # Health
//!
//! A host receives traffic only when two independent gates pass: the health
//! flag owned by the polling daemon, and an error-streak cool-down that
//! doubles per consecutive error (base 1500 ms, capped at 16x). The flag
//! recovers only through the next successful probe.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use smartpool::lb::{Host, LoadBalancer};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), smartpool::lb::LoadBalancerError> {
//! let balancer = Arc::new(LoadBalancer::new(vec![
//!     Host::with_port("node1.storage.local", 9021),
//!     Host::with_port("node2.storage.local", 9021),
//! ]));
//!
//! // Pick a host and report the request lifecycle back onto it
//! let host = balancer.top_host()?;
//! host.connection_opened();
//! // ... issue the request through your own transport ...
//! host.call_complete(false);
//! host.connection_closed();
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Everything here is designed to be shared across threads and tasks via
//! `Arc`:
//!
//! - Host counters are lock-free atomics, so request threads and the polling
//!   daemon mutate shared hosts without coordination
//! - The host list is guarded by one lock covering both selection-reorder and
//!   membership reconciliation
//! - The polling daemon runs in a background tokio task and never holds the
//!   host lock across a network call

pub mod balancer;
pub mod daemon;
pub mod host;
pub mod provider;
pub mod veto;

pub use balancer::{LoadBalancer, LoadBalancerError};
pub use daemon::{PollingConfig, PollingDaemon, PollingHandle, DEFAULT_POLL_INTERVAL};
pub use host::{Host, HostIdentity, HostStats, DEFAULT_ERROR_WAIT};
pub use provider::HostListProvider;
pub use veto::{HostVetoRule, RequestContext};
