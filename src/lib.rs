//! smartpool - client-side smart load balancer for multi-node storage clusters

pub mod config;
pub mod lb;

pub use config::SmartConfig;
pub use lb::{Host, LoadBalancer, PollingDaemon};
